use super::*;

#[test]
fn stream_stdout() {
    let opener = CommandOpener::new("printf").arg("saved");

    for _ in 0..2 {
        let mut output = String::new();
        opener.open().unwrap().read_to_string(&mut output).unwrap();
        assert_eq!(output, "saved");
    }
}

#[test]
fn report_exit_status() {
    let opener = CommandOpener::new("sh")
        .arg("-c")
        .arg("printf partial; echo 'no such image' >&2; exit 3");

    let mut output = Vec::new();
    let err = opener
        .open()
        .unwrap()
        .read_to_end(&mut output)
        .unwrap_err();

    assert_eq!(output, b"partial");

    let msg = err.to_string();
    assert!(msg.contains("no such image"), "{msg}");
    assert!(msg.starts_with("'sh -c"), "{msg}");
}

#[test]
fn kill_on_drop() {
    let opener = CommandOpener::new("yes");

    let mut reader = opener.open().unwrap();
    let mut buf = [0; 16];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..2], b"y\n");

    // Must not block forever.
    drop(reader);
}

#[test]
fn reject_empty_image() {
    let err = CommandOpener::docker_save("").unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

    let opener = CommandOpener::docker_save("alpine").unwrap();
    assert_eq!(opener.command_line(), "docker save alpine");
}
