use super::*;

fn archive(entries: &[(&str, tar::EntryType, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());

    for (path, entry_type, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(*entry_type);
        header.set_mode(0o644);

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            header.set_size(0);
            builder.append_link(&mut header, path, data).unwrap();
        } else {
            header.set_size(data.len() as u64);
            builder
                .append_data(&mut header, path, data.as_bytes())
                .unwrap();
        }
    }

    builder.into_inner().unwrap()
}

#[test]
fn scan_resumes_after_match() {
    let data = archive(&[
        ("a", tar::EntryType::Regular, "1"),
        ("b", tar::EntryType::Regular, "22"),
        ("c", tar::EntryType::Regular, "333"),
        ("b", tar::EntryType::Regular, "4444"),
    ]);

    let mut archive = tar::Archive::new(&data[..]);
    let mut entries = archive.entries().unwrap();

    // Skip `a` without reading it.
    let (info, mut entry) = scan(&mut entries, |i| i.name == "b").unwrap().unwrap();
    assert_eq!(info.size, 2);

    let mut content = String::new();
    entry.read_to_string(&mut content).unwrap();
    assert_eq!(content, "22");

    // Second `b`, skipping `c` unread.
    let (info, mut entry) = scan(&mut entries, |i| i.name == "b").unwrap().unwrap();
    assert_eq!(info.size, 4);

    content.clear();
    entry.read_to_string(&mut content).unwrap();
    assert_eq!(content, "4444");

    assert!(scan(&mut entries, |_| true).unwrap().is_none());
}

#[test]
fn entry_kinds() {
    let data = archive(&[
        ("dir/", tar::EntryType::Directory, ""),
        ("dir/file", tar::EntryType::Regular, "x"),
        ("dir/sym", tar::EntryType::Symlink, "file"),
        ("dir/hard", tar::EntryType::Link, "dir/file"),
        ("fifo", tar::EntryType::Fifo, ""),
    ]);

    let mut archive = tar::Archive::new(&data[..]);
    let infos: Vec<_> = archive
        .entries()
        .unwrap()
        .map(|e| EntryInfo::from_entry(&e.unwrap()))
        .collect();

    let kinds: Vec<_> = infos.iter().map(|i| i.kind).collect();
    assert_eq!(
        kinds,
        [
            EntryKind::Directory,
            EntryKind::RegularFile,
            EntryKind::Symlink,
            EntryKind::Hardlink,
            EntryKind::Other,
        ]
    );

    assert_eq!(infos[1].link_target, "");
    assert_eq!(infos[2].link_target, "file");
    assert_eq!(infos[3].link_target, "dir/file");

    assert!(infos[2].is_file_at("dir/sym"));
    assert!(!infos[0].is_file_at("dir/"));
    assert!(!infos[4].is_file_at("fifo"));
}

#[test]
fn detect_gzip_stream() {
    use std::io::Write;

    let data = archive(&[("f", tar::EntryType::Regular, "gz")]);

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), Default::default());
    encoder.write_all(&data).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut output = Vec::new();
    decompressed(&compressed[..])
        .unwrap()
        .read_to_end(&mut output)
        .unwrap();

    assert_eq!(output, data);
}

#[test]
fn short_streams_are_kept() {
    let mut output = Vec::new();
    decompressed(&b"ab"[..])
        .unwrap()
        .read_to_end(&mut output)
        .unwrap();

    assert_eq!(output, b"ab");
}

#[test]
fn end_marker_is_not_eof() {
    let data = archive(&[("a", tar::EntryType::Regular, "1")]);

    let (mut archive, end) = open(&data[..]).unwrap();
    let mut entries = archive.entries().unwrap();

    assert!(scan(&mut entries, |_| false).unwrap().is_none());
    assert!(end.check().is_ok());
}

#[test]
fn detect_missing_end_marker() {
    let data = archive(&[("a", tar::EntryType::Regular, "1")]);

    // Header and content of `a`, without the zero blocks.
    let (mut archive, end) = open(&data[..1024]).unwrap();
    let mut entries = archive.entries().unwrap();

    assert!(scan(&mut entries, |_| false).unwrap().is_none());
    assert_eq!(end.check().unwrap_err().kind(), io::ErrorKind::UnexpectedEof);

    // Empty streams have no marker either.
    let (mut archive, end) = open(&b""[..]).unwrap();
    assert!(scan(&mut archive.entries().unwrap(), |_| true).unwrap().is_none());
    assert!(end.check().is_err());
}
