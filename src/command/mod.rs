#[cfg(all(test, unix))]
mod tests;

use std::{
    ffi::{OsStr, OsString},
    io::{self, BufReader, Read},
    process::{Child, ChildStdout, Command, Stdio},
    thread::{self, JoinHandle},
};

use crate::Opener;

/// [`Opener`] that runs a command, and reads the archive from its
/// standard output.
///
/// The command is executed again on every call to `open`.
///
/// If the command exits with an error, the stream fails when its end is
/// reached, and the error includes the standard error of the command.
/// If the stream is dropped before its end, the process is killed.
#[derive(Clone, Debug)]
pub struct CommandOpener {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandOpener {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        CommandOpener {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Opener for `docker save <image>`.
    pub fn docker_save(image: &str) -> io::Result<Self> {
        if image.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Missing image to save.",
            ));
        }

        Ok(CommandOpener::new("docker").arg("save").arg(image))
    }

    fn command_line(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }

        line
    }
}

impl Opener for CommandOpener {
    type Reader = CommandReader;

    fn open(&self) -> io::Result<CommandReader> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Pipes are always present when `Stdio::piped` is used.
        let (stdout, mut stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io::Error::other("Missing pipes for the child process."));
            }
        };

        // Read stderr in a thread, so the child is never blocked by
        // a full pipe while we consume stdout.
        let stderr = thread::spawn(move || {
            let mut output = Vec::new();
            let _ = stderr.read_to_end(&mut output);
            output
        });

        Ok(CommandReader {
            command: self.command_line(),
            child,
            stdout: BufReader::new(stdout),
            stderr: Some(stderr),
            finished: false,
        })
    }
}

/// Stream with the standard output of a process launched by
/// [`CommandOpener`].
pub struct CommandReader {
    command: String,
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    finished: bool,
}

impl CommandReader {
    /// Wait for the process, and return an error if its exit status is
    /// not successful.
    fn check_status(&mut self) -> io::Result<()> {
        let status = self.child.wait()?;

        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            return Ok(());
        }

        Err(io::Error::other(format!(
            "'{}' failed ({status}): {}",
            self.command,
            String::from_utf8_lossy(&stderr).trim(),
        )))
    }
}

impl Read for CommandReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished {
            return Ok(0);
        }

        let n = self.stdout.read(buf)?;

        if n == 0 && !buf.is_empty() {
            self.finished = true;
            self.check_status()?;
        }

        Ok(n)
    }
}

impl Drop for CommandReader {
    fn drop(&mut self) {
        // The thread reading stderr is detached. It ends when the pipe
        // is closed.
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
