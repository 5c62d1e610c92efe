use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{CommandError, SysfsError};

const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Access to integer pseudo-files and small helper commands
///
/// Every call blocks until the kernel or the child process answers.
pub trait SysfsIo {
    fn read_int(&self, path: &Path) -> Result<i64, SysfsError>;

    fn write_int(&self, path: &Path, value: i64) -> Result<(), SysfsError>;

    /// Run `command` through `sh -c` and return its stdout
    fn run_command(&self, command: &str) -> Result<String, CommandError>;
}

/// The real filesystem and process table
pub struct LinuxSysfs {
    command_timeout: Duration,
}

impl LinuxSysfs {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }
}

impl SysfsIo for LinuxSysfs {
    fn read_int(&self, path: &Path) -> Result<i64, SysfsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SysfsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        parse_int(path, &content)
    }

    fn write_int(&self, path: &Path, value: i64) -> Result<(), SysfsError> {
        // never create: a missing attribute means the path is wrong
        std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)
            .and_then(|mut file| std::io::Write::write_all(&mut file, value.to_string().as_bytes()))
            .map_err(|source| SysfsError::Write {
                path: path.to_path_buf(),
                source,
            })
    }

    fn run_command(&self, command: &str) -> Result<String, CommandError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|source| CommandError::Launch {
                command: command.to_string(),
                source,
            })?;

        // Drain the pipes off-thread so a chatty child cannot block on a full pipe
        let (tx, rx) = mpsc::channel();
        if let Some(pipe) = child.stdout.take() {
            drain(Stream::Stdout, pipe, tx.clone());
        }
        if let Some(pipe) = child.stderr.take() {
            drain(Stream::Stderr, pipe, tx.clone());
        }
        drop(tx);

        let deadline = Instant::now() + self.command_timeout;
        let timed_out = || CommandError::Timeout {
            command: command.to_string(),
            timeout: self.command_timeout,
        };

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    kill_group(&mut child);
                    return Err(timed_out());
                }
                Ok(None) => thread::sleep(COMMAND_POLL_INTERVAL),
                Err(source) => {
                    kill_group(&mut child);
                    return Err(CommandError::Launch {
                        command: command.to_string(),
                        source,
                    });
                }
            }
        };

        // Background children of `sh` can keep the pipes open past its exit
        let mut stdout = String::new();
        let mut stderr = String::new();
        loop {
            match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok((Stream::Stdout, text)) => stdout = text,
                Ok((Stream::Stderr, text)) => stderr = text,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    kill_group(&mut child);
                    return Err(timed_out());
                }
            }
        }

        if !status.success() {
            return Err(CommandError::Status {
                command: command.to_string(),
                status,
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(stdout)
    }
}

enum Stream {
    Stdout,
    Stderr,
}

fn drain<R: Read + Send + 'static>(stream: Stream, mut pipe: R, tx: mpsc::Sender<(Stream, String)>) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send((stream, String::from_utf8_lossy(&buf).into_owned()));
    });
}

/// Kill the child and everything it started
fn kill_group(child: &mut Child) {
    // the child leads its own process group, see `process_group(0)`
    let pgid = child.id() as libc::pid_t;
    unsafe { libc::kill(-pgid, libc::SIGKILL) };
    let _ = child.kill();
    let _ = child.wait();
}

pub fn parse_int(path: &Path, content: &str) -> Result<i64, SysfsError> {
    content.trim().parse().map_err(|_| SysfsError::Parse {
        path: path.to_path_buf(),
        content: content.trim().to_string(),
    })
}

/// In-memory stand-in for sysfs, shared by the unit tests
#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use super::SysfsIo;
    use crate::error::{CommandError, SysfsError};

    #[derive(Default)]
    pub struct MemorySysfs {
        files: RefCell<HashMap<PathBuf, i64>>,
        broken: RefCell<HashSet<PathBuf>>,
        outputs: RefCell<HashMap<String, String>>,
        pub writes: RefCell<Vec<(PathBuf, i64)>>,
        pub commands: RefCell<Vec<String>>,
    }

    impl MemorySysfs {
        pub fn set(&self, path: impl Into<PathBuf>, value: i64) {
            let path = path.into();
            self.broken.borrow_mut().remove(&path);
            self.files.borrow_mut().insert(path, value);
        }

        pub fn get(&self, path: impl AsRef<Path>) -> Option<i64> {
            self.files.borrow().get(path.as_ref()).copied()
        }

        /// Make every access to `path` fail until it is `set` again
        pub fn break_file(&self, path: impl Into<PathBuf>) {
            self.broken.borrow_mut().insert(path.into());
        }

        pub fn set_output(&self, command: &str, output: &str) {
            self.outputs
                .borrow_mut()
                .insert(command.to_string(), output.to_string());
        }

        pub fn take_writes(&self) -> Vec<(PathBuf, i64)> {
            std::mem::take(&mut *self.writes.borrow_mut())
        }

        fn missing(path: &Path) -> std::io::Error {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )
        }
    }

    impl SysfsIo for MemorySysfs {
        fn read_int(&self, path: &Path) -> Result<i64, SysfsError> {
            if self.broken.borrow().contains(path) {
                return Err(SysfsError::Read {
                    path: path.to_path_buf(),
                    source: Self::missing(path),
                });
            }
            self.get(path).ok_or_else(|| SysfsError::Read {
                path: path.to_path_buf(),
                source: Self::missing(path),
            })
        }

        fn write_int(&self, path: &Path, value: i64) -> Result<(), SysfsError> {
            if self.broken.borrow().contains(path) {
                return Err(SysfsError::Write {
                    path: path.to_path_buf(),
                    source: Self::missing(path),
                });
            }
            self.files.borrow_mut().insert(path.to_path_buf(), value);
            self.writes.borrow_mut().push((path.to_path_buf(), value));
            Ok(())
        }

        fn run_command(&self, command: &str) -> Result<String, CommandError> {
            self.commands.borrow_mut().push(command.to_string());
            self.outputs
                .borrow()
                .get(command)
                .cloned()
                .ok_or_else(|| CommandError::Timeout {
                    command: command.to_string(),
                    timeout: Duration::ZERO,
                })
        }
    }
}
