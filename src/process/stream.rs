//! Streaming children for long-running commands.
//!
//! Output is pumped by reader threads into a channel so callers can wait for
//! it with a bound (`recv_timeout`) instead of blocking on the pipe.

use std::ffi::OsStr;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};

use super::ProcessError;

/// Terminal geometry reported to pty children. Wide enough that progress
/// lines from git/gclient are not wrapped.
const PTY_SIZE: PtySize = PtySize {
    rows: 50,
    cols: 200,
    pixel_width: 0,
    pixel_height: 0,
};

/// How a streaming child's output is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Pseudo-terminal. Tools that only print live progress to a terminal
    /// (git, gclient) need this.
    Pty,
    /// Plain stdout/stderr pipes, merged.
    Pipes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Chunk(Vec<u8>),
    /// Nothing arrived within the timeout.
    Quiet,
    /// Every output stream has closed.
    Closed,
}

/// A running child whose output can be inspected without blocking forever.
pub trait OutputSource {
    /// Wait at most `timeout` for the next chunk of output.
    fn poll_output(&mut self, timeout: Duration) -> OutputEvent;

    /// Exit code if the child has exited. Never blocks.
    fn try_exit_code(&mut self) -> Result<Option<i32>, ProcessError>;

    /// Terminate the child and reap it.
    fn kill(&mut self) -> Result<(), ProcessError>;
}

struct ChunkStream {
    rx: Receiver<Vec<u8>>,
}

impl ChunkStream {
    fn poll(&self, timeout: Duration) -> OutputEvent {
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => OutputEvent::Chunk(chunk),
            Err(RecvTimeoutError::Timeout) => OutputEvent::Quiet,
            Err(RecvTimeoutError::Disconnected) => OutputEvent::Closed,
        }
    }
}

fn pump<R: Read + Send + 'static>(mut reader: R, tx: Sender<Vec<u8>>) {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                // A pty master reports EIO once the slave side is gone.
                Err(_) => break,
            }
        }
    });
}

struct PipedChild {
    command: String,
    child: Child,
    stream: ChunkStream,
}

pub(super) fn spawn_piped(
    mut cmd: Command,
    command_line: &str,
) -> Result<Box<dyn OutputSource>, ProcessError> {
    let cwd = cmd
        .get_current_dir()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            command: command_line.to_string(),
            cwd,
            source,
        })?;

    let (tx, rx) = mpsc::channel();
    if let Some(stdout) = child.stdout.take() {
        pump(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        pump(stderr, tx.clone());
    }
    drop(tx);

    Ok(Box::new(PipedChild {
        command: command_line.to_string(),
        child,
        stream: ChunkStream { rx },
    }))
}

impl OutputSource for PipedChild {
    fn poll_output(&mut self, timeout: Duration) -> OutputEvent {
        self.stream.poll(timeout)
    }

    fn try_exit_code(&mut self) -> Result<Option<i32>, ProcessError> {
        let status = self.child.try_wait().map_err(|source| ProcessError::Wait {
            command: self.command.clone(),
            source,
        })?;
        Ok(status.map(|status| status.code().unwrap_or(-1)))
    }

    fn kill(&mut self) -> Result<(), ProcessError> {
        match self.child.kill() {
            Ok(()) => {}
            // Already exited.
            Err(err) if err.kind() == ErrorKind::InvalidInput => {}
            Err(source) => {
                return Err(ProcessError::Wait {
                    command: self.command.clone(),
                    source,
                })
            }
        }
        let _ = self.child.wait();
        Ok(())
    }
}

struct PtyChild {
    command: String,
    child: Box<dyn portable_pty::Child + Send + Sync>,
    // Dropping the master hangs up the child; keep it for the child's lifetime.
    _master: Box<dyn MasterPty + Send>,
    stream: ChunkStream,
}

pub(super) fn spawn_pty(
    command_line: &str,
    cwd: &Path,
    search_path: &OsStr,
) -> Result<Box<dyn OutputSource>, ProcessError> {
    let pty_error = |err: anyhow::Error| ProcessError::Pty {
        command: command_line.to_string(),
        message: format!("{err:#}"),
    };

    let pair = native_pty_system().openpty(PTY_SIZE).map_err(pty_error)?;

    let mut builder = CommandBuilder::new("sh");
    builder.arg("-c");
    builder.arg(command_line);
    builder.cwd(cwd);
    builder.env("PATH", search_path);

    let child = pair.slave.spawn_command(builder).map_err(pty_error)?;
    drop(pair.slave);

    let reader = pair.master.try_clone_reader().map_err(pty_error)?;
    let (tx, rx) = mpsc::channel();
    pump(reader, tx);

    Ok(Box::new(PtyChild {
        command: command_line.to_string(),
        child,
        _master: pair.master,
        stream: ChunkStream { rx },
    }))
}

/// Same convention as pipes: `-1` for a child ended by a signal.
fn pty_exit_code(status: &portable_pty::ExitStatus) -> i32 {
    if status.signal().is_some() {
        -1
    } else {
        status.exit_code() as i32
    }
}

impl OutputSource for PtyChild {
    fn poll_output(&mut self, timeout: Duration) -> OutputEvent {
        self.stream.poll(timeout)
    }

    fn try_exit_code(&mut self) -> Result<Option<i32>, ProcessError> {
        let status = self.child.try_wait().map_err(|source| ProcessError::Wait {
            command: self.command.clone(),
            source,
        })?;
        Ok(status.map(|status| pty_exit_code(&status)))
    }

    fn kill(&mut self) -> Result<(), ProcessError> {
        if let Err(source) = self.child.kill() {
            if self.try_exit_code()?.is_none() {
                return Err(ProcessError::Wait {
                    command: self.command.clone(),
                    source,
                });
            }
        }
        let _ = self.child.wait();
        Ok(())
    }
}
