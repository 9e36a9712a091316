use crate::error::PtyError;
use crate::matcher::{Match, Matcher, Pattern};
use portable_pty::{Child, CommandBuilder, ExitStatus, MasterPty, PtySize};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::debug;

/// How long a graceful close waits for the child to exit on its own.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// End-of-transmission, read by the child's line discipline as end of input.
const EOT: &[u8] = b"\x04";

/// How a child is attached to its PTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Value of `TERM` in the child's environment.
    pub term: String,
    pub rows: u16,
    pub cols: u16,
    /// Whether the PTY echoes input back as output.
    pub echo: bool,
    /// Working directory of the child. `None` uses our current directory.
    pub cwd: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            // A terminal without colour support keeps output free of escape codes.
            term: "dumb".to_string(),
            rows: 24,
            cols: 80,
            echo: false,
            cwd: None,
        }
    }
}

/// Result of waiting for a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Matched(Match),
    /// The deadline passed first. `before` is the unconsumed output.
    Timeout { before: Vec<u8> },
    /// The child closed its output before a text pattern matched.
    EndOfStream { before: Vec<u8> },
}

/// Exit information of a reaped child.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitOutcome {
    /// `None` when the process was terminated by a signal.
    pub exit_status: Option<i32>,
    pub signal: Option<String>,
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        match status.signal() {
            Some(signal) => ExitOutcome {
                exit_status: None,
                signal: Some(signal.to_string()),
            },
            None => ExitOutcome {
                exit_status: Some(status.exit_code() as i32),
                signal: None,
            },
        }
    }
}

/// Manages a program running inside a PTY.
///
/// The child is killed and reaped when the session is dropped, so every exit
/// path releases the descriptor and the process.
pub struct PtySession {
    _master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    output_rx: UnboundedReceiver<Vec<u8>>,
    matcher: Matcher,
    eof: bool,
}

impl PtySession {
    /// Spawn `argv` in a fresh PTY.
    ///
    /// Echo is switched off before the child starts, when requested, so the
    /// child never sees an echoing terminal.
    pub fn spawn(argv: &[String], options: &SessionOptions) -> Result<Self, PtyError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| PtyError::Spawn("empty command line".to_string()))?;

        let pty_system = portable_pty::native_pty_system();
        let pty_size = PtySize {
            rows: options.rows,
            cols: options.cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pair = pty_system
            .openpty(pty_size)
            .map_err(|e| PtyError::Open(format!("{e:#}")))?;

        set_echo(pair.master.as_ref(), options.echo)?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.env("TERM", &options.term);
        // Without an explicit directory the child would start in $HOME.
        let cwd = match &options.cwd {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()
                .map_err(|e| PtyError::Spawn(format!("no working directory: {e}")))?,
        };
        cmd.cwd(cwd);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(format!("{e:#}")))?;
        // The child holds its own copies; ours would keep the stream from ever closing.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Open(format!("{e:#}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Open(format!("{e:#}")))?;

        debug!(pid = ?child.process_id(), "spawned {}", argv.join(" "));

        Ok(PtySession {
            _master: pair.master,
            child,
            writer,
            output_rx: crate::pty_reader::spawn_reader(reader),
            matcher: Matcher::new(),
            eof: false,
        })
    }

    /// Write raw bytes to the program's stdin.
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        self.writer
            .write_all(data)
            .and_then(|()| self.writer.flush())
            .map_err(|e| PtyError::Write(e.to_string()))
    }

    /// Write `line` followed by a newline.
    pub fn send_line(&mut self, line: &str) -> Result<(), PtyError> {
        let mut data = line.as_bytes().to_vec();
        data.push(b'\n');
        self.write(&data)
    }

    /// Signal end of input to the program.
    pub fn send_eof(&mut self) -> Result<(), PtyError> {
        self.write(EOT)
    }

    /// Wait until `pattern` is seen in the output or `timeout` elapses.
    ///
    /// Output already buffered is searched before waiting, so a match that
    /// completed before the child died is still reported as a match.
    pub async fn read_until(&mut self, pattern: &Pattern, timeout: Duration) -> ReadOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = self.matcher.find(pattern) {
                return ReadOutcome::Matched(found);
            }
            if self.eof {
                let before = self.matcher.take_all();
                return if pattern.is_end_of_output() {
                    ReadOutcome::Matched(Match {
                        before,
                        matched: Vec::new(),
                    })
                } else {
                    ReadOutcome::EndOfStream { before }
                };
            }
            match timeout_at(deadline, self.output_rx.recv()).await {
                Ok(Some(data)) => self.matcher.feed(&data),
                Ok(None) => self.eof = true,
                Err(_) => {
                    return ReadOutcome::Timeout {
                        before: self.matcher.pending().to_vec(),
                    };
                }
            }
        }
    }

    /// Next raw chunk of output, bypassing the match buffer. `None` once the
    /// child has closed its side of the PTY.
    pub async fn next_output(&mut self) -> Option<Vec<u8>> {
        if self.eof {
            return None;
        }
        let data = self.output_rx.recv().await;
        if data.is_none() {
            self.eof = true;
        }
        data
    }

    /// Check if the child process is still running
    pub fn is_running(&mut self) -> bool {
        self.child.try_wait().ok().flatten().is_none()
    }

    /// Terminate and reap the child.
    ///
    /// A graceful close gives the child a short grace period to exit by
    /// itself before killing it; a forced close kills it right away.
    pub async fn close(mut self, force: bool) -> Result<ExitOutcome, PtyError> {
        if !force {
            let deadline = Instant::now() + CLOSE_GRACE;
            loop {
                if let Some(status) = self.try_wait()? {
                    return Ok(status.into());
                }
                if Instant::now() >= deadline {
                    debug!("process still running after grace period");
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
        }
        self.terminate().map(ExitOutcome::from)
    }

    fn try_wait(&mut self) -> Result<Option<ExitStatus>, PtyError> {
        self.child
            .try_wait()
            .map_err(|e| PtyError::Wait(e.to_string()))
    }

    fn terminate(&mut self) -> Result<ExitStatus, PtyError> {
        if let Some(status) = self.try_wait()? {
            return Ok(status);
        }
        if let Err(e) = self.child.kill() {
            debug!("failed to kill process: {e}");
        }
        self.child
            .wait()
            .map_err(|e| PtyError::Wait(e.to_string()))
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.terminate();
        }
    }
}

#[cfg(unix)]
fn set_echo(master: &(dyn MasterPty + Send), enabled: bool) -> Result<(), PtyError> {
    let fd = master
        .as_raw_fd()
        .ok_or_else(|| PtyError::Open("PTY has no file descriptor".to_string()))?;

    let mut termios = std::mem::MaybeUninit::<libc::termios>::uninit();
    // SAFETY: `fd` is the open PTY master and `termios` points to writable memory.
    if unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) } != 0 {
        return Err(PtyError::Open(std::io::Error::last_os_error().to_string()));
    }
    // SAFETY: tcgetattr succeeded and filled in the struct.
    let mut termios = unsafe { termios.assume_init() };
    if enabled {
        termios.c_lflag |= libc::ECHO;
    } else {
        termios.c_lflag &= !libc::ECHO;
    }
    // SAFETY: same descriptor, fully initialised struct.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } != 0 {
        return Err(PtyError::Open(std::io::Error::last_os_error().to_string()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_echo(_master: &(dyn MasterPty + Send), _enabled: bool) -> Result<(), PtyError> {
    Ok(())
}
