//! Command execution primitive shared by every backend adapter.
//!
//! All external tools (`docker`, `podman`, `VBoxManage`, `ssh`) are invoked
//! through [`CommandRunner`], so adapters can be exercised against scripted
//! fakes without spawning processes.

use std::ffi::OsString;
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Immutable capture of one external command invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunResult {
    /// Program that was executed.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl RunResult {
    /// Builds a result for `program` with the supplied arguments and output.
    #[must_use]
    pub fn new(
        program: impl Into<String>,
        args: Vec<OsString>,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Renders the invocation as a space separated command line.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns stdout followed by stderr, matching what a terminal would show.
    #[must_use]
    pub fn output(&self) -> String {
        let mut combined = String::with_capacity(self.stdout.len() + self.stderr.len());
        combined.push_str(&self.stdout);
        combined.push_str(&self.stderr);
        combined
    }

    /// Human readable representation of the exit status.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |value| value.to_string())
    }
}

/// Errors raised before a command produced an exit status.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// The executable could not be located on `PATH`.
    #[error("executable {program} was not found")]
    NotFound {
        /// Program that was requested.
        program: String,
    },
    /// The process could not be started for another reason.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// The process exceeded its deadline and was killed.
    #[error("{command} timed out after {seconds}s")]
    Timeout {
        /// Command line that timed out.
        command: String,
        /// Timeout that was exceeded, in whole seconds.
        seconds: u64,
    },
}

impl ExecError {
    /// Returns `true` for failures that may succeed when retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// A non-zero exit status is not an error at this layer; callers inspect
    /// [`RunResult::is_success`] and classify the output themselves.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when the command cannot be started or exceeds
    /// the runner's timeout.
    fn run(&self, program: &str, args: &[OsString]) -> Result<RunResult, ExecError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, program: &str, args: &[OsString]) -> Result<RunResult, ExecError> {
        (**self).run(program, args)
    }
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner {
    timeout: Option<Duration>,
}

impl ProcessCommandRunner {
    /// Creates a runner that waits indefinitely for each command.
    #[must_use]
    pub const fn new() -> Self {
        Self { timeout: None }
    }

    /// Creates a runner that kills commands running longer than `timeout`.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    fn spawn(program: &str, args: &[OsString]) -> Result<Child, ExecError> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => ExecError::NotFound {
                    program: program.to_owned(),
                },
                _ => spawn_error(program, &err),
            })
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<RunResult, ExecError> {
        let mut child = Self::spawn(program, args)?;
        debug!(program, args = ?args, "running command");

        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        let status = match self.timeout {
            None => child.wait().map_err(|err| spawn_error(program, &err))?,
            Some(limit) => match wait_with_deadline(&mut child, limit) {
                Ok(status) => status,
                Err(WaitError::Io(err)) => return Err(spawn_error(program, &err)),
                Err(WaitError::Expired) => {
                    return Err(ExecError::Timeout {
                        command: RunResult::new(program, args.to_vec(), None, "", "")
                            .command_line(),
                        seconds: limit.as_secs(),
                    });
                }
            },
        };

        Ok(RunResult {
            program: program.to_owned(),
            args: args.to_vec(),
            code: status.code(),
            stdout: stdout_reader.join().unwrap_or_default(),
            stderr: stderr_reader.join().unwrap_or_default(),
        })
    }
}

enum WaitError {
    Io(io::Error),
    Expired,
}

fn spawn_error(program: &str, err: &io::Error) -> ExecError {
    ExecError::Spawn {
        program: program.to_owned(),
        message: err.to_string(),
    }
}

fn wait_with_deadline(child: &mut Child, limit: Duration) -> Result<ExitStatus, WaitError> {
    let deadline = Instant::now() + limit;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                child.kill().map_err(WaitError::Io)?;
                child.wait().map_err(WaitError::Io)?;
                return Err(WaitError::Expired);
            }
            Ok(None) => thread::sleep(WAIT_POLL_INTERVAL),
            Err(err) => return Err(WaitError::Io(err)),
        }
    }
}

fn drain<S: Read + Send + 'static>(stream: Option<S>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut source) = stream {
            source.read_to_end(&mut buffer).ok();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

/// Converts string arguments into the owned form accepted by runners.
#[must_use]
pub fn os_args<S: AsRef<str>>(args: &[S]) -> Vec<OsString> {
    args.iter().map(|arg| OsString::from(arg.as_ref())).collect()
}
