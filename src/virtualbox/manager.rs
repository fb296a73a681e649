//! `VBoxManage` invocation with transient-failure retry.

use tracing::debug;

use crate::exec::{CommandRunner, ExecError, RunResult, os_args};

use super::VirtualBoxError;

/// Executable used to drive `VirtualBox`.
pub const VBOX_MANAGE: &str = "VBoxManage";

/// Total attempts made while `VirtualBox` reports an object as not ready.
pub const MAX_ATTEMPTS: u32 = 5;

/// Minimum supported major version.
const MIN_MAJOR_VERSION: u32 = 5;

/// Thin client over `VBoxManage`.
#[derive(Clone, Debug)]
pub struct VBoxManager<R: CommandRunner> {
    program: String,
    runner: R,
}

impl<R: CommandRunner> VBoxManager<R> {
    /// Creates a manager that invokes `VBoxManage` from `PATH`.
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self::with_program(VBOX_MANAGE, runner)
    }

    /// Creates a manager that invokes `program` instead of `VBoxManage`.
    #[must_use]
    pub fn with_program(program: impl Into<String>, runner: R) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    /// Runs `VBoxManage` and returns stdout and stderr.
    ///
    /// Invocations whose stderr reports an object that is not ready are
    /// repeated, up to [`MAX_ATTEMPTS`] runs in total, without delay.
    ///
    /// # Errors
    ///
    /// Returns [`VirtualBoxError::NotFound`] when `VBoxManage` is missing, or
    /// [`VirtualBoxError::CommandFailure`] carrying the command line and the
    /// last stderr.
    pub fn vbm_out_err(&self, args: &[&str]) -> Result<(String, String), VirtualBoxError> {
        let mut attempt = 1;
        loop {
            let result = self.run_once(args)?;
            if result.is_success() {
                return Ok((result.stdout, result.stderr));
            }
            let failure = VirtualBoxError::command_failure(&result);
            if failure.is_transient() && attempt < MAX_ATTEMPTS {
                debug!(attempt, command = %result.command_line(), "object not ready, retrying");
                attempt += 1;
                continue;
            }
            return Err(failure);
        }
    }

    /// Runs `VBoxManage` and returns stdout.
    ///
    /// # Errors
    ///
    /// See [`VBoxManager::vbm_out_err`].
    pub fn vbm_out(&self, args: &[&str]) -> Result<String, VirtualBoxError> {
        self.vbm_out_err(args).map(|(stdout, _)| stdout)
    }

    /// Runs `VBoxManage`, discarding output.
    ///
    /// # Errors
    ///
    /// See [`VBoxManager::vbm_out_err`].
    pub fn vbm(&self, args: &[&str]) -> Result<(), VirtualBoxError> {
        self.vbm_out_err(args).map(|_| ())
    }

    /// Installed `VirtualBox` version as reported by `--version`.
    ///
    /// # Errors
    ///
    /// See [`VBoxManager::vbm_out_err`].
    pub fn version(&self) -> Result<String, VirtualBoxError> {
        self.vbm_out(&["--version"])
            .map(|stdout| stdout.trim().to_owned())
    }

    fn run_once(&self, args: &[&str]) -> Result<RunResult, VirtualBoxError> {
        self.runner
            .run(&self.program, &os_args(args))
            .map_err(|err| match err {
                ExecError::NotFound { .. } => VirtualBoxError::NotFound,
                other => VirtualBoxError::Exec(other),
            })
    }
}

/// Rejects `VirtualBox` releases older than version 5.
///
/// Only the leading major component is inspected, so build suffixes such
/// as `5.0.8r103449` are accepted.
///
/// # Errors
///
/// Returns [`VirtualBoxError::UnsupportedVersion`] embedding the detected
/// version.
pub fn check_version(version: &str) -> Result<(), VirtualBoxError> {
    let major = version
        .split('.')
        .next()
        .and_then(|part| part.trim().parse::<u32>().ok());
    match major {
        Some(value) if value >= MIN_MAJOR_VERSION => Ok(()),
        _ => Err(VirtualBoxError::UnsupportedVersion {
            version: version.to_owned(),
        }),
    }
}
