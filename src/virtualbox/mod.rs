//! `VirtualBox` adapter: `VBoxManage` client, version gate, and VM driver.

mod driver;
mod manager;

use thiserror::Error;

use crate::exec::{ExecError, RunResult};
use crate::state::State;

pub use driver::VirtualBoxDriver;
pub use manager::{MAX_ATTEMPTS, VBOX_MANAGE, VBoxManager, check_version};

/// Recognised causes of a failed `VBoxManage` invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// A VM object is momentarily locked; retrying usually succeeds.
    ObjectNotReady,
    /// No registered VM has the requested name.
    MachineNotFound,
    /// Nothing recognisable in stderr.
    Unrecognized,
}

/// Classifies the stderr of a failed `VBoxManage` invocation.
#[must_use]
pub fn classify_stderr(stderr: &str) -> FailureKind {
    if stderr.contains("error: The object is not ready") {
        FailureKind::ObjectNotReady
    } else if stderr.contains("Could not find a registered machine") {
        FailureKind::MachineNotFound
    } else {
        FailureKind::Unrecognized
    }
}

/// Errors returned by the `VirtualBox` adapter.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VirtualBoxError {
    /// `VBoxManage` is not installed.
    #[error("VBoxManage not found. Make sure VirtualBox is installed and VBoxManage is in the path")]
    NotFound,
    /// The installed `VirtualBox` is too old.
    #[error(
        "we support Virtualbox starting with version 5. Your VirtualBox install is \"{version}\". Please upgrade at https://www.virtualbox.org"
    )]
    UnsupportedVersion {
        /// Version string reported by `VBoxManage --version`.
        version: String,
    },
    /// `VBoxManage` exited unsuccessfully.
    #[error("{command} failed:\n{stderr}")]
    CommandFailure {
        /// Full command line.
        command: String,
        /// Stderr of the last attempt.
        stderr: String,
        /// Classification of stderr.
        kind: FailureKind,
    },
    /// The configured boot ISO does not exist.
    #[error("boot ISO {path} does not exist")]
    BootIsoMissing {
        /// Configured ISO path.
        path: String,
    },
    /// No free local port could be reserved for a forwarding rule.
    #[error("failed to reserve a local port for {rule}: {message}")]
    PortAllocation {
        /// Forwarding rule name.
        rule: String,
        /// I/O error message.
        message: String,
    },
    /// `VBoxManage` output could not be parsed.
    #[error("failed to parse {resource}: {message}")]
    Parse {
        /// What was being parsed.
        resource: String,
        /// Parser error message.
        message: String,
    },
    /// `VBoxManage` could not be executed.
    #[error(transparent)]
    Exec(ExecError),
}

impl VirtualBoxError {
    /// Returns `true` for failures that may succeed when retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::CommandFailure { kind, .. } => matches!(kind, FailureKind::ObjectNotReady),
            Self::Exec(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` when the named VM is not registered.
    #[must_use]
    pub const fn is_machine_not_found(&self) -> bool {
        matches!(
            self,
            Self::CommandFailure {
                kind: FailureKind::MachineNotFound,
                ..
            }
        )
    }

    fn command_failure(result: &RunResult) -> Self {
        Self::CommandFailure {
            command: result.command_line(),
            stderr: result.stderr.clone(),
            kind: classify_stderr(&result.stderr),
        }
    }
}

/// Extracts the machine state from `showvminfo --machinereadable` output.
///
/// # Errors
///
/// Returns [`VirtualBoxError::Parse`], carrying the output, when no `VMState`
/// line is present.
pub fn parse_vm_state(info: &str) -> Result<State, VirtualBoxError> {
    let value = info
        .lines()
        .find_map(|line| line.trim().strip_prefix("VMState="))
        .map(|raw| raw.trim_matches('"'))
        .ok_or_else(|| VirtualBoxError::Parse {
            resource: String::from("VMState"),
            message: format!("showvminfo output has no VMState line: {:?}", info.trim()),
        })?;
    Ok(match value {
        "running" => State::Running,
        "paused" => State::Paused,
        "saved" => State::Saved,
        "poweroff" | "aborted" => State::Stopped,
        _ => State::None,
    })
}

#[cfg(test)]
mod tests;
