//! Driver capability contract shared by every machine backend.
//!
//! Each backend (container node, `VirtualBox` VM, bare host) implements
//! [`Driver`]. The reconciler and CLI work with [`MachineDriver`], a closed
//! enum that dispatches to the concrete variant, including a placeholder for
//! drivers that are not available on the current platform.

mod config;
mod none;
mod not_supported;

use thiserror::Error;

use crate::exec::{CommandRunner, ExecError, RunResult};
use crate::oci::{OciDriver, OciError};
use crate::state::State;
use crate::virtualbox::{VirtualBoxDriver, VirtualBoxError};

pub use config::{
    API_SERVER_PORT, BaseSettings, DEFAULT_SSH_PORT, DriverConfig, ENGINE_PORT, OciSettings,
    VirtualBoxSettings,
};
pub use none::NoneDriver;
pub use not_supported::NotSupportedDriver;

/// Errors surfaced by driver operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// The driver cannot run on this platform.
    #[error("Driver \"{driver}\" not supported on this platform.")]
    NotSupported {
        /// Registry name of the driver.
        driver: String,
    },
    /// `create` was called for a machine that already exists.
    #[error("machine {machine} already exists")]
    AlreadyExists {
        /// Machine name.
        machine: String,
    },
    /// The backend has no machine with this name.
    #[error("machine {machine} does not exist")]
    NotFound {
        /// Machine name.
        machine: String,
    },
    /// The operation has no meaning for this driver.
    #[error("the {driver} driver does not support {operation}")]
    Unsupported {
        /// Registry name of the driver.
        driver: String,
        /// Operation that was requested.
        operation: String,
    },
    /// Container runtime failure.
    #[error(transparent)]
    Oci(#[from] OciError),
    /// Hypervisor failure.
    #[error(transparent)]
    VirtualBox(#[from] VirtualBoxError),
    /// A command could not be executed.
    #[error(transparent)]
    Exec(#[from] ExecError),
    /// A command inside the guest exited unsuccessfully.
    #[error("guest command `{command}` exited with status {status_text}: {stderr}")]
    GuestCommand {
        /// Command line run inside the guest.
        command: String,
        /// Exit status as reported by the transport.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// The machine did not reach the expected state in time.
    #[error("timed out waiting for {machine} to {action}")]
    Timeout {
        /// Machine name.
        machine: String,
        /// Transition that was awaited.
        action: String,
    },
    /// Backend output could not be understood.
    #[error("failed to parse {resource}: {message}")]
    Parse {
        /// What was being parsed.
        resource: String,
        /// Parser error message.
        message: String,
    },
}

impl DriverError {
    /// Builds a [`DriverError::GuestCommand`] from a failed guest invocation.
    #[must_use]
    pub fn guest_command(command: &str, result: &RunResult) -> Self {
        Self::GuestCommand {
            command: command.to_owned(),
            status: result.code,
            status_text: result.status_text(),
            stderr: result.stderr.trim().to_owned(),
        }
    }

    /// Returns `true` for failures that may succeed when retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Oci(err) => err.is_transient(),
            Self::VirtualBox(err) => err.is_transient(),
            Self::Exec(err) => err.is_transient(),
            Self::Timeout { .. } => true,
            Self::NotSupported { .. }
            | Self::AlreadyExists { .. }
            | Self::NotFound { .. }
            | Self::Unsupported { .. }
            | Self::GuestCommand { .. }
            | Self::Parse { .. } => false,
        }
    }
}

/// Capability contract implemented by every machine backend.
///
/// Lifecycle verbs are idempotent for their target state: starting a running
/// machine, stopping a stopped one, or removing an absent one succeeds.
/// `create` is the exception and fails with [`DriverError::AlreadyExists`].
pub trait Driver {
    /// Registry name of the driver (for example `docker`).
    fn driver_name(&self) -> &str;

    /// Name of the machine this driver instance is bound to.
    fn machine_name(&self) -> &str;

    /// Snapshot of the driver's persisted configuration.
    fn config(&self) -> DriverConfig;

    /// Whether the machine is a container rather than a VM.
    fn is_container_based(&self) -> bool;

    /// Whether the machine boots from an ISO image.
    fn is_iso_based(&self) -> bool;

    /// Whether the tool owns the machine's operating system.
    fn is_managed(&self) -> bool {
        true
    }

    /// Validates that the backend can create a machine.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when prerequisites are missing.
    fn pre_create_check(&self) -> Result<(), DriverError>;

    /// Creates and boots the machine.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::AlreadyExists`] when the machine exists, or the
    /// backend failure.
    fn create(&mut self) -> Result<(), DriverError>;

    /// Starts a stopped machine.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the backend fails.
    fn start(&mut self) -> Result<(), DriverError>;

    /// Stops the machine gracefully.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the backend fails.
    fn stop(&mut self) -> Result<(), DriverError>;

    /// Stops then starts the machine.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] from either step.
    fn restart(&mut self) -> Result<(), DriverError> {
        self.stop()?;
        self.start()
    }

    /// Forcefully stops the machine.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the backend fails.
    fn kill(&mut self) -> Result<(), DriverError>;

    /// Deletes the machine and its backend resources.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the backend fails.
    fn remove(&mut self) -> Result<(), DriverError>;

    /// Queries the current machine state.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the state cannot be determined.
    fn get_state(&self) -> Result<State, DriverError>;

    /// URL of the container engine inside the machine.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the address cannot be determined.
    fn get_url(&self) -> Result<String, DriverError>;

    /// Host name used for SSH sessions.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the address cannot be determined.
    fn get_ssh_hostname(&self) -> Result<String, DriverError>;

    /// IP address of the machine as seen from the host.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the address cannot be determined.
    fn get_ip(&self) -> Result<String, DriverError>;

    /// Runs a shell command inside the machine.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::GuestCommand`] when the command exits
    /// unsuccessfully, or the transport failure.
    fn run_cmd(&self, command: &str) -> Result<RunResult, DriverError>;
}

/// Queries a driver's state, folding query failures into [`State::Error`].
///
/// The error is returned alongside so callers can report why the state is
/// unknown.
#[must_use]
pub fn observed_state<D: Driver + ?Sized>(driver: &D) -> (State, Option<DriverError>) {
    match driver.get_state() {
        Ok(state) => (state, None),
        Err(err) => (State::Error, Some(err)),
    }
}

/// Closed set of drivers known to this tool.
#[derive(Debug)]
pub enum MachineDriver<R: CommandRunner> {
    /// Container node managed through docker or podman.
    Oci(OciDriver<R>),
    /// `VirtualBox` VM.
    VirtualBox(VirtualBoxDriver<R>),
    /// Bare host driver.
    None(NoneDriver<R>),
    /// Placeholder for drivers unavailable on this platform.
    NotSupported(NotSupportedDriver),
}

macro_rules! dispatch {
    ($self:ident, $driver:ident => $body:expr) => {
        match $self {
            MachineDriver::Oci($driver) => $body,
            MachineDriver::VirtualBox($driver) => $body,
            MachineDriver::None($driver) => $body,
            MachineDriver::NotSupported($driver) => $body,
        }
    };
}

impl<R: CommandRunner> Driver for MachineDriver<R> {
    fn driver_name(&self) -> &str {
        dispatch!(self, driver => driver.driver_name())
    }

    fn machine_name(&self) -> &str {
        dispatch!(self, driver => driver.machine_name())
    }

    fn config(&self) -> DriverConfig {
        dispatch!(self, driver => driver.config())
    }

    fn is_container_based(&self) -> bool {
        dispatch!(self, driver => driver.is_container_based())
    }

    fn is_iso_based(&self) -> bool {
        dispatch!(self, driver => driver.is_iso_based())
    }

    fn is_managed(&self) -> bool {
        dispatch!(self, driver => driver.is_managed())
    }

    fn pre_create_check(&self) -> Result<(), DriverError> {
        dispatch!(self, driver => driver.pre_create_check())
    }

    fn create(&mut self) -> Result<(), DriverError> {
        dispatch!(self, driver => driver.create())
    }

    fn start(&mut self) -> Result<(), DriverError> {
        dispatch!(self, driver => driver.start())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        dispatch!(self, driver => driver.stop())
    }

    fn restart(&mut self) -> Result<(), DriverError> {
        dispatch!(self, driver => driver.restart())
    }

    fn kill(&mut self) -> Result<(), DriverError> {
        dispatch!(self, driver => driver.kill())
    }

    fn remove(&mut self) -> Result<(), DriverError> {
        dispatch!(self, driver => driver.remove())
    }

    fn get_state(&self) -> Result<State, DriverError> {
        dispatch!(self, driver => driver.get_state())
    }

    fn get_url(&self) -> Result<String, DriverError> {
        dispatch!(self, driver => driver.get_url())
    }

    fn get_ssh_hostname(&self) -> Result<String, DriverError> {
        dispatch!(self, driver => driver.get_ssh_hostname())
    }

    fn get_ip(&self) -> Result<String, DriverError> {
        dispatch!(self, driver => driver.get_ip())
    }

    fn run_cmd(&self, command: &str) -> Result<RunResult, DriverError> {
        dispatch!(self, driver => driver.run_cmd(command))
    }
}
