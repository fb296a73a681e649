//! Container runtime adapter for docker and podman.
//!
//! [`Oci`] wraps the runtime CLI. Failed invocations are classified exactly
//! once, in [`classify_failure`], and surface as typed [`OciError`] variants
//! so callers never match on raw output.

mod driver;
mod info;
mod inspect;
mod network;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exec::{CommandRunner, ExecError, RunResult, os_args};

pub use driver::OciDriver;
pub use info::{SysInfo, parse_system_info};
pub use inspect::ContainerAddresses;
pub use network::{
    DEFAULT_SUBNET, HostPlatform, MAX_SUBNET_PERTURBATIONS, NetworkInfo, Subnet,
};

/// Label key marking resources created by this tool.
pub const CREATED_BY_LABEL_KEY: &str = "created_by.minihost";

/// Label key recording the profile a container belongs to.
pub const PROFILE_LABEL_KEY: &str = "name.minihost";

/// Container runtime CLI in use.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OciBinary {
    /// The `docker` CLI.
    Docker,
    /// The `podman` CLI.
    Podman,
}

impl OciBinary {
    /// Executable name of the runtime CLI.
    #[must_use]
    pub const fn program(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

impl fmt::Display for OciBinary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Recognised causes of a failed runtime invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// The requested subnet overlaps an existing network.
    SubnetTaken,
    /// The requested gateway address is already allocated.
    GatewayTaken,
    /// The named network does not exist.
    NoSuchNetwork,
    /// The network still has containers attached.
    ActiveEndpoints,
    /// The named container does not exist.
    NoSuchContainer,
    /// Nothing recognisable in the output.
    Unrecognized,
}

/// Classifies the combined output of a failed runtime invocation.
#[must_use]
pub fn classify_failure(output: &str) -> FailureKind {
    if output.contains("Pool overlaps with other one on this address space") {
        FailureKind::SubnetTaken
    } else if output.contains("failed to allocate gateway")
        && output.contains("Address already in use")
    {
        FailureKind::GatewayTaken
    } else if output.contains("No such network") || output.contains("network not found") {
        FailureKind::NoSuchNetwork
    } else if output.contains("has active endpoints") {
        FailureKind::ActiveEndpoints
    } else if output.contains("No such container") || output.contains("no such container") {
        FailureKind::NoSuchContainer
    } else {
        FailureKind::Unrecognized
    }
}

/// Errors returned by the container runtime adapter.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OciError {
    /// The runtime CLI is not installed.
    #[error("{binary} is not installed or not on PATH")]
    NotInstalled {
        /// Runtime that was requested.
        binary: String,
    },
    /// The subnet overlaps an existing network.
    #[error("subnet {subnet} is already in use")]
    SubnetTaken {
        /// Subnet in CIDR notation.
        subnet: String,
    },
    /// The gateway address is already allocated.
    #[error("gateway {gateway} is already in use")]
    GatewayTaken {
        /// Gateway address.
        gateway: String,
    },
    /// The network does not exist.
    #[error("network {network} not found")]
    NetworkNotFound {
        /// Network name.
        network: String,
    },
    /// The network still has containers attached.
    #[error("network {network} is in use by active endpoints")]
    NetworkInUse {
        /// Network name.
        network: String,
    },
    /// The container does not exist.
    #[error("container {container} not found")]
    ContainerNotFound {
        /// Container name.
        container: String,
    },
    /// Every candidate subnet collided with an existing network.
    #[error("no free subnet for network {network} after {attempts} attempts")]
    NoFreeSubnet {
        /// Network name.
        network: String,
        /// Number of subnet perturbations tried.
        attempts: u8,
    },
    /// The runtime exited unsuccessfully.
    #[error("{command} exited with status {status_text}: {output}")]
    CommandFailure {
        /// Command line that failed.
        command: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Combined stdout and stderr.
        output: String,
        /// Classification of the output.
        kind: FailureKind,
    },
    /// Runtime output could not be parsed.
    #[error("failed to parse {resource}: {message}")]
    Parse {
        /// What was being parsed.
        resource: String,
        /// Parser error message.
        message: String,
    },
    /// The runtime does not implement the operation.
    #[error("{binary} does not support {operation}")]
    Unsupported {
        /// Runtime in use.
        binary: String,
        /// Operation that was requested.
        operation: String,
    },
    /// The runtime could not be executed.
    #[error(transparent)]
    Exec(ExecError),
}

impl OciError {
    /// Returns `true` for failures that may succeed when retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::SubnetTaken { .. } | Self::GatewayTaken { .. } => true,
            Self::Exec(err) => err.is_transient(),
            _ => false,
        }
    }

    const fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::CommandFailure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    fn command_failure(result: &RunResult) -> Self {
        let output = result.output();
        Self::CommandFailure {
            command: result.command_line(),
            status_text: result.status_text(),
            kind: classify_failure(&output),
            output: output.trim().to_owned(),
        }
    }

    fn parse(resource: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            resource: resource.to_owned(),
            message: message.into(),
        }
    }
}

/// Thin client over the docker or podman CLI.
#[derive(Clone, Debug)]
pub struct Oci<R: CommandRunner> {
    binary: OciBinary,
    runner: R,
}

impl<R: CommandRunner> Oci<R> {
    /// Creates a client for `binary` that executes through `runner`.
    #[must_use]
    pub const fn new(binary: OciBinary, runner: R) -> Self {
        Self { binary, runner }
    }

    /// Runtime CLI this client drives.
    #[must_use]
    pub const fn binary(&self) -> OciBinary {
        self.binary
    }

    /// Runs the runtime and returns its output regardless of exit status.
    ///
    /// # Errors
    ///
    /// Returns [`OciError::NotInstalled`] when the CLI is missing, or
    /// [`OciError::Exec`] when it cannot be executed.
    pub fn run_raw(&self, args: &[&str]) -> Result<RunResult, OciError> {
        self.runner
            .run(self.binary.program(), &os_args(args))
            .map_err(|err| match err {
                ExecError::NotFound { .. } => OciError::NotInstalled {
                    binary: self.binary.program().to_owned(),
                },
                other => OciError::Exec(other),
            })
    }

    /// Runs the runtime and fails on a non-zero exit status.
    ///
    /// # Errors
    ///
    /// Returns [`OciError::CommandFailure`] carrying the classified output,
    /// or the errors of [`Oci::run_raw`].
    pub fn run(&self, args: &[&str]) -> Result<RunResult, OciError> {
        let result = self.run_raw(args)?;
        if result.is_success() {
            Ok(result)
        } else {
            Err(OciError::command_failure(&result))
        }
    }
}

#[cfg(test)]
mod tests;
