//! Guest provisioning: engine unit, engine options and TLS material.
//!
//! The reconciler drives provisioning through [`Provisioner`]. The stock
//! implementation, [`GuestProvisioner`], works over any [`Driver`] by running
//! shell commands in the guest.

mod guest;
mod os_release;
mod unit;

use thiserror::Error;

use crate::driver::{Driver, DriverError};
use crate::host::Host;
use crate::sysinit::SysInitError;

pub use guest::{ENGINE_SERVICE, ENGINE_UNIT_PATH, GuestProvisioner, REQUIRED_GUEST_DIRS};
pub use os_release::{OsRelease, parse_os_release};
pub use unit::render_engine_unit;

/// Errors raised while provisioning a guest.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// Swarm hosts are not provisioned by this tool.
    #[error("swarm mode is not supported; disable swarm options for {machine}")]
    SwarmUnsupported {
        /// Machine name.
        machine: String,
    },
    /// `/etc/os-release` could not be understood.
    #[error("failed to parse /etc/os-release: {message}")]
    OsRelease {
        /// Parser error message.
        message: String,
    },
    /// A local certificate or key is missing.
    #[error("TLS material {path} is missing: place the CA, server certificate and key under the store's certs directory")]
    MissingCertificate {
        /// Expected local path.
        path: String,
    },
    /// A local file could not be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: String,
        /// I/O error message.
        message: String,
    },
    /// The guest init system could not be used.
    #[error(transparent)]
    InitSystem(#[from] SysInitError),
    /// A guest command failed.
    #[error(transparent)]
    Guest(#[from] DriverError),
}

impl ProvisionError {
    /// Returns `true` for failures that may clear once the guest settles.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Guest(_) | Self::InitSystem(SysInitError::Guest(_))
        )
    }
}

/// Reports the container engine version running in a guest.
pub trait EngineVersioner {
    /// Engine version string.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the guest cannot be queried.
    fn engine_version<D: Driver + ?Sized>(&self, driver: &D) -> Result<String, DriverError>;
}

/// Queries the engine through the `docker` CLI inside the guest.
#[derive(Clone, Copy, Debug, Default)]
pub struct DockerCliVersion;

impl EngineVersioner for DockerCliVersion {
    fn engine_version<D: Driver + ?Sized>(&self, driver: &D) -> Result<String, DriverError> {
        driver
            .run_cmd("docker version --format {{.Server.Version}}")
            .map(|result| result.stdout.trim().to_owned())
    }
}

/// Steps the reconciler delegates to a provisioner.
pub trait Provisioner {
    /// Installs and restarts the container engine with the host's options.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when a guest step fails.
    fn provision<D: Driver + Sync + ?Sized>(&self, driver: &D, host: &Host)
    -> Result<(), ProvisionError>;

    /// Backend-specific fix-ups after the machine has started.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when a guest step fails.
    fn post_start_setup<D: Driver + Sync + ?Sized>(
        &self,
        driver: &D,
        host: &Host,
    ) -> Result<(), ProvisionError>;

    /// Installs TLS material so clients can authenticate to the engine.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when material is missing or cannot be
    /// copied.
    fn configure_auth<D: Driver + Sync + ?Sized>(
        &self,
        driver: &D,
        host: &Host,
    ) -> Result<(), ProvisionError>;
}

#[cfg(test)]
mod tests;
