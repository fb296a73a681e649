//! Guest service control across init systems.
//!
//! Provisioning talks to guest services through [`InitSystem`] so it does
//! not need to know whether the guest runs systemd or OpenRC.
//! [`InitManager::detect`] probes the guest and picks the matching variant.

mod openrc;
mod systemd;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

use crate::driver::{Driver, DriverError};

pub use openrc::{OPENRC_RESTART_WRAPPER_PATH, OpenRc};
pub use systemd::Systemd;

/// Errors raised while controlling guest services.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SysInitError {
    /// Neither systemd nor OpenRC answered its version probe.
    #[error("no supported init system found on {machine}: expected systemd or OpenRC")]
    Undetected {
        /// Machine that was probed.
        machine: String,
    },
    /// A guest command failed.
    #[error(transparent)]
    Guest(#[from] DriverError),
}

/// File to be written into the guest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GuestFile {
    /// Absolute destination path inside the guest.
    pub path: String,
    /// File contents.
    pub contents: Vec<u8>,
    /// Octal permission string, such as `0755`.
    pub permissions: String,
}

impl GuestFile {
    /// Creates a guest file description.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        contents: impl Into<Vec<u8>>,
        permissions: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            permissions: permissions.into(),
        }
    }

    /// Shell command that writes this file with `sudo`, creating the parent
    /// directory. Contents travel base64 encoded so arbitrary bytes survive
    /// the guest shell.
    #[must_use]
    pub fn install_command(&self) -> String {
        let parent = self
            .path
            .rsplit_once('/')
            .map_or("/", |(dir, _)| if dir.is_empty() { "/" } else { dir });
        let encoded = STANDARD.encode(&self.contents);
        let path = escape(self.path.as_str().into());
        format!(
            "sudo mkdir -p {dir} && printf %s {encoded} | base64 -d | sudo tee {path} >/dev/null && sudo chmod {mode} {path}",
            dir = escape(parent.into()),
            mode = escape(self.permissions.as_str().into()),
        )
    }
}

/// Writes `file` into the guest behind `driver`.
///
/// # Errors
///
/// Returns [`DriverError`] when the guest command fails.
pub fn write_guest_file<D: Driver + ?Sized>(driver: &D, file: &GuestFile) -> Result<(), DriverError> {
    debug!(machine = driver.machine_name(), path = %file.path, "writing guest file");
    driver.run_cmd(&file.install_command()).map(|_| ())
}

/// Uniform service verbs for a guest init system.
pub trait InitSystem {
    /// Name of the init system.
    fn name(&self) -> &'static str;

    /// Whether `service` is running.
    fn active(&self, service: &str) -> bool;

    /// Starts `service`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the guest command fails.
    fn start(&self, service: &str) -> Result<(), DriverError>;

    /// Restarts `service`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the guest command fails.
    fn restart(&self, service: &str) -> Result<(), DriverError>;

    /// Stops `service`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the guest command fails.
    fn stop(&self, service: &str) -> Result<(), DriverError>;

    /// Stops `service` without waiting for a graceful shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the guest command fails.
    fn force_stop(&self, service: &str) -> Result<(), DriverError>;

    /// Enables `service` at boot.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the guest command fails.
    fn enable(&self, service: &str) -> Result<(), DriverError>;

    /// Disables `service` at boot.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the guest command fails.
    fn disable(&self, service: &str) -> Result<(), DriverError>;

    /// Extra files the init system needs to run `binary` from the
    /// systemd-style unit at `unit_path`.
    fn generate_init_shim(&self, service: &str, binary: &str, unit_path: &str) -> Vec<GuestFile>;
}

/// Init system detected on a guest.
#[derive(Debug)]
pub enum InitManager<'a, D: Driver + ?Sized> {
    /// systemd guest.
    Systemd(Systemd<'a, D>),
    /// OpenRC guest.
    OpenRc(OpenRc<'a, D>),
}

impl<'a, D: Driver + ?Sized> InitManager<'a, D> {
    /// Probes `systemctl --version`, then `openrc --version`; the first that
    /// succeeds wins.
    ///
    /// # Errors
    ///
    /// Returns [`SysInitError::Undetected`] when neither probe succeeds.
    pub fn detect(driver: &'a D) -> Result<Self, SysInitError> {
        if driver.run_cmd("systemctl --version").is_ok() {
            return Ok(Self::Systemd(Systemd::new(driver)));
        }
        if driver.run_cmd("openrc --version").is_ok() {
            return Ok(Self::OpenRc(OpenRc::new(driver)));
        }
        Err(SysInitError::Undetected {
            machine: driver.machine_name().to_owned(),
        })
    }
}

macro_rules! delegate {
    ($self:ident, $init:ident => $body:expr) => {
        match $self {
            InitManager::Systemd($init) => $body,
            InitManager::OpenRc($init) => $body,
        }
    };
}

impl<D: Driver + ?Sized> InitSystem for InitManager<'_, D> {
    fn name(&self) -> &'static str {
        delegate!(self, init => init.name())
    }

    fn active(&self, service: &str) -> bool {
        delegate!(self, init => init.active(service))
    }

    fn start(&self, service: &str) -> Result<(), DriverError> {
        delegate!(self, init => init.start(service))
    }

    fn restart(&self, service: &str) -> Result<(), DriverError> {
        delegate!(self, init => init.restart(service))
    }

    fn stop(&self, service: &str) -> Result<(), DriverError> {
        delegate!(self, init => init.stop(service))
    }

    fn force_stop(&self, service: &str) -> Result<(), DriverError> {
        delegate!(self, init => init.force_stop(service))
    }

    fn enable(&self, service: &str) -> Result<(), DriverError> {
        delegate!(self, init => init.enable(service))
    }

    fn disable(&self, service: &str) -> Result<(), DriverError> {
        delegate!(self, init => init.disable(service))
    }

    fn generate_init_shim(&self, service: &str, binary: &str, unit_path: &str) -> Vec<GuestFile> {
        delegate!(self, init => init.generate_init_shim(service, binary, unit_path))
    }
}

#[cfg(test)]
mod tests;
