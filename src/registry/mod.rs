//! Driver registry: maps persisted driver configuration to live drivers.
//!
//! Drivers unavailable on the current platform are still constructible; they
//! come back as [`NotSupportedDriver`] so callers never special-case them.

use tracing::debug;

use crate::driver::{
    Driver, DriverConfig, MachineDriver, NoneDriver, NotSupportedDriver, OciSettings,
};
use crate::exec::CommandRunner;
use crate::oci::{HostPlatform, Oci, OciBinary, OciDriver};
use crate::ssh::{SshClient, SshConfig};
use crate::virtualbox::{VBoxManager, VirtualBoxDriver};

/// Every driver name the registry knows.
pub const DRIVER_NAMES: [&str; 4] = ["docker", "podman", "virtualbox", "none"];

/// Builds drivers from persisted configuration.
pub trait DriverFactory {
    /// Driver type produced by this factory.
    type Driver: Driver;

    /// Builds a driver bound to the machine described by `config`.
    fn build(&self, config: &DriverConfig) -> Self::Driver;
}

/// Registry of the built-in drivers.
#[derive(Clone, Debug)]
pub struct DriverRegistry<R: CommandRunner + Clone> {
    runner: R,
    ssh: SshConfig,
    platform: HostPlatform,
}

impl<R: CommandRunner + Clone> DriverRegistry<R> {
    /// Registry for the platform this process runs on.
    #[must_use]
    pub const fn new(runner: R, ssh: SshConfig) -> Self {
        Self::for_platform(runner, ssh, HostPlatform::current())
    }

    /// Registry that decides availability as if running on `platform`.
    #[must_use]
    pub const fn for_platform(runner: R, ssh: SshConfig, platform: HostPlatform) -> Self {
        Self {
            runner,
            ssh,
            platform,
        }
    }

    /// Whether `driver` can run on this platform.
    #[must_use]
    pub fn is_supported(&self, driver: &str) -> bool {
        match driver {
            "docker" | "virtualbox" => true,
            "podman" | "none" => self.platform == HostPlatform::Linux,
            _ => false,
        }
    }

    /// Names of the drivers available on this platform.
    #[must_use]
    pub fn supported(&self) -> Vec<&'static str> {
        DRIVER_NAMES
            .into_iter()
            .filter(|name| self.is_supported(name))
            .collect()
    }

    fn oci(&self, binary: OciBinary, settings: &OciSettings) -> MachineDriver<R> {
        MachineDriver::Oci(OciDriver::new(
            settings.clone(),
            Oci::new(binary, self.runner.clone()),
        ))
    }
}

impl<R: CommandRunner + Clone> DriverFactory for DriverRegistry<R> {
    type Driver = MachineDriver<R>;

    fn build(&self, config: &DriverConfig) -> MachineDriver<R> {
        if !self.is_supported(config.driver_name()) {
            debug!(driver = config.driver_name(), platform = ?self.platform, "driver not supported here");
            return MachineDriver::NotSupported(NotSupportedDriver::new(config.clone()));
        }
        match config {
            DriverConfig::Docker(settings) => self.oci(OciBinary::Docker, settings),
            DriverConfig::Podman(settings) => self.oci(OciBinary::Podman, settings),
            DriverConfig::VirtualBox(settings) => MachineDriver::VirtualBox(VirtualBoxDriver::new(
                settings.clone(),
                VBoxManager::new(self.runner.clone()),
                SshClient::new(self.ssh.clone(), self.runner.clone()),
            )),
            DriverConfig::None(settings) => {
                MachineDriver::None(NoneDriver::new(settings.clone(), self.runner.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests;
