//! Placeholder driver for backends unavailable on this platform.

use crate::exec::RunResult;
use crate::state::State;

use super::{Driver, DriverConfig, DriverError};

/// Driver returned when a persisted record names a driver this platform
/// cannot run. Every verb fails with [`DriverError::NotSupported`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NotSupportedDriver {
    config: DriverConfig,
}

impl NotSupportedDriver {
    /// Wraps the persisted configuration so it survives a save.
    #[must_use]
    pub const fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    fn unsupported(&self) -> DriverError {
        DriverError::NotSupported {
            driver: self.config.driver_name().to_owned(),
        }
    }
}

impl Driver for NotSupportedDriver {
    fn driver_name(&self) -> &str {
        self.config.driver_name()
    }

    fn machine_name(&self) -> &str {
        &self.config.base().machine_name
    }

    fn config(&self) -> DriverConfig {
        self.config.clone()
    }

    fn is_container_based(&self) -> bool {
        false
    }

    fn is_iso_based(&self) -> bool {
        false
    }

    fn pre_create_check(&self) -> Result<(), DriverError> {
        Err(self.unsupported())
    }

    fn create(&mut self) -> Result<(), DriverError> {
        Err(self.unsupported())
    }

    fn start(&mut self) -> Result<(), DriverError> {
        Err(self.unsupported())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        Err(self.unsupported())
    }

    fn restart(&mut self) -> Result<(), DriverError> {
        Err(self.unsupported())
    }

    fn kill(&mut self) -> Result<(), DriverError> {
        Err(self.unsupported())
    }

    fn remove(&mut self) -> Result<(), DriverError> {
        Err(self.unsupported())
    }

    fn get_state(&self) -> Result<State, DriverError> {
        Err(self.unsupported())
    }

    fn get_url(&self) -> Result<String, DriverError> {
        Err(self.unsupported())
    }

    fn get_ssh_hostname(&self) -> Result<String, DriverError> {
        Err(self.unsupported())
    }

    fn get_ip(&self) -> Result<String, DriverError> {
        Err(self.unsupported())
    }

    fn run_cmd(&self, _command: &str) -> Result<RunResult, DriverError> {
        Err(self.unsupported())
    }
}
