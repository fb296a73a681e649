//! Bare host driver: the "machine" is the host itself.

use tracing::debug;

use crate::exec::{CommandRunner, RunResult, os_args};
use crate::state::State;

use super::{Driver, DriverConfig, DriverError, ENGINE_PORT};

/// Address the bare host is reachable on from itself.
const LOOPBACK: &str = "127.0.0.1";

/// Driver that runs guest commands directly on the host.
///
/// Nothing is created or destroyed, so every lifecycle verb succeeds and the
/// machine is always reported as running. The host's operating system is not
/// owned by this tool, so provisioning is skipped.
#[derive(Clone, Debug)]
pub struct NoneDriver<R: CommandRunner> {
    config: super::BaseSettings,
    runner: R,
}

impl<R: CommandRunner> NoneDriver<R> {
    /// Creates a bare host driver.
    #[must_use]
    pub const fn new(config: super::BaseSettings, runner: R) -> Self {
        Self { config, runner }
    }
}

impl<R: CommandRunner> Driver for NoneDriver<R> {
    fn driver_name(&self) -> &str {
        "none"
    }

    fn machine_name(&self) -> &str {
        &self.config.machine_name
    }

    fn config(&self) -> DriverConfig {
        DriverConfig::None(self.config.clone())
    }

    fn is_container_based(&self) -> bool {
        false
    }

    fn is_iso_based(&self) -> bool {
        false
    }

    fn is_managed(&self) -> bool {
        false
    }

    fn pre_create_check(&self) -> Result<(), DriverError> {
        Ok(())
    }

    fn create(&mut self) -> Result<(), DriverError> {
        debug!(machine = %self.config.machine_name, "none driver has nothing to create");
        Ok(())
    }

    fn start(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn kill(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn remove(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn get_state(&self) -> Result<State, DriverError> {
        Ok(State::Running)
    }

    fn get_url(&self) -> Result<String, DriverError> {
        Ok(format!("tcp://{LOOPBACK}:{ENGINE_PORT}"))
    }

    fn get_ssh_hostname(&self) -> Result<String, DriverError> {
        Err(DriverError::Unsupported {
            driver: String::from("none"),
            operation: String::from("ssh"),
        })
    }

    fn get_ip(&self) -> Result<String, DriverError> {
        Ok(self
            .config
            .ip_address
            .clone()
            .unwrap_or_else(|| LOOPBACK.to_owned()))
    }

    fn run_cmd(&self, command: &str) -> Result<RunResult, DriverError> {
        let result = self.runner.run("sh", &os_args(&["-c", command]))?;
        if result.is_success() {
            Ok(result)
        } else {
            Err(DriverError::guest_command(command, &result))
        }
    }
}
