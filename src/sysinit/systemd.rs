//! systemd service control.

use crate::driver::{Driver, DriverError};

use super::{GuestFile, InitSystem};

/// Service manager for systemd guests.
#[derive(Debug)]
pub struct Systemd<'a, D: Driver + ?Sized> {
    driver: &'a D,
}

impl<'a, D: Driver + ?Sized> Systemd<'a, D> {
    /// Controls services on the guest behind `driver`.
    #[must_use]
    pub const fn new(driver: &'a D) -> Self {
        Self { driver }
    }

    fn systemctl(&self, args: &str) -> Result<(), DriverError> {
        self.driver
            .run_cmd(&format!("sudo systemctl {args}"))
            .map(|_| ())
    }

    fn reload(&self) -> Result<(), DriverError> {
        self.systemctl("daemon-reload")
    }
}

impl<D: Driver + ?Sized> InitSystem for Systemd<'_, D> {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn active(&self, service: &str) -> bool {
        self.systemctl(&format!("is-active --quiet service {service}"))
            .is_ok()
    }

    fn start(&self, service: &str) -> Result<(), DriverError> {
        self.reload()?;
        self.systemctl(&format!("start {service}"))
    }

    fn restart(&self, service: &str) -> Result<(), DriverError> {
        self.reload()?;
        self.systemctl(&format!("restart {service}"))
    }

    fn stop(&self, service: &str) -> Result<(), DriverError> {
        self.systemctl(&format!("stop {service}"))
    }

    fn force_stop(&self, service: &str) -> Result<(), DriverError> {
        self.systemctl(&format!("stop -f {service}"))
    }

    fn enable(&self, service: &str) -> Result<(), DriverError> {
        self.systemctl(&format!("enable {service}"))
    }

    fn disable(&self, service: &str) -> Result<(), DriverError> {
        self.systemctl(&format!("disable {service}"))
    }

    fn generate_init_shim(&self, _service: &str, _binary: &str, _unit_path: &str) -> Vec<GuestFile> {
        Vec::new()
    }
}
