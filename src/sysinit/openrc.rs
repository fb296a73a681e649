//! OpenRC service control.
//!
//! OpenRC cannot read systemd units, so services are run through a shim: a
//! restart wrapper re-executes the unit's `ExecStart=` line in a loop, and a
//! generated `/etc/init.d` script supervises the wrapper with
//! `start-stop-daemon`. The unit file stays the single description of how a
//! service is launched.

use tracing::info;

use crate::driver::{Driver, DriverError};

use super::{GuestFile, InitSystem};

/// Guest path of the restart wrapper shared by every shimmed service.
pub const OPENRC_RESTART_WRAPPER_PATH: &str = "/var/lib/minihost/openrc-restart-wrapper.sh";

const START_TIMEOUT_SECS: u32 = 5;

const RESTART_WRAPPER: &str = r#"#!/bin/bash
# Wrapper script to emulate systemd restart on non-systemd systems
readonly UNIT_PATH=$1

while true; do
  if [[ -f "${UNIT_PATH}" ]]; then
    eval $(egrep "^ExecStart=" "${UNIT_PATH}" | cut -d"=" -f2-)
  fi
  sleep 1
done
"#;

/// Service manager for OpenRC guests.
#[derive(Debug)]
pub struct OpenRc<'a, D: Driver + ?Sized> {
    driver: &'a D,
}

impl<'a, D: Driver + ?Sized> OpenRc<'a, D> {
    /// Controls services on the guest behind `driver`.
    #[must_use]
    pub const fn new(driver: &'a D) -> Self {
        Self { driver }
    }

    fn service(&self, service: &str, verb: &str) -> Result<(), DriverError> {
        let result = self
            .driver
            .run_cmd(&format!("sudo service {service} {verb}"))?;
        info!(service, verb, output = %result.output().trim(), "openrc service command");
        Ok(())
    }
}

fn init_script(service: &str, unit_path: &str) -> String {
    format!(
        r#"#!/bin/bash
# OpenRC init script shim for systemd units
readonly NAME="{service}"
readonly RESTART_WRAPPER="{OPENRC_RESTART_WRAPPER_PATH}"
readonly UNIT_PATH="{unit_path}"
readonly PID_PATH="/var/run/${{NAME}}.pid"

function start() {{
    start-stop-daemon --oknodo --pidfile "${{PID_PATH}}" --background --start --make-pid --exec "${{RESTART_WRAPPER}}" "${{UNIT_PATH}}"
}}

function stop() {{
    if [[ -f "${{PID_PATH}}" ]]; then
        pkill -P "$(cat ${{PID_PATH}})"
    fi
    start-stop-daemon --oknodo --pidfile "${{PID_PATH}}" --stop
}}

case "$1" in
    start)
        start
        ;;
    stop)
        stop
        ;;
    restart)
        stop
        start
        ;;
    status)
        start-stop-daemon --pidfile "${{PID_PATH}}" --status
        ;;
    *)
        echo "Usage: {service} {{start|stop|restart|status}}"
        exit 1
        ;;
esac
"#
    )
}

impl<D: Driver + ?Sized> InitSystem for OpenRc<'_, D> {
    fn name(&self) -> &'static str {
        "OpenRC"
    }

    fn active(&self, service: &str) -> bool {
        self.driver
            .run_cmd(&format!("sudo service {service} status"))
            .is_ok()
    }

    fn start(&self, service: &str) -> Result<(), DriverError> {
        if self.active(service) {
            return Ok(());
        }
        let result = self.driver.run_cmd(&format!(
            "sudo timeout {START_TIMEOUT_SECS} service {service} start"
        ))?;
        info!(service, output = %result.output().trim(), "openrc start");
        Ok(())
    }

    fn restart(&self, service: &str) -> Result<(), DriverError> {
        self.service(service, "restart")
    }

    fn stop(&self, service: &str) -> Result<(), DriverError> {
        self.service(service, "stop")
    }

    fn force_stop(&self, service: &str) -> Result<(), DriverError> {
        self.stop(service)
    }

    fn enable(&self, _service: &str) -> Result<(), DriverError> {
        Ok(())
    }

    fn disable(&self, _service: &str) -> Result<(), DriverError> {
        Ok(())
    }

    fn generate_init_shim(&self, service: &str, _binary: &str, unit_path: &str) -> Vec<GuestFile> {
        vec![
            GuestFile::new(OPENRC_RESTART_WRAPPER_PATH, RESTART_WRAPPER, "0755"),
            GuestFile::new(
                format!("/etc/init.d/{service}"),
                init_script(service, unit_path),
                "0755",
            ),
        ]
    }
}
