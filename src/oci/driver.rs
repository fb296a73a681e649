//! Container node driver built on [`Oci`].

use std::net::Ipv4Addr;

use tracing::{info, warn};

use crate::driver::{
    DEFAULT_SSH_PORT, Driver, DriverConfig, DriverError, ENGINE_PORT, OciSettings,
};
use crate::exec::{CommandRunner, RunResult};
use crate::state::State;

use super::{CREATED_BY_LABEL_KEY, FailureKind, Oci, OciBinary, OciError, PROFILE_LABEL_KEY};

const LOOPBACK: &str = "127.0.0.1";

/// Driver that runs the machine as a privileged container.
#[derive(Clone, Debug)]
pub struct OciDriver<R: CommandRunner> {
    settings: OciSettings,
    oci: Oci<R>,
}

impl<R: CommandRunner> OciDriver<R> {
    /// Creates a driver for the container described by `settings`.
    #[must_use]
    pub const fn new(settings: OciSettings, oci: Oci<R>) -> Self {
        Self { settings, oci }
    }

    /// Runtime client used by this driver.
    #[must_use]
    pub const fn oci(&self) -> &Oci<R> {
        &self.oci
    }

    fn name(&self) -> &str {
        &self.settings.base.machine_name
    }

    fn attach_network(&mut self) -> Result<(), DriverError> {
        if self.oci.binary() == OciBinary::Podman {
            info!(machine = self.name(), "podman nodes use the default network");
            return Ok(());
        }
        let network = self.name().to_owned();
        let gateway = self.oci.create_network(&network)?;
        let node_ip = Ipv4Addr::from(u32::from(gateway).saturating_add(1));
        self.settings.network = Some(network);
        self.settings.static_ip = Some(node_ip.to_string());
        Ok(())
    }

    fn run_args(&self) -> Vec<String> {
        let name = self.name();
        let mut args = vec![
            String::from("run"),
            String::from("-d"),
            String::from("-t"),
            String::from("--privileged"),
            String::from("--security-opt"),
            String::from("seccomp=unconfined"),
            String::from("--tmpfs"),
            String::from("/tmp"),
            String::from("--tmpfs"),
            String::from("/run"),
            String::from("-v"),
            String::from("/lib/modules:/lib/modules:ro"),
            format!("--hostname={name}"),
            format!("--name={name}"),
            format!("--label={CREATED_BY_LABEL_KEY}=true"),
            format!("--label={PROFILE_LABEL_KEY}={name}"),
            format!("--cpus={}", self.settings.cpus),
            format!("--memory={}mb", self.settings.memory_mb),
            String::from("-e"),
            format!("container={}", self.oci.binary()),
        ];
        if let (Some(network), Some(ip)) = (&self.settings.network, &self.settings.static_ip) {
            args.push(format!("--network={network}"));
            args.push(format!("--ip={ip}"));
        }
        for port in &self.settings.published_ports {
            args.push(format!("--publish={LOOPBACK}::{port}"));
        }
        args.push(self.settings.image.clone());
        args
    }

    fn refresh_endpoints(&mut self) -> Result<(), DriverError> {
        let name = self.name().to_owned();
        self.settings.base.ssh_port = self.oci.forwarded_port(&name, DEFAULT_SSH_PORT)?;
        let addresses = self.oci.container_addresses(&name)?;
        self.settings.base.ip_address = Some(addresses.ipv4);
        Ok(())
    }
}

impl<R: CommandRunner> Driver for OciDriver<R> {
    fn driver_name(&self) -> &str {
        self.oci.binary().program()
    }

    fn machine_name(&self) -> &str {
        self.name()
    }

    fn config(&self) -> DriverConfig {
        match self.oci.binary() {
            OciBinary::Docker => DriverConfig::Docker(self.settings.clone()),
            OciBinary::Podman => DriverConfig::Podman(self.settings.clone()),
        }
    }

    fn is_container_based(&self) -> bool {
        true
    }

    fn is_iso_based(&self) -> bool {
        false
    }

    fn pre_create_check(&self) -> Result<(), DriverError> {
        let info = self.oci.system_info()?;
        if self.settings.cpus > info.cpus {
            warn!(
                requested = self.settings.cpus,
                available = info.cpus,
                "requested more CPUs than the daemon offers"
            );
        }
        let requested_bytes = self.settings.memory_mb.saturating_mul(1024 * 1024);
        if requested_bytes > info.total_memory {
            warn!(
                requested_mb = self.settings.memory_mb,
                available_bytes = info.total_memory,
                "requested more memory than the daemon offers"
            );
        }
        Ok(())
    }

    fn create(&mut self) -> Result<(), DriverError> {
        if self.oci.container_exists(self.name())? {
            return Err(DriverError::AlreadyExists {
                machine: self.name().to_owned(),
            });
        }
        self.attach_network()?;
        let args = self.run_args();
        let borrowed: Vec<&str> = args.iter().map(String::as_str).collect();
        self.oci.run(&borrowed)?;
        info!(machine = self.name(), image = %self.settings.image, "created container node");
        self.refresh_endpoints()
    }

    fn start(&mut self) -> Result<(), DriverError> {
        let name = self.name().to_owned();
        match self.oci.container_state(&name)? {
            State::Running => {}
            State::None => return Err(DriverError::NotFound { machine: name }),
            State::Paused => {
                self.oci.run(&["unpause", &name])?;
            }
            _ => {
                self.oci.run(&["start", &name])?;
            }
        }
        self.refresh_endpoints()
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        let name = self.name().to_owned();
        match self.oci.container_state(&name)? {
            State::Running | State::Paused => {
                self.oci.run(&["stop", &name])?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn kill(&mut self) -> Result<(), DriverError> {
        let name = self.name().to_owned();
        match self.oci.container_state(&name)? {
            State::Running | State::Paused => {
                self.oci.run(&["kill", &name])?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn remove(&mut self) -> Result<(), DriverError> {
        let name = self.name().to_owned();
        match self.oci.run(&["rm", "-f", "-v", &name]) {
            Ok(_) => {}
            Err(err) if err.kind() == Some(FailureKind::NoSuchContainer) => {}
            Err(err) => return Err(err.into()),
        }
        if let Some(network) = self.settings.network.clone() {
            match self.oci.remove_network(&network) {
                Ok(()) => {}
                Err(OciError::NetworkInUse { .. }) => {
                    warn!(%network, "network still has endpoints, leaving it in place");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn get_state(&self) -> Result<State, DriverError> {
        Ok(self.oci.container_state(self.name())?)
    }

    fn get_url(&self) -> Result<String, DriverError> {
        let port = self.oci.forwarded_port(self.name(), ENGINE_PORT)?;
        Ok(format!("tcp://{LOOPBACK}:{port}"))
    }

    fn get_ssh_hostname(&self) -> Result<String, DriverError> {
        Ok(LOOPBACK.to_owned())
    }

    fn get_ip(&self) -> Result<String, DriverError> {
        Ok(self.oci.container_addresses(self.name())?.ipv4)
    }

    fn run_cmd(&self, command: &str) -> Result<RunResult, DriverError> {
        let result = self
            .oci
            .run_raw(&["exec", "--privileged", self.name(), "/bin/bash", "-c", command])?;
        if result.is_success() {
            Ok(result)
        } else {
            Err(DriverError::guest_command(command, &result))
        }
    }
}
