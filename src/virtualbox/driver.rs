//! `VirtualBox` VM driver.

use std::net::{Ipv4Addr, TcpListener};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::driver::{
    DEFAULT_SSH_PORT, Driver, DriverConfig, DriverError, ENGINE_PORT, VirtualBoxSettings,
};
use crate::exec::{CommandRunner, RunResult};
use crate::ssh::{SshClient, SshTarget};
use crate::state::State;

use super::{VBoxManager, VirtualBoxError, check_version, parse_vm_state};

const LOOPBACK: &str = "127.0.0.1";
const STORAGE_CONTROLLER: &str = "SATA";
const DISK_FILE: &str = "disk.vmdk";
const GUEST_IP_PROPERTY: &str = "/VirtualBox/GuestInfo/Net/0/V4/IP";

/// Driver that runs the machine as a headless `VirtualBox` VM booted from
/// an ISO. Guest ports are reached through NAT forwarding rules on the
/// loopback interface.
#[derive(Clone, Debug)]
pub struct VirtualBoxDriver<R: CommandRunner> {
    settings: VirtualBoxSettings,
    vbm: VBoxManager<R>,
    ssh: SshClient<R>,
}

impl<R: CommandRunner> VirtualBoxDriver<R> {
    /// Creates a driver for the VM described by `settings`.
    #[must_use]
    pub const fn new(settings: VirtualBoxSettings, vbm: VBoxManager<R>, ssh: SshClient<R>) -> Self {
        Self { settings, vbm, ssh }
    }

    fn name(&self) -> &str {
        &self.settings.base.machine_name
    }

    fn reserve_forwarded_ports(&mut self) -> Result<(), VirtualBoxError> {
        if self.settings.base.ssh_port == DEFAULT_SSH_PORT {
            self.settings.base.ssh_port = free_local_port("ssh")?;
        }
        if self.settings.engine_port == 0 {
            self.settings.engine_port = free_local_port("docker")?;
        }
        Ok(())
    }

    fn define_vm(&self) -> Result<(), VirtualBoxError> {
        let name = self.name();
        let store = self.settings.base.store_path.as_str();
        let cpus = self.settings.cpus.to_string();
        let memory = self.settings.memory_mb.to_string();
        self.vbm
            .vbm(&["createvm", "--basefolder", store, "--name", name, "--register"])?;
        self.vbm.vbm(&[
            "modifyvm",
            name,
            "--ostype",
            "Linux26_64",
            "--cpus",
            &cpus,
            "--memory",
            &memory,
            "--acpi",
            "on",
            "--ioapic",
            "on",
            "--rtcuseutc",
            "on",
            "--boot1",
            "dvd",
            "--boot2",
            "disk",
            "--nic1",
            "nat",
            "--nictype1",
            "virtio",
            "--cableconnected1",
            "on",
            "--natdnshostresolver1",
            "on",
        ])?;
        let ssh_rule = format!(
            "ssh,tcp,{LOOPBACK},{},,{DEFAULT_SSH_PORT}",
            self.settings.base.ssh_port
        );
        self.vbm.vbm(&["modifyvm", name, "--natpf1", &ssh_rule])?;
        let engine_rule = format!(
            "docker,tcp,{LOOPBACK},{},,{ENGINE_PORT}",
            self.settings.engine_port
        );
        self.vbm.vbm(&["modifyvm", name, "--natpf1", &engine_rule])
    }

    fn attach_storage(&self) -> Result<(), VirtualBoxError> {
        let name = self.name();
        let disk = self.settings.base.store_path.join(DISK_FILE);
        let size = self.settings.disk_size_mb.to_string();
        self.vbm.vbm(&[
            "storagectl",
            name,
            "--name",
            STORAGE_CONTROLLER,
            "--add",
            "sata",
            "--hostiocache",
            "on",
        ])?;
        self.vbm.vbm(&[
            "storageattach",
            name,
            "--storagectl",
            STORAGE_CONTROLLER,
            "--port",
            "0",
            "--device",
            "0",
            "--type",
            "dvddrive",
            "--medium",
            self.settings.boot_iso.as_str(),
        ])?;
        self.vbm.vbm(&[
            "createmedium",
            "disk",
            "--filename",
            disk.as_str(),
            "--size",
            &size,
            "--format",
            "VMDK",
        ])?;
        self.vbm.vbm(&[
            "storageattach",
            name,
            "--storagectl",
            STORAGE_CONTROLLER,
            "--port",
            "1",
            "--device",
            "0",
            "--type",
            "hdd",
            "--medium",
            disk.as_str(),
        ])
    }

    fn wait_for_shutdown(&self) -> Result<(), DriverError> {
        let interval = Duration::from_millis(self.settings.poll_interval_ms);
        let timeout = Duration::from_secs(self.settings.stop_timeout_secs);
        let started = Instant::now();
        loop {
            thread::sleep(interval);
            let state = self.get_state()?;
            if matches!(state, State::Stopped | State::None) {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(DriverError::Timeout {
                    machine: self.name().to_owned(),
                    action: String::from("stop"),
                });
            }
            debug!(machine = self.name(), %state, "waiting for ACPI shutdown");
        }
    }
}

fn free_local_port(rule: &str) -> Result<u16, VirtualBoxError> {
    let to_error = |err: std::io::Error| VirtualBoxError::PortAllocation {
        rule: rule.to_owned(),
        message: err.to_string(),
    };
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(to_error)?;
    let address = listener.local_addr().map_err(to_error)?;
    Ok(address.port())
}

impl<R: CommandRunner> Driver for VirtualBoxDriver<R> {
    fn driver_name(&self) -> &str {
        "virtualbox"
    }

    fn machine_name(&self) -> &str {
        self.name()
    }

    fn config(&self) -> DriverConfig {
        DriverConfig::VirtualBox(self.settings.clone())
    }

    fn is_container_based(&self) -> bool {
        false
    }

    fn is_iso_based(&self) -> bool {
        true
    }

    fn pre_create_check(&self) -> Result<(), DriverError> {
        let version = self.vbm.version()?;
        check_version(&version)?;
        if !self.settings.boot_iso.is_file() {
            return Err(VirtualBoxError::BootIsoMissing {
                path: self.settings.boot_iso.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn create(&mut self) -> Result<(), DriverError> {
        if !matches!(self.get_state()?, State::None) {
            return Err(DriverError::AlreadyExists {
                machine: self.name().to_owned(),
            });
        }
        self.reserve_forwarded_ports()?;
        self.define_vm()?;
        self.attach_storage()?;
        info!(
            machine = self.name(),
            ssh_port = self.settings.base.ssh_port,
            engine_port = self.settings.engine_port,
            "registered VM"
        );
        self.start()
    }

    fn start(&mut self) -> Result<(), DriverError> {
        let name = self.name().to_owned();
        match self.get_state()? {
            State::Running => {}
            State::None => return Err(DriverError::NotFound { machine: name }),
            State::Paused => self.vbm.vbm(&["controlvm", &name, "resume"])?,
            _ => self.vbm.vbm(&["startvm", &name, "--type", "headless"])?,
        }
        self.settings.base.ip_address = Some(LOOPBACK.to_owned());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        let name = self.name().to_owned();
        match self.get_state()? {
            State::Running | State::Paused => {
                self.vbm.vbm(&["controlvm", &name, "acpipowerbutton"])?;
                self.wait_for_shutdown()
            }
            _ => Ok(()),
        }
    }

    fn kill(&mut self) -> Result<(), DriverError> {
        let name = self.name().to_owned();
        match self.get_state()? {
            State::Running | State::Paused => {
                self.vbm.vbm(&["controlvm", &name, "poweroff"])?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn remove(&mut self) -> Result<(), DriverError> {
        let name = self.name().to_owned();
        match self.get_state()? {
            State::None => return Ok(()),
            State::Running | State::Paused => {
                self.vbm.vbm(&["controlvm", &name, "poweroff"])?;
            }
            _ => {}
        }
        self.vbm.vbm(&["unregistervm", &name, "--delete"])?;
        info!(machine = %name, "removed VM");
        Ok(())
    }

    fn get_state(&self) -> Result<State, DriverError> {
        match self
            .vbm
            .vbm_out(&["showvminfo", self.name(), "--machinereadable"])
        {
            Ok(info) => Ok(parse_vm_state(&info)?),
            Err(err) if err.is_machine_not_found() => Ok(State::None),
            Err(err) => Err(err.into()),
        }
    }

    fn get_url(&self) -> Result<String, DriverError> {
        Ok(format!("tcp://{LOOPBACK}:{}", self.settings.engine_port))
    }

    fn get_ssh_hostname(&self) -> Result<String, DriverError> {
        Ok(LOOPBACK.to_owned())
    }

    fn get_ip(&self) -> Result<String, DriverError> {
        let output = self
            .vbm
            .vbm_out(&["guestproperty", "get", self.name(), GUEST_IP_PROPERTY])?;
        output
            .trim()
            .strip_prefix("Value: ")
            .map(str::to_owned)
            .ok_or_else(|| DriverError::Parse {
                resource: String::from("guest IP"),
                message: format!("unexpected guestproperty output {:?}", output.trim()),
            })
    }

    fn run_cmd(&self, command: &str) -> Result<RunResult, DriverError> {
        let target = SshTarget::for_machine(&self.settings.base, LOOPBACK);
        let result = self.ssh.run(&target, command)?;
        if result.is_success() {
            Ok(result)
        } else {
            Err(DriverError::guest_command(command, &result))
        }
    }
}
