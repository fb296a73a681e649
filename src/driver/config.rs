//! Serialisable driver settings persisted inside the host record.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Default SSH port inside guests.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Port the container engine listens on inside guests.
pub const ENGINE_PORT: u16 = 2376;

/// Port the Kubernetes API server listens on inside guests.
pub const API_SERVER_PORT: u16 = 8443;

/// Settings common to every driver.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BaseSettings {
    /// Machine name, shared with the profile name.
    pub machine_name: String,
    /// Directory holding per-machine state.
    pub store_path: Utf8PathBuf,
    /// User for SSH sessions into the guest.
    pub ssh_user: String,
    /// Host-side port that reaches the guest's SSH daemon.
    pub ssh_port: u16,
    /// Private key used to authenticate SSH sessions.
    pub ssh_key_path: Option<Utf8PathBuf>,
    /// Last IP address learned for the machine.
    pub ip_address: Option<String>,
}

impl BaseSettings {
    /// Creates settings for `machine_name` stored under `store_path`.
    #[must_use]
    pub fn new(machine_name: impl Into<String>, store_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            machine_name: machine_name.into(),
            store_path: store_path.into(),
            ssh_user: String::from("docker"),
            ssh_port: DEFAULT_SSH_PORT,
            ssh_key_path: None,
            ip_address: None,
        }
    }
}

/// Settings for container-backed nodes (docker or podman).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OciSettings {
    /// Common settings.
    pub base: BaseSettings,
    /// Node image to run.
    pub image: String,
    /// CPU limit for the node container.
    pub cpus: u32,
    /// Memory limit for the node container, in MiB.
    pub memory_mb: u64,
    /// Dedicated network the node is attached to.
    pub network: Option<String>,
    /// Static address assigned on the dedicated network.
    pub static_ip: Option<String>,
    /// Container ports published on the loopback interface.
    pub published_ports: Vec<u16>,
}

impl OciSettings {
    /// Creates settings using the default published ports.
    #[must_use]
    pub fn new(base: BaseSettings, image: impl Into<String>) -> Self {
        Self {
            base,
            image: image.into(),
            cpus: 2,
            memory_mb: 2200,
            network: None,
            static_ip: None,
            published_ports: vec![DEFAULT_SSH_PORT, ENGINE_PORT, API_SERVER_PORT],
        }
    }
}

/// Settings for `VirtualBox` VMs.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VirtualBoxSettings {
    /// Common settings.
    pub base: BaseSettings,
    /// Number of virtual CPUs.
    pub cpus: u32,
    /// Memory size, in MiB.
    pub memory_mb: u64,
    /// Disk size, in MiB.
    pub disk_size_mb: u64,
    /// Boot ISO attached to the VM.
    pub boot_iso: Utf8PathBuf,
    /// Host-side port forwarded to the guest engine.
    pub engine_port: u16,
    /// Interval between state polls while waiting for shutdown, in
    /// milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum time to wait for an ACPI shutdown, in seconds.
    pub stop_timeout_secs: u64,
}

impl VirtualBoxSettings {
    /// Creates settings with default resources and polling.
    #[must_use]
    pub fn new(base: BaseSettings, boot_iso: impl Into<Utf8PathBuf>) -> Self {
        Self {
            base,
            cpus: 2,
            memory_mb: 2200,
            disk_size_mb: 20_000,
            boot_iso: boot_iso.into(),
            engine_port: 0,
            poll_interval_ms: 1000,
            stop_timeout_secs: 120,
        }
    }
}

/// Tagged driver configuration persisted in the host record.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum DriverConfig {
    /// Docker-backed container node.
    Docker(OciSettings),
    /// Podman-backed container node.
    Podman(OciSettings),
    /// `VirtualBox` VM.
    VirtualBox(VirtualBoxSettings),
    /// Bare-metal driver running directly on the host.
    None(BaseSettings),
}

impl DriverConfig {
    /// Registry name of the driver.
    #[must_use]
    pub const fn driver_name(&self) -> &'static str {
        match self {
            Self::Docker(_) => "docker",
            Self::Podman(_) => "podman",
            Self::VirtualBox(_) => "virtualbox",
            Self::None(_) => "none",
        }
    }

    /// Settings shared by every driver.
    #[must_use]
    pub const fn base(&self) -> &BaseSettings {
        match self {
            Self::Docker(settings) | Self::Podman(settings) => &settings.base,
            Self::VirtualBox(settings) => &settings.base,
            Self::None(base) => base,
        }
    }
}
