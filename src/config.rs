//! Machine configuration loading via `ortho-config`.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::driver::{BaseSettings, DriverConfig, OciSettings, VirtualBoxSettings};
use crate::host::{EngineOptions, Host, MACHINES_DIR, validate_name};
use crate::registry::DRIVER_NAMES;
use crate::ssh::expand_tilde;

/// Node image used by container drivers.
pub const DEFAULT_KIC_IMAGE: &str = "gcr.io/k8s-minikube/kicbase:v0.0.42";

/// Smallest memory allocation a node can run with, in MiB.
pub const MINIMUM_MEMORY_MB: u64 = 1800;

/// Smallest VM disk, in MiB.
pub const MINIMUM_DISK_MB: u64 = 2000;

/// Private key generated for VM guests, relative to the machine directory.
pub const MACHINE_KEY_FILE: &str = "id_rsa";

/// Profile, driver and resource settings merged from defaults, configuration
/// files, and environment variables. CLI flags override individual fields.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "MINIHOST",
    discovery(
        app_name = "minihost",
        env_var = "MINIHOST_CONFIG_PATH",
        config_file_name = "minihost.toml",
        dotfile_name = ".minihost.toml",
        project_file_name = "minihost.toml"
    )
)]
pub struct MachineConfig {
    /// Profile name; also the machine name.
    #[ortho_config(default = "minihost".to_owned())]
    pub profile: String,
    /// Driver used to create new machines.
    #[ortho_config(default = "docker".to_owned())]
    pub driver: String,
    /// Store directory holding certificates and per-profile records.
    /// Supports tilde expansion.
    #[ortho_config(default = "~/.minihost".to_owned())]
    pub home: String,
    /// CPUs allocated to new machines.
    #[ortho_config(default = 2)]
    pub cpus: u32,
    /// Memory allocated to new machines, in MiB.
    #[ortho_config(default = 2200)]
    pub memory_mb: u64,
    /// VM disk size, in MiB.
    #[ortho_config(default = 20_000)]
    pub disk_size_mb: u64,
    /// Node image for the docker and podman drivers.
    #[ortho_config(default = DEFAULT_KIC_IMAGE.to_owned())]
    pub kic_image: String,
    /// Boot ISO for VM drivers; defaults to `cache/iso/minikube.iso` under
    /// the store home.
    pub boot_iso: Option<String>,
    /// User for SSH sessions into guests.
    #[ortho_config(default = "docker".to_owned())]
    pub ssh_user: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(env_var: &'static str, toml_key: &'static str) -> Self {
        Self { env_var, toml_key }
    }

    fn invalid(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::Invalid {
            message: message.into(),
            env_var: self.env_var.to_owned(),
            toml_key: self.toml_key.to_owned(),
        }
    }
}

const PROFILE: FieldMetadata = FieldMetadata::new("MINIHOST_PROFILE", "profile");
const DRIVER: FieldMetadata = FieldMetadata::new("MINIHOST_DRIVER", "driver");
const HOME: FieldMetadata = FieldMetadata::new("MINIHOST_HOME", "home");
const CPUS: FieldMetadata = FieldMetadata::new("MINIHOST_CPUS", "cpus");
const MEMORY: FieldMetadata = FieldMetadata::new("MINIHOST_MEMORY_MB", "memory_mb");
const DISK: FieldMetadata = FieldMetadata::new("MINIHOST_DISK_SIZE_MB", "disk_size_mb");
const KIC_IMAGE: FieldMetadata = FieldMetadata::new("MINIHOST_KIC_IMAGE", "kic_image");
const SSH_USER: FieldMetadata = FieldMetadata::new("MINIHOST_SSH_USER", "ssh_user");

impl MachineConfig {
    /// Settings used when no configuration layer overrides anything.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            profile: String::from("minihost"),
            driver: String::from("docker"),
            home: String::from("~/.minihost"),
            cpus: 2,
            memory_mb: 2200,
            disk_size_mb: 20_000,
            kic_image: DEFAULT_KIC_IMAGE.to_owned(),
            boot_iso: None,
            ssh_user: String::from("docker"),
        }
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("minihost")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and `minihost.toml` key that set the offending value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first field that fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name(&self.profile).map_err(|err| PROFILE.invalid(err.to_string()))?;
        if !DRIVER_NAMES.contains(&self.driver.as_str()) {
            return Err(DRIVER.invalid(format!(
                "unknown driver {:?}; choose one of {}",
                self.driver,
                DRIVER_NAMES.join(", ")
            )));
        }
        if self.home.trim().is_empty() {
            return Err(HOME.invalid("store home must not be empty"));
        }
        if self.cpus == 0 {
            return Err(CPUS.invalid("at least one CPU is required"));
        }
        if self.memory_mb < MINIMUM_MEMORY_MB {
            return Err(MEMORY.invalid(format!(
                "requested memory allocation {}MB is less than the usable minimum of {MINIMUM_MEMORY_MB}MB",
                self.memory_mb
            )));
        }
        if self.driver == "virtualbox" && self.disk_size_mb < MINIMUM_DISK_MB {
            return Err(DISK.invalid(format!(
                "requested disk size {}MB is less than the minimum of {MINIMUM_DISK_MB}MB",
                self.disk_size_mb
            )));
        }
        if self.kic_image.trim().is_empty() {
            return Err(KIC_IMAGE.invalid("node image must not be empty"));
        }
        if self.ssh_user.trim().is_empty() {
            return Err(SSH_USER.invalid("SSH user must not be empty"));
        }
        Ok(())
    }

    /// Store home with a leading `~/` expanded.
    #[must_use]
    pub fn home_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(expand_tilde(&self.home))
    }

    /// Directory holding the profile's record and machine files.
    #[must_use]
    pub fn machine_dir(&self) -> Utf8PathBuf {
        self.home_dir().join(MACHINES_DIR).join(&self.profile)
    }

    /// Boot ISO for VM drivers.
    #[must_use]
    pub fn boot_iso_path(&self) -> Utf8PathBuf {
        self.boot_iso.as_deref().map_or_else(
            || self.home_dir().join("cache/iso/minikube.iso"),
            |path| Utf8PathBuf::from(expand_tilde(path)),
        )
    }

    /// Driver settings for a new machine.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn driver_config(&self) -> Result<DriverConfig, ConfigError> {
        self.validate()?;
        let machine_dir = self.machine_dir();
        let mut base = BaseSettings::new(self.profile.as_str(), machine_dir.clone());
        base.ssh_user.clone_from(&self.ssh_user);
        Ok(match self.driver.as_str() {
            "docker" | "podman" => {
                let mut settings = OciSettings::new(base, self.kic_image.as_str());
                settings.cpus = self.cpus;
                settings.memory_mb = self.memory_mb;
                if self.driver == "docker" {
                    DriverConfig::Docker(settings)
                } else {
                    DriverConfig::Podman(settings)
                }
            }
            "virtualbox" => {
                base.ssh_key_path = Some(machine_dir.join(MACHINE_KEY_FILE));
                let mut settings = VirtualBoxSettings::new(base, self.boot_iso_path());
                settings.cpus = self.cpus;
                settings.memory_mb = self.memory_mb;
                settings.disk_size_mb = self.disk_size_mb;
                DriverConfig::VirtualBox(settings)
            }
            _ => DriverConfig::None(base),
        })
    }

    /// Host record written when the profile is created, carrying `engine`
    /// as its engine options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn desired_host(&self, engine: EngineOptions) -> Result<Host, ConfigError> {
        let mut host = Host::new(self.driver_config()?, &self.home_dir());
        host.options.engine = engine;
        Ok(host)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A field holds an unusable value.
    #[error("{message}: set {env_var} or {toml_key} in minihost.toml")]
    Invalid {
        /// What is wrong with the value.
        message: String,
        /// Environment variable that sets the field.
        env_var: String,
        /// `minihost.toml` key that sets the field.
        toml_key: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}
