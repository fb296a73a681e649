//! Persisted host records and the per-profile store.
//!
//! A [`Host`] pairs the driver's serialisable settings with the engine, auth
//! and swarm options used to provision it. Records are cached observations:
//! the reconciler re-queries the backend on every run and rewrites the
//! record after state-changing steps.

mod store;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::DriverConfig;

pub use store::{FileHostStore, HOST_RECORD_FILE};

/// Directory, relative to the store home, that holds per-profile records.
pub const MACHINES_DIR: &str = "machines";

/// Errors raised by host stores.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HostStoreError {
    /// The profile has no persisted record.
    #[error(
        "no host record for profile {name}: run `minihost delete --profile {name}` and `minihost start --profile {name}` to re-create it"
    )]
    NotFound {
        /// Profile name.
        name: String,
    },
    /// The record exists but cannot be decoded.
    #[error(
        "host record {path} for profile {name} is corrupt ({message}): run `minihost delete --profile {name}` and `minihost start --profile {name}` to re-create it"
    )]
    Corrupt {
        /// Profile name.
        name: String,
        /// Record path.
        path: Utf8PathBuf,
        /// Decoder error message.
        message: String,
    },
    /// The profile name cannot be used as a directory name.
    #[error("invalid profile name {name:?}: use letters, digits, '-', '_' or '.'")]
    InvalidName {
        /// Rejected profile name.
        name: String,
    },
    /// File system access failed.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// The record could not be encoded.
    #[error("failed to encode host record for {name}: {message}")]
    Encode {
        /// Profile name.
        name: String,
        /// Encoder error message.
        message: String,
    },
}

/// Container engine settings applied during provisioning.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EngineOptions {
    /// `KEY=VALUE` environment for the engine daemon.
    #[serde(default)]
    pub env: Vec<String>,
    /// Registries the engine may reach without TLS.
    #[serde(default)]
    pub insecure_registries: Vec<String>,
    /// Registry mirrors.
    #[serde(default)]
    pub registry_mirrors: Vec<String>,
    /// Engine labels.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Storage driver override.
    #[serde(default)]
    pub storage_driver: Option<String>,
}

/// TLS material locations on the host and in the guest.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AuthOptions {
    /// Directory holding the CA and client certificates.
    pub cert_dir: Utf8PathBuf,
    /// CA certificate.
    pub ca_cert_path: Utf8PathBuf,
    /// CA private key.
    pub ca_key_path: Utf8PathBuf,
    /// Client certificate.
    pub client_cert_path: Utf8PathBuf,
    /// Client private key.
    pub client_key_path: Utf8PathBuf,
    /// Server certificate presented by the guest engine.
    pub server_cert_path: Utf8PathBuf,
    /// Server private key.
    pub server_key_path: Utf8PathBuf,
    /// Guest directory the certificates are installed into.
    pub remote_cert_dir: String,
}

impl AuthOptions {
    /// Standard certificate layout under the store `home`.
    #[must_use]
    pub fn for_home(home: &Utf8Path) -> Self {
        let cert_dir = home.join("certs");
        let machines = home.join(MACHINES_DIR);
        Self {
            ca_cert_path: cert_dir.join("ca.pem"),
            ca_key_path: cert_dir.join("ca-key.pem"),
            client_cert_path: cert_dir.join("cert.pem"),
            client_key_path: cert_dir.join("key.pem"),
            server_cert_path: machines.join("server.pem"),
            server_key_path: machines.join("server-key.pem"),
            cert_dir,
            remote_cert_dir: String::from("/etc/docker"),
        }
    }
}

/// Swarm membership settings.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SwarmOptions {
    /// Whether the host joins a swarm.
    #[serde(default)]
    pub is_swarm: bool,
}

/// Options applied when provisioning a host.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct HostOptions {
    /// Engine options.
    pub engine: EngineOptions,
    /// TLS options.
    pub auth: AuthOptions,
    /// Swarm options.
    #[serde(default)]
    pub swarm: SwarmOptions,
}

/// Persisted record for one profile.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Host {
    /// Profile and machine name.
    pub name: String,
    /// Registry name of the driver.
    pub driver_name: String,
    /// Driver settings learned so far.
    pub driver: DriverConfig,
    /// Provisioning options.
    pub options: HostOptions,
}

impl Host {
    /// Creates a record for `driver` with default engine options and the
    /// standard certificate layout under `home`.
    #[must_use]
    pub fn new(driver: DriverConfig, home: &Utf8Path) -> Self {
        Self {
            name: driver.base().machine_name.clone(),
            driver_name: driver.driver_name().to_owned(),
            options: HostOptions {
                engine: EngineOptions::default(),
                auth: AuthOptions::for_home(home),
                swarm: SwarmOptions::default(),
            },
            driver,
        }
    }
}

/// Storage for host records, keyed by profile name.
pub trait HostStore {
    /// Whether a record exists for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HostStoreError`] when the store cannot be read.
    fn exists(&self, name: &str) -> Result<bool, HostStoreError>;

    /// Loads the record for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HostStoreError::NotFound`] or [`HostStoreError::Corrupt`]
    /// with remediation advice.
    fn load(&self, name: &str) -> Result<Host, HostStoreError>;

    /// Persists `host`, replacing any previous record atomically.
    ///
    /// # Errors
    ///
    /// Returns [`HostStoreError`] when the record cannot be written.
    fn save(&self, host: &Host) -> Result<(), HostStoreError>;

    /// Removes the record for `name`; removing an absent record succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`HostStoreError`] when the record cannot be removed.
    fn remove(&self, name: &str) -> Result<(), HostStoreError>;

    /// Names of every stored profile, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`HostStoreError`] when the store cannot be listed.
    fn list(&self) -> Result<Vec<String>, HostStoreError>;
}

/// Rejects names that cannot be used as a single directory component.
///
/// # Errors
///
/// Returns [`HostStoreError::InvalidName`] for empty names, `.`/`..`, or
/// names containing characters outside `[A-Za-z0-9._-]`.
pub fn validate_name(name: &str) -> Result<(), HostStoreError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(HostStoreError::InvalidName {
            name: name.to_owned(),
        })
    }
}
