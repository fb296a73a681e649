//! SSH client settings loaded via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// SSH client settings merged from defaults, configuration files, and
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "MINIHOST_SSH",
    discovery(
        app_name = "minihost",
        env_var = "MINIHOST_CONFIG_PATH",
        config_file_name = "minihost.toml",
        dotfile_name = ".minihost.toml",
        project_file_name = "minihost.toml"
    )
)]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Whether to force batch mode so SSH never prompts.
    #[ortho_config(default = true)]
    pub batch_mode: bool,
    /// Whether to enforce host key checking; guests are recreated often, so
    /// it is disabled by default.
    #[ortho_config(default = false)]
    pub strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null`.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub known_hosts_file: String,
    /// Seconds to wait for the TCP connection.
    #[ortho_config(default = 10)]
    pub connect_timeout_secs: u64,
    /// Fallback private key when the machine record names none. Supports
    /// tilde expansion.
    pub identity_file: Option<String>,
}

impl SshConfig {
    /// Settings used when no configuration layer overrides anything.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            batch_mode: true,
            strict_host_key_checking: false,
            known_hosts_file: String::from("/dev/null"),
            connect_timeout_secs: 10,
            identity_file: None,
        }
    }
}

/// Errors raised when loading or validating SSH settings.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SshConfigError {
    /// A required value is empty.
    #[error("missing {field}: set MINIHOST_SSH_{env_suffix} or add {field} to [ssh] in minihost.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Merging configuration layers failed.
    #[error("ssh configuration parsing failed: {0}")]
    Parse(String),
}

impl SshConfig {
    /// Loads settings from defaults, configuration files, and environment
    /// variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, SshConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("minihost")])
            .map_err(|err| SshConfigError::Parse(err.to_string()))
    }

    /// Ensures required values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError::InvalidConfig`] naming the first empty
    /// field.
    pub fn validate(&self) -> Result<(), SshConfigError> {
        if self.ssh_bin.trim().is_empty() {
            return Err(SshConfigError::InvalidConfig {
                field: String::from("ssh_bin"),
            });
        }
        match self.identity_file.as_deref() {
            Some(path) if path.trim().is_empty() => Err(SshConfigError::InvalidConfig {
                field: String::from("identity_file"),
            }),
            _ => Ok(()),
        }
    }
}
