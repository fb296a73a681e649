//! SSH transport for running commands inside VM guests.

use std::ffi::OsString;

use crate::driver::BaseSettings;
use crate::exec::{CommandRunner, ExecError, RunResult};

mod config;

pub use config::{SshConfig, SshConfigError};

/// Where and as whom an SSH session connects.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshTarget {
    /// Remote user.
    pub user: String,
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Private key for this machine, if any.
    pub identity_file: Option<String>,
}

impl SshTarget {
    /// Builds a target for a machine reachable on `host`.
    #[must_use]
    pub fn for_machine(settings: &BaseSettings, host: impl Into<String>) -> Self {
        Self {
            user: settings.ssh_user.clone(),
            host: host.into(),
            port: settings.ssh_port,
            identity_file: settings.ssh_key_path.as_ref().map(ToString::to_string),
        }
    }
}

/// Runs commands on a guest through the system `ssh` client.
#[derive(Clone, Debug)]
pub struct SshClient<R: CommandRunner> {
    config: SshConfig,
    runner: R,
}

impl<R: CommandRunner> SshClient<R> {
    /// Creates a client with the given settings.
    #[must_use]
    pub const fn new(config: SshConfig, runner: R) -> Self {
        Self { config, runner }
    }

    /// Runs `command` on `target`, returning the remote exit status and
    /// output.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when `ssh` cannot be executed.
    pub fn run(&self, target: &SshTarget, command: &str) -> Result<RunResult, ExecError> {
        let args = self.build_args(target, command);
        self.runner.run(&self.config.ssh_bin, &args)
    }

    fn build_args(&self, target: &SshTarget, command: &str) -> Vec<OsString> {
        let mut args = vec![OsString::from("-p"), OsString::from(target.port.to_string())];

        let identity = target
            .identity_file
            .as_deref()
            .or(self.config.identity_file.as_deref());
        if let Some(identity_file) = identity {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        if self.config.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.known_hosts_file
            )));
        }

        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "ConnectTimeout={}",
            self.config.connect_timeout_secs
        )));
        args.push(OsString::from(format!("{}@{}", target.user, target.host)));
        args.push(OsString::from(command));
        args
    }
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// If `HOME` is not set the input is returned unchanged.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

#[cfg(test)]
mod tests;
