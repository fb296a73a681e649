//! Guest side of the host directory mount bridge.
//!
//! The host directory is exported by a 9p file server listening on the
//! host; the guest mounts it over TCP. This module parses the
//! `<source>:<target>` argument, builds the guest mount and unmount
//! commands, and discovers the address guests use to reach the host.

use std::collections::BTreeMap;
use std::fmt;

use camino::Utf8PathBuf;
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::{info, warn};

use crate::driver::{Driver, DriverError};

/// Filesystem type the bridge mounts with.
pub const NINE_P: &str = "9p";

/// Default 9p protocol version.
pub const DEFAULT_MOUNT_VERSION: &str = "9p2000.L";

/// Default 9p message size, in bytes.
pub const DEFAULT_MSIZE: u32 = 262_144;

/// Default TCP port of the host file server.
pub const DEFAULT_MOUNT_PORT: u16 = 5640;

/// Errors raised while setting up or tearing down a mount.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MountError {
    /// The argument has no `:` separating source and target.
    #[error("mount argument {value:?} must be in form: <source directory>:<target directory>")]
    MissingSeparator {
        /// Argument as given.
        value: String,
    },
    /// The guest path is not absolute.
    #[error("target directory {path:?} must be an absolute path")]
    RelativeTarget {
        /// Guest path as given.
        path: String,
    },
    /// The host directory does not exist.
    #[error("cannot find directory {path} for mount")]
    SourceMissing {
        /// Host path as given.
        path: Utf8PathBuf,
    },
    /// The driver shares the host file system already.
    #[error("the '{driver}' driver does not support 'minihost mount'")]
    UnsupportedDriver {
        /// Registry name of the driver.
        driver: String,
    },
    /// The guest could not be queried or did not accept the mount.
    #[error(transparent)]
    Guest(#[from] DriverError),
}

/// Parsed `<source>:<target>` mount argument.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountTarget {
    /// Host directory to export.
    pub source: Utf8PathBuf,
    /// Absolute guest directory to mount on.
    pub target: String,
}

impl MountTarget {
    /// Splits `value` at its last `:` so Windows-style sources keep their
    /// drive letter.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::MissingSeparator`] or
    /// [`MountError::RelativeTarget`].
    pub fn parse(value: &str) -> Result<Self, MountError> {
        let (source, target) = value
            .rsplit_once(':')
            .ok_or_else(|| MountError::MissingSeparator {
                value: value.to_owned(),
            })?;
        if !target.starts_with('/') {
            return Err(MountError::RelativeTarget {
                path: target.to_owned(),
            });
        }
        Ok(Self {
            source: Utf8PathBuf::from(source),
            target: target.to_owned(),
        })
    }

    /// Ensures the host directory exists.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::SourceMissing`] when it does not.
    pub fn check_source(&self) -> Result<(), MountError> {
        if self.source.is_dir() {
            Ok(())
        } else {
            Err(MountError::SourceMissing {
                path: self.source.clone(),
            })
        }
    }
}

impl fmt::Display for MountTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.target)
    }
}

/// Parameters of the guest mount.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountOptions {
    /// Filesystem type.
    pub mount_type: String,
    /// Owner of files in the mount.
    pub uid: String,
    /// Group of files in the mount.
    pub gid: String,
    /// 9p protocol version.
    pub version: String,
    /// 9p message size.
    pub msize: u32,
    /// TCP port of the host file server.
    pub port: u16,
    /// Permissions of the mount point.
    pub mode: u32,
    /// Additional `key=value` or bare flags.
    pub extra: BTreeMap<String, String>,
}

impl MountOptions {
    /// Options matching the stock 9p file server.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            mount_type: NINE_P.to_owned(),
            uid: String::from("docker"),
            gid: String::from("docker"),
            version: DEFAULT_MOUNT_VERSION.to_owned(),
            msize: DEFAULT_MSIZE,
            port: DEFAULT_MOUNT_PORT,
            mode: 0o755,
            extra: BTreeMap::new(),
        }
    }

    /// Adds `key=value` or bare `flag` options.
    pub fn extend_extra<'a>(&mut self, options: impl IntoIterator<Item = &'a str>) {
        for option in options {
            let (key, value) = option.split_once('=').unwrap_or((option, ""));
            self.extra.insert(key.to_owned(), value.to_owned());
        }
    }

    /// Comma separated `-o` value, sorted by key.
    #[must_use]
    pub fn option_string(&self) -> String {
        let mut options = BTreeMap::new();
        options.insert("dfltuid", self.uid.clone());
        options.insert("dfltgid", self.gid.clone());
        options.insert("msize", self.msize.to_string());
        options.insert("port", self.port.to_string());
        options.insert("trans", String::from("tcp"));
        options.insert("version", self.version.clone());
        for (key, value) in &self.extra {
            options.insert(key.as_str(), value.clone());
        }
        options
            .iter()
            .map(|(key, value)| {
                if value.is_empty() {
                    (*key).to_owned()
                } else {
                    format!("{key}={value}")
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Guest command that unmounts `path` if something is mounted there.
#[must_use]
pub fn unmount_command(path: &str) -> String {
    let escaped = escape(path.into());
    format!(
        "[ \"x$(findmnt -T {escaped} | grep {escaped})\" != \"x\" ] && sudo umount -f {escaped} || echo "
    )
}

/// Guest command that mounts the host export served at `host_ip` on
/// `target`, replacing any earlier mount.
#[must_use]
pub fn mount_command(host_ip: &str, target: &str, options: &MountOptions) -> String {
    let escaped = escape(target.into());
    format!(
        "{unmount}; sudo mkdir -m {mode:o} -p {escaped} && sudo mount -t {kind} -o {opts} {ip} {escaped}",
        unmount = unmount_command(target),
        mode = options.mode,
        kind = escape(options.mount_type.as_str().into()),
        opts = escape(options.option_string().into()),
        ip = escape(host_ip.into()),
    )
}

/// Address the guest uses to reach the host: its default gateway.
///
/// # Errors
///
/// Returns [`MountError::Guest`] when the route table cannot be read or has
/// no default route.
pub fn guest_gateway<D: Driver + ?Sized>(driver: &D) -> Result<String, MountError> {
    let output = driver.run_cmd("ip route show default")?.stdout;
    output
        .split_whitespace()
        .skip_while(|word| *word != "via")
        .nth(1)
        .map(str::to_owned)
        .ok_or_else(|| {
            MountError::Guest(DriverError::Parse {
                resource: String::from("default route"),
                message: format!("no gateway in {:?}", output.trim()),
            })
        })
}

/// Mounts `target.source` into the guest behind `driver`.
///
/// # Errors
///
/// Returns [`MountError::UnsupportedDriver`] for unmanaged drivers, or the
/// guest failure.
pub fn mount<D: Driver + ?Sized>(
    driver: &D,
    host_ip: &str,
    target: &MountTarget,
    options: &MountOptions,
) -> Result<(), MountError> {
    if !driver.is_managed() {
        return Err(MountError::UnsupportedDriver {
            driver: driver.driver_name().to_owned(),
        });
    }
    driver.run_cmd(&mount_command(host_ip, &target.target, options))?;
    info!(machine = driver.machine_name(), mount = %target, host_ip, "mounted host directory");
    Ok(())
}

/// Unmounts `path` from the guest, logging rather than failing when the
/// guest refuses. Returns whether the unmount succeeded.
#[must_use]
pub fn unmount<D: Driver + ?Sized>(driver: &D, path: &str) -> bool {
    match driver.run_cmd(&unmount_command(path)) {
        Ok(_) => {
            info!(machine = driver.machine_name(), path, "unmounted");
            true
        }
        Err(err) => {
            warn!(machine = driver.machine_name(), path, error = %err, "failed to unmount");
            false
        }
    }
}
