//! Command-line interface definitions for the `minihost` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `minihost` binary.
#[derive(Debug, Parser)]
#[command(
    name = "minihost",
    version,
    about = "Run a local single-node Kubernetes host on a VM or container driver",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Profile (machine) to operate on.
    #[arg(
        long,
        short = 'p',
        global = true,
        env = "MINIHOST_PROFILE",
        value_name = "NAME"
    )]
    pub(crate) profile: Option<String>,
    /// Subcommand to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of `minihost`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Create the machine if needed and bring it to a usable state.
    #[command(name = "start")]
    Start(StartCommand),
    /// Stop the machine, keeping its disk and record.
    #[command(name = "stop")]
    Stop,
    /// Remove the machine and its record.
    #[command(name = "delete")]
    Delete,
    /// Print the machine state; exits non-zero unless it is running.
    #[command(name = "status")]
    Status,
    /// Print the machine's IP address.
    #[command(name = "ip")]
    Ip,
    /// Mount a host directory into the machine until interrupted.
    #[command(name = "mount")]
    Mount(MountCommand),
}

/// Arguments for `minihost start`.
#[derive(Args, Debug, Default)]
pub(crate) struct StartCommand {
    /// Driver for a new machine (docker, podman, virtualbox, none).
    #[arg(long, value_name = "DRIVER")]
    pub(crate) driver: Option<String>,
    /// CPUs allocated to a new machine.
    #[arg(long, value_name = "COUNT")]
    pub(crate) cpus: Option<u32>,
    /// Memory allocated to a new machine, in MiB.
    #[arg(long, value_name = "MIB")]
    pub(crate) memory: Option<u64>,
    /// Disk size of a new VM, in MiB.
    #[arg(long, value_name = "MIB")]
    pub(crate) disk_size: Option<u64>,
    /// Boot ISO for VM drivers.
    #[arg(long, value_name = "PATH")]
    pub(crate) iso: Option<String>,
    /// Node image for container drivers.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) kic_image: Option<String>,
    /// Environment for the container engine, as `KEY=VALUE`; repeatable.
    /// Changing it re-provisions an existing machine.
    #[arg(long = "docker-env", value_name = "KEY=VALUE")]
    pub(crate) docker_env: Vec<String>,
    /// Registry the engine may reach without TLS; repeatable.
    #[arg(long = "insecure-registry", value_name = "REGISTRY")]
    pub(crate) insecure_registries: Vec<String>,
    /// Registry mirror for the engine; repeatable.
    #[arg(long = "registry-mirror", value_name = "URL")]
    pub(crate) registry_mirrors: Vec<String>,
    /// Label applied to the engine; repeatable.
    #[arg(long = "engine-label", value_name = "LABEL")]
    pub(crate) engine_labels: Vec<String>,
    /// Storage driver for the engine.
    #[arg(long, value_name = "DRIVER")]
    pub(crate) storage_driver: Option<String>,
}

/// Arguments for `minihost mount`.
#[derive(Args, Debug)]
pub(crate) struct MountCommand {
    /// Directories to connect, as `<source directory>:<target directory>`.
    #[arg(value_name = "SOURCE:TARGET")]
    pub(crate) mount: String,
    /// Address the guest uses to reach the host file server; defaults to
    /// the guest's gateway.
    #[arg(long, value_name = "IP")]
    pub(crate) ip: Option<String>,
    /// Port of the host file server.
    #[arg(long, value_name = "PORT", default_value_t = 5640)]
    pub(crate) port: u16,
    /// Owner of files in the mount.
    #[arg(long, value_name = "UID", default_value = "docker")]
    pub(crate) uid: String,
    /// Group of files in the mount.
    #[arg(long, value_name = "GID", default_value = "docker")]
    pub(crate) gid: String,
    /// 9p protocol version.
    #[arg(long = "9p-version", value_name = "VERSION", default_value = "9p2000.L")]
    pub(crate) version: String,
    /// 9p message size, in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = 262_144)]
    pub(crate) msize: u32,
    /// Additional mount options, such as `cache=fscache`; repeatable.
    #[arg(long = "option", value_name = "OPTION")]
    pub(crate) options: Vec<String>,
}
