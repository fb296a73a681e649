//! Binary entry point for the `minihost` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use clap::error::ErrorKind;
use thiserror::Error;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use minihost::config::{ConfigError, MachineConfig};
use minihost::exec::ProcessCommandRunner;
use minihost::host::{EngineOptions, FileHostStore, HostStoreError};
use minihost::mount::{self, MountError, MountOptions, MountTarget};
use minihost::provision::GuestProvisioner;
use minihost::reconcile::{ClockSync, FixFailure, FixOptions, ReconcileError, Reconciler};
use minihost::registry::DriverRegistry;
use minihost::ssh::{SshConfig, SshConfigError};
use minihost::state::State;

mod cli;

use cli::{Cli, Command, MountCommand, StartCommand};

const EXIT_FAILURE: i32 = 1;
const EXIT_USAGE: i32 = 64;
const EXIT_NO_INPUT: i32 = 66;
const EXIT_INTERRUPTED: i32 = 130;

const LOG_ENV: &str = "MINIHOST_LOG";

type HostReconciler =
    Reconciler<FileHostStore, DriverRegistry<ProcessCommandRunner>, GuestProvisioner>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("ssh configuration error: {0}")]
    Ssh(#[from] SshConfigError),
    #[error(transparent)]
    Fix(Box<FixFailure>),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    Mount(#[from] MountError),
    #[error("machine {name} is {state}; run `minihost start --profile {name}` first")]
    NotRunning { name: String, state: State },
    #[error("Received {signal} signal")]
    Interrupted { signal: &'static str },
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl CliError {
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(ConfigError::Invalid { .. })
            | Self::Mount(
                MountError::MissingSeparator { .. }
                | MountError::RelativeTarget { .. }
                | MountError::UnsupportedDriver { .. },
            ) => EXIT_USAGE,
            Self::Reconcile(ReconcileError::Store(HostStoreError::NotFound { .. }))
            | Self::Mount(MountError::SourceMissing { .. }) => EXIT_NO_INPUT,
            Self::Interrupted { .. } => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        }
    }
}

impl From<Box<FixFailure>> for CliError {
    fn from(failure: Box<FixFailure>) -> Self {
        Self::Fix(failure)
    }
}

/// Settings shared by every subcommand.
struct Context {
    config: MachineConfig,
    reconciler: HostReconciler,
}

impl Context {
    fn load(profile: Option<String>, start: Option<&StartCommand>) -> Result<Self, CliError> {
        let mut config = MachineConfig::load_without_cli_args()?;
        if let Some(name) = profile {
            config.profile = name;
        }
        if let Some(args) = start {
            apply_start_overrides(&mut config, args);
        }
        config.validate()?;
        let ssh = SshConfig::load_without_cli_args()?;
        ssh.validate()?;
        let reconciler = Reconciler::new(
            FileHostStore::new(config.home_dir()),
            DriverRegistry::new(ProcessCommandRunner::new(), ssh),
            GuestProvisioner::new(),
        );
        Ok(Self { config, reconciler })
    }

    fn profile(&self) -> &str {
        &self.config.profile
    }
}

fn apply_start_overrides(config: &mut MachineConfig, args: &StartCommand) {
    if let Some(driver) = &args.driver {
        config.driver.clone_from(driver);
    }
    if let Some(cpus) = args.cpus {
        config.cpus = cpus;
    }
    if let Some(memory) = args.memory {
        config.memory_mb = memory;
    }
    if let Some(disk) = args.disk_size {
        config.disk_size_mb = disk;
    }
    if let Some(iso) = &args.iso {
        config.boot_iso = Some(iso.clone());
    }
    if let Some(image) = &args.kic_image {
        config.kic_image.clone_from(image);
    }
}

fn engine_options(args: &StartCommand) -> EngineOptions {
    EngineOptions {
        env: args.docker_env.clone(),
        insecure_registries: args.insecure_registries.clone(),
        registry_mirrors: args.registry_mirrors.clone(),
        labels: args.engine_labels.clone(),
        storage_driver: args.storage_driver.clone(),
    }
}

fn mount_options(args: &MountCommand) -> MountOptions {
    let mut options = MountOptions::builtin();
    options.uid.clone_from(&args.uid);
    options.gid.clone_from(&args.gid);
    options.version.clone_from(&args.version);
    options.msize = args.msize;
    options.port = args.port;
    options.extend_extra(args.options.iter().map(String::as_str));
    options
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("minihost=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            err.print().ok();
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => EXIT_USAGE,
            };
            process::exit(code);
        }
    };
    init_logging();

    let exit_code = match dispatch(cli, &mut io::stdout()).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli, out: &mut impl Write) -> Result<i32, CliError> {
    let Cli { profile, command } = cli;
    match command {
        Command::Start(args) => {
            let context = Context::load(profile, Some(&args))?;
            start(&context, &args, out).await
        }
        Command::Stop => stop(&Context::load(profile, None)?, out),
        Command::Delete => delete(&Context::load(profile, None)?, out),
        Command::Status => status(&Context::load(profile, None)?, out),
        Command::Ip => ip(&Context::load(profile, None)?, out),
        Command::Mount(args) => {
            let context = Context::load(profile, None)?;
            mount_until_signal(&context, &args, out).await
        }
    }
}

async fn start(
    context: &Context,
    args: &StartCommand,
    out: &mut impl Write,
) -> Result<i32, CliError> {
    let desired = context.config.desired_host(engine_options(args))?;
    writeln!(
        out,
        "Starting {} with the {} driver ...",
        context.profile(),
        desired.driver_name
    )?;
    let options = FixOptions {
        engine_env: args.docker_env.clone(),
        always_provision: false,
    };
    let report = context.reconciler.start_host(&desired, &options).await?;
    if let ClockSync::Adjusted { skew } = report.clock {
        writeln!(out, "Adjusted guest clock by {}ms", skew.as_millis())?;
    }
    writeln!(
        out,
        "{} is ready (driver {}, was {})",
        report.host.name, report.host.driver_name, report.initial_state
    )?;
    Ok(0)
}

fn stop(context: &Context, out: &mut impl Write) -> Result<i32, CliError> {
    let state = context.reconciler.stop_host(context.profile())?;
    writeln!(out, "{} is {state}", context.profile())?;
    Ok(0)
}

fn delete(context: &Context, out: &mut impl Write) -> Result<i32, CliError> {
    context.reconciler.delete_host(context.profile())?;
    writeln!(out, "Removed all traces of {}", context.profile())?;
    Ok(0)
}

fn status(context: &Context, out: &mut impl Write) -> Result<i32, CliError> {
    let report = context.reconciler.host_status(context.profile())?;
    writeln!(out, "host: {}", report.state)?;
    writeln!(out, "driver: {}", report.driver_name)?;
    if let Some(ip) = &report.ip {
        writeln!(out, "ip: {ip}")?;
    }
    if let Some(url) = &report.url {
        writeln!(out, "engine: {url}")?;
    }
    if let Some(error) = &report.error {
        writeln!(out, "error: {error}")?;
    }
    Ok(if report.state.is_running() {
        0
    } else {
        EXIT_FAILURE
    })
}

fn ip(context: &Context, out: &mut impl Write) -> Result<i32, CliError> {
    let address = context.reconciler.host_ip(context.profile())?;
    writeln!(out, "{address}")?;
    Ok(0)
}

async fn mount_until_signal(
    context: &Context,
    args: &MountCommand,
    out: &mut impl Write,
) -> Result<i32, CliError> {
    let target = MountTarget::parse(&args.mount)?;
    target.check_source()?;
    let (driver, state) = context.reconciler.host_driver(context.profile())?;
    if !state.is_running() {
        return Err(CliError::NotRunning {
            name: context.profile().to_owned(),
            state,
        });
    }
    let host_ip = match &args.ip {
        Some(address) => address.clone(),
        None => mount::guest_gateway(&driver)?,
    };
    let options = mount_options(args);
    mount::mount(&driver, &host_ip, &target, &options)?;
    writeln!(
        out,
        "Mounted {target} over 9p from {host_ip}:{}; press Ctrl-C to unmount",
        options.port
    )?;
    out.flush()?;

    let signal = wait_for_signal().await?;
    if !mount::unmount(&driver, &target.target) {
        writeln!(out, "{} may still be mounted in the guest", target.target)?;
    }
    Err(CliError::Interrupted { signal })
}

#[cfg(unix)]
async fn wait_for_signal() -> io::Result<&'static str> {
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = signal::ctrl_c() => result.map(|()| "interrupt"),
        _ = terminate.recv() => Ok("terminated"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> io::Result<&'static str> {
    signal::ctrl_c().await.map(|()| "interrupt")
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
