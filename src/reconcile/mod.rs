//! Host lifecycle reconciliation.
//!
//! [`Reconciler::fix`] walks an existing machine through
//! `Loaded → Started → Provisioned → AuthConfigured → ClockSynced → Ready`,
//! persisting the host record after every step that changes it.
//! [`Reconciler::start_host`] creates the machine first when the store has no
//! record and retries `fix` with exponential backoff while failures are
//! transient.

mod clock;

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::driver::{Driver, DriverError, observed_state};
use crate::host::{Host, HostStore, HostStoreError};
use crate::provision::{ProvisionError, Provisioner};
use crate::registry::DriverFactory;
use crate::retry::{self, Backoff, Transient};
use crate::state::State;

pub use clock::{
    CLOCK_TOLERANCE, Clock, ClockSync, SystemClock, parse_guest_time, skew_between, sync_clock,
};

/// Default pause before the first retry of `fix`.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Default time budget for retrying `fix`.
pub const DEFAULT_RETRY_BUDGET: Duration = Duration::from_secs(180);

/// Reconciliation steps, in execution order.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Phase {
    /// The machine was created and its record written.
    Created,
    /// The host record was loaded and the machine state queried.
    Loaded,
    /// A stopped machine was started.
    Started,
    /// The guest was provisioned and post-start setup ran.
    Provisioned,
    /// TLS material was installed.
    AuthConfigured,
    /// The guest clock was checked against the host.
    ClockSynced,
    /// The host is usable.
    Ready,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "create",
            Self::Loaded => "load",
            Self::Started => "start",
            Self::Provisioned => "provision",
            Self::AuthConfigured => "configure auth",
            Self::ClockSynced => "clock sync",
            Self::Ready => "ready",
        };
        f.write_str(label)
    }
}

/// Errors raised while reconciling a host.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ReconcileError {
    /// The host record could not be read or written.
    #[error(transparent)]
    Store(#[from] HostStoreError),
    /// A driver verb failed.
    #[error("failed to {action} machine: {source}")]
    Driver {
        /// Verb that failed.
        action: &'static str,
        /// Driver failure.
        #[source]
        source: DriverError,
    },
    /// Provisioning or post-start setup failed.
    #[error("provisioning failed: {0}")]
    Provision(#[source] ProvisionError),
    /// TLS material could not be installed.
    #[error("configuring auth failed: {0}")]
    Auth(#[source] ProvisionError),
}

impl ReconcileError {
    const fn driver(action: &'static str, source: DriverError) -> Self {
        Self::Driver { action, source }
    }

    /// Returns `true` for failures worth retrying.
    ///
    /// Auth failures are retried unless local TLS material is missing or
    /// unreadable, since a guest that has just booted often refuses the first
    /// copy.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Driver { source, .. } => source.is_transient(),
            Self::Auth(err) => !matches!(
                err,
                ProvisionError::MissingCertificate { .. } | ProvisionError::Io { .. }
            ),
            Self::Store(_) | Self::Provision(_) => false,
        }
    }
}

impl Transient for ReconcileError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }
}

/// Failure of a reconciliation run, carrying the step that failed and the
/// host record as it stood at that point.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{profile}: {phase} failed: {source}")]
pub struct FixFailure {
    /// Profile being reconciled.
    pub profile: String,
    /// Step that failed.
    pub phase: Phase,
    /// Partial host record, when it had been loaded or created.
    pub host: Option<Box<Host>>,
    /// Underlying error.
    #[source]
    pub source: ReconcileError,
}

impl FixFailure {
    fn boxed(profile: &str, phase: Phase, host: Option<&Host>, source: ReconcileError) -> Box<Self> {
        Box::new(Self {
            profile: profile.to_owned(),
            phase,
            host: host.cloned().map(Box::new),
            source,
        })
    }
}

impl Transient for FixFailure {
    fn is_transient(&self) -> bool {
        self.source.is_transient()
    }
}

/// Inputs to a reconciliation run that come from the caller rather than the
/// host record.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FixOptions {
    /// Desired engine environment. When non-empty and different from the
    /// recorded environment the guest is re-provisioned.
    pub engine_env: Vec<String>,
    /// Provision the guest even if the environment is unchanged.
    pub always_provision: bool,
}

/// Successful reconciliation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FixReport {
    /// Host record after reconciliation.
    pub host: Host,
    /// State observed before any action was taken.
    pub initial_state: State,
    /// Steps that ran, ending with [`Phase::Ready`].
    pub phases: Vec<Phase>,
    /// Whether full provisioning ran.
    pub provisioned: bool,
    /// Outcome of the guest clock check.
    pub clock: ClockSync,
}

/// Point-in-time view of a profile for `status`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostStatus {
    /// Profile name.
    pub name: String,
    /// Registry name of the driver.
    pub driver_name: String,
    /// Observed state; [`State::Error`] when the backend could not be asked.
    pub state: State,
    /// Why the state could not be determined.
    pub error: Option<String>,
    /// Machine IP address, when running.
    pub ip: Option<String>,
    /// Container engine URL, when running.
    pub url: Option<String>,
}

/// Drives hosts between lifecycle states.
#[derive(Clone, Debug)]
pub struct Reconciler<S, F, P, C = SystemClock> {
    store: S,
    factory: F,
    provisioner: P,
    clock: C,
    backoff: Backoff,
}

impl<S, F, P> Reconciler<S, F, P> {
    /// Reconciler using the system clock and the default retry budget.
    #[must_use]
    pub const fn new(store: S, factory: F, provisioner: P) -> Self {
        Self {
            store,
            factory,
            provisioner,
            clock: SystemClock,
            backoff: Backoff::expo(DEFAULT_RETRY_INTERVAL, DEFAULT_RETRY_BUDGET),
        }
    }
}

impl<S, F, P, C> Reconciler<S, F, P, C> {
    /// Replaces the clock used for guest clock checks.
    #[must_use]
    pub fn with_clock<T: Clock>(self, clock: T) -> Reconciler<S, F, P, T> {
        Reconciler {
            store: self.store,
            factory: self.factory,
            provisioner: self.provisioner,
            clock,
            backoff: self.backoff,
        }
    }

    /// Replaces the retry policy used by [`Reconciler::start_host`].
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Host store backing this reconciler.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }
}

impl<S, F, P, C> Reconciler<S, F, P, C>
where
    S: HostStore,
    F: DriverFactory,
    F::Driver: Sync,
    P: Provisioner,
    C: Clock,
{
    /// Creates the machine if needed, then reconciles it until it is ready
    /// or a permanent failure occurs.
    ///
    /// `desired` is the record written when the profile has none. It is saved
    /// before the machine is created, so a create that fails partway still
    /// leaves a record for [`Self::delete_host`] to clean up. An existing
    /// record is left as it is apart from the engine environment in
    /// `options`.
    ///
    /// # Errors
    ///
    /// Returns [`FixFailure`] describing the last failed step.
    pub async fn start_host(
        &self,
        desired: &Host,
        options: &FixOptions,
    ) -> Result<FixReport, Box<FixFailure>> {
        let name = desired.name.as_str();
        let exists = self
            .store
            .exists(name)
            .map_err(|err| FixFailure::boxed(name, Phase::Created, None, err.into()))?;
        let fix_options = if exists {
            options.clone()
        } else {
            self.create_host(desired)?;
            FixOptions {
                always_provision: true,
                ..options.clone()
            }
        };
        retry::expo(&self.backoff, "fix host", || self.fix(name, &fix_options)).await
    }

    fn create_host(&self, desired: &Host) -> Result<(), Box<FixFailure>> {
        let name = desired.name.as_str();
        let fail = |source: DriverError, action| {
            FixFailure::boxed(
                name,
                Phase::Created,
                Some(desired),
                ReconcileError::driver(action, source),
            )
        };
        let mut driver = self.factory.build(&desired.driver);
        driver
            .pre_create_check()
            .map_err(|err| fail(err, "check prerequisites for"))?;
        self.store
            .save(desired)
            .map_err(|err| FixFailure::boxed(name, Phase::Created, Some(desired), err.into()))?;
        info!(profile = name, driver = driver.driver_name(), "creating machine");
        driver.create().map_err(|err| fail(err, "create"))?;

        let mut host = desired.clone();
        host.driver = driver.config();
        self.store
            .save(&host)
            .map_err(|err| FixFailure::boxed(name, Phase::Created, Some(&host), err.into()))
    }

    /// Reconciles an existing host until it is ready.
    ///
    /// # Errors
    ///
    /// Returns [`FixFailure`] naming the failed step, with the host record as
    /// it stood when the step failed.
    pub fn fix(&self, name: &str, options: &FixOptions) -> Result<FixReport, Box<FixFailure>> {
        let mut host = self
            .store
            .load(name)
            .map_err(|err| FixFailure::boxed(name, Phase::Loaded, None, err.into()))?;
        let mut driver = self.factory.build(&host.driver);
        let mut phases = vec![Phase::Loaded];

        let initial_state = driver.get_state().map_err(|err| {
            FixFailure::boxed(
                name,
                Phase::Loaded,
                Some(&host),
                ReconcileError::driver("query", err),
            )
        })?;
        if initial_state.is_running() {
            info!(profile = name, "machine already running");
        } else {
            info!(profile = name, state = %initial_state, "starting existing machine");
            driver.start().map_err(|err| {
                FixFailure::boxed(
                    name,
                    Phase::Started,
                    Some(&host),
                    ReconcileError::driver("start", err),
                )
            })?;
            host.driver = driver.config();
            self.store
                .save(&host)
                .map_err(|err| FixFailure::boxed(name, Phase::Started, Some(&host), err.into()))?;
            phases.push(Phase::Started);
        }

        let provisioned = self.provision_if_needed(&driver, &mut host, options)?;
        self.provisioner
            .post_start_setup(&driver, &host)
            .map_err(|err| {
                FixFailure::boxed(
                    name,
                    Phase::Provisioned,
                    Some(&host),
                    ReconcileError::Provision(err),
                )
            })?;
        phases.push(Phase::Provisioned);

        self.provisioner
            .configure_auth(&driver, &host)
            .map_err(|err| {
                FixFailure::boxed(
                    name,
                    Phase::AuthConfigured,
                    Some(&host),
                    ReconcileError::Auth(err),
                )
            })?;
        phases.push(Phase::AuthConfigured);

        let clock = if !driver.is_container_based() && driver.is_managed() {
            phases.push(Phase::ClockSynced);
            sync_clock(&driver, &self.clock)
        } else {
            ClockSync::Skipped
        };

        phases.push(Phase::Ready);
        info!(profile = name, "host ready");
        Ok(FixReport {
            host,
            initial_state,
            phases,
            provisioned,
            clock,
        })
    }

    fn provision_if_needed(
        &self,
        driver: &F::Driver,
        host: &mut Host,
        options: &FixOptions,
    ) -> Result<bool, Box<FixFailure>> {
        let env_changed =
            !options.engine_env.is_empty() && options.engine_env != host.options.engine.env;
        if !env_changed && !options.always_provision {
            return Ok(false);
        }
        if !driver.is_managed() {
            info!(profile = %host.name, "skipping provisioning for unmanaged driver");
            return Ok(false);
        }
        if env_changed {
            host.options.engine.env.clone_from(&options.engine_env);
        }
        self.provisioner.provision(driver, host).map_err(|err| {
            FixFailure::boxed(
                &host.name,
                Phase::Provisioned,
                Some(&*host),
                ReconcileError::Provision(err),
            )
        })?;
        self.store.save(host).map_err(|err| {
            FixFailure::boxed(&host.name, Phase::Provisioned, Some(&*host), err.into())
        })?;
        Ok(true)
    }

    /// Stops the machine behind `name` and records the result.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the record cannot be loaded or saved,
    /// or the driver fails to stop the machine.
    pub fn stop_host(&self, name: &str) -> Result<State, ReconcileError> {
        let mut host = self.store.load(name)?;
        let mut driver = self.factory.build(&host.driver);
        driver
            .stop()
            .map_err(|err| ReconcileError::driver("stop", err))?;
        host.driver = driver.config();
        self.store.save(&host)?;
        let (state, _) = observed_state(&driver);
        info!(profile = name, %state, "machine stopped");
        Ok(state)
    }

    /// Removes the machine and its record. A corrupt record is removed
    /// without touching the backend; an absent profile is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the backend refuses to remove the
    /// machine or the record cannot be deleted.
    pub fn delete_host(&self, name: &str) -> Result<(), ReconcileError> {
        match self.store.load(name) {
            Ok(host) => {
                let mut driver = self.factory.build(&host.driver);
                match driver.remove() {
                    Ok(()) => info!(profile = name, "removed machine"),
                    Err(err @ DriverError::NotSupported { .. }) => {
                        warn!(profile = name, error = %err, "leaving machine in place");
                    }
                    Err(err) => return Err(ReconcileError::driver("remove", err)),
                }
            }
            Err(HostStoreError::NotFound { .. }) => {
                info!(profile = name, "no machine recorded for profile");
            }
            Err(err @ HostStoreError::Corrupt { .. }) => {
                warn!(profile = name, error = %err, "removing corrupt host record");
            }
            Err(err) => return Err(err.into()),
        }
        self.store.remove(name)?;
        Ok(())
    }

    /// Reports the observed state of `name`, with its address when running.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Store`] when the record cannot be loaded.
    pub fn host_status(&self, name: &str) -> Result<HostStatus, ReconcileError> {
        let host = self.store.load(name)?;
        let driver = self.factory.build(&host.driver);
        let (state, error) = observed_state(&driver);
        let (ip, url) = if state.is_running() {
            (driver.get_ip().ok(), driver.get_url().ok())
        } else {
            (None, None)
        };
        Ok(HostStatus {
            name: host.name,
            driver_name: host.driver_name,
            state,
            error: error.map(|err| err.to_string()),
            ip,
            url,
        })
    }

    /// IP address of the machine behind `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the record cannot be loaded or the
    /// driver cannot report an address.
    pub fn host_ip(&self, name: &str) -> Result<String, ReconcileError> {
        let host = self.store.load(name)?;
        self.factory
            .build(&host.driver)
            .get_ip()
            .map_err(|err| ReconcileError::driver("locate", err))
    }

    /// Driver for the machine behind `name` together with its observed
    /// state, for callers that run commands in the guest directly.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Store`] when the record cannot be loaded.
    pub fn host_driver(&self, name: &str) -> Result<(F::Driver, State), ReconcileError> {
        let host = self.store.load(name)?;
        let driver = self.factory.build(&host.driver);
        let (state, _) = observed_state(&driver);
        Ok((driver, state))
    }
}

#[cfg(test)]
mod tests;
