//! Shared fixtures for reconciliation BDD scenarios.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use minihost::host::{FileHostStore, Host, HostStore};
use minihost::reconcile::{FixFailure, FixOptions, FixReport, Reconciler};
use minihost::retry::Backoff;
use minihost::test_support::{FakeDriver, FakeFactory, RecordingProvisioner};
use minihost::driver::Driver;
use rstest::fixture;
use tempfile::TempDir;

pub const PROFILE: &str = "minihost";

pub type ScenarioReconciler = Reconciler<FileHostStore, FakeFactory, RecordingProvisioner>;

#[derive(Clone, Debug)]
pub enum StartOutcome {
    Ready(Box<FixReport>),
    Failed(Box<FixFailure>),
}

#[derive(Clone, Debug)]
pub struct ReconcileContext {
    pub home: Utf8PathBuf,
    pub driver: FakeDriver,
    pub provisioner: RecordingProvisioner,
    pub options: FixOptions,
    pub outcome: Option<StartOutcome>,
    _dir: Arc<TempDir>,
}

impl ReconcileContext {
    fn new(driver: FakeDriver) -> Self {
        let dir = TempDir::new().unwrap_or_else(|err| panic!("create store home: {err}"));
        let home = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .unwrap_or_else(|path| panic!("store home {} is not UTF-8", path.display()));
        Self {
            home,
            driver,
            provisioner: RecordingProvisioner::new(),
            options: FixOptions::default(),
            outcome: None,
            _dir: Arc::new(dir),
        }
    }

    /// Replaces the fake machine, keeping the store and provisioner.
    pub fn with_driver(self, driver: FakeDriver) -> Self {
        Self { driver, ..self }
    }

    pub fn with_outcome(self, outcome: StartOutcome) -> Self {
        Self {
            outcome: Some(outcome),
            ..self
        }
    }

    pub fn store(&self) -> FileHostStore {
        FileHostStore::new(self.home.clone())
    }

    /// Host record the CLI would write for the current driver.
    pub fn desired(&self) -> Host {
        Host::new(self.driver.config(), &self.home)
    }

    pub fn seed(&self) {
        self.store()
            .save(&self.desired())
            .unwrap_or_else(|err| panic!("seed host record: {err}"));
    }

    pub fn reconciler(&self) -> ScenarioReconciler {
        Reconciler::new(
            self.store(),
            FakeFactory::new(self.driver.clone()),
            self.provisioner.clone(),
        )
        .with_backoff(Backoff::expo(
            Duration::from_millis(1),
            Duration::from_millis(500),
        ))
    }
}

#[fixture]
pub fn reconcile_context() -> ReconcileContext {
    ReconcileContext::new(FakeDriver::vm(PROFILE))
}
