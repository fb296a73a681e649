//! Unit tests for host reconciliation.

mod clock;
mod lifecycle;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use camino::Utf8PathBuf;
use tempfile::TempDir;

use crate::driver::Driver;
use crate::host::{FileHostStore, Host, HostStore};
use crate::reconcile::{Clock, Reconciler};
use crate::retry::Backoff;
use crate::test_support::{FakeDriver, FakeFactory, RecordingProvisioner};

pub const PROFILE: &str = "minihost";

/// Host time used by every reconciliation test.
pub const HOST_UNIX_SECS: u64 = 1_700_000_000;

#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub SystemTime);

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        self.0
    }
}

pub fn host_time() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(HOST_UNIX_SECS)
}

/// `date +%s.%N` output for the host time shifted by `offset_ms`.
pub fn guest_date(offset_ms: i64) -> String {
    let offset = Duration::from_millis(offset_ms.unsigned_abs());
    let guest = if offset_ms >= 0 {
        host_time() + offset
    } else {
        host_time() - offset
    };
    let since = guest.duration_since(UNIX_EPOCH).expect("after epoch");
    format!("{}.{:09}\n", since.as_secs(), since.subsec_nanos())
}

pub type TestReconciler = Reconciler<FileHostStore, FakeFactory, RecordingProvisioner, FixedClock>;

pub struct Harness {
    _dir: TempDir,
    pub home: Utf8PathBuf,
    pub driver: FakeDriver,
    pub provisioner: RecordingProvisioner,
    pub reconciler: TestReconciler,
}

impl Harness {
    pub fn new(driver: FakeDriver) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let home = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp path");
        let provisioner = RecordingProvisioner::new();
        let reconciler = Reconciler::new(
            FileHostStore::new(home.clone()),
            FakeFactory::new(driver.clone()),
            provisioner.clone(),
        )
        .with_clock(FixedClock(host_time()))
        .with_backoff(Backoff::expo(
            Duration::from_millis(1),
            Duration::from_millis(500),
        ));
        driver.reply("date +%s.%N", &guest_date(300));
        Self {
            _dir: dir,
            home,
            driver,
            provisioner,
            reconciler,
        }
    }

    /// Host record the CLI would write for this driver.
    pub fn desired(&self) -> Host {
        Host::new(self.driver.config(), &self.home)
    }

    /// Persists the desired record and returns it.
    pub fn seed(&self) -> Host {
        let host = self.desired();
        self.reconciler.store().save(&host).expect("seed host record");
        host
    }

    pub fn stored(&self) -> Host {
        self.reconciler.store().load(PROFILE).expect("stored host record")
    }
}
