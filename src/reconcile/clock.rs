//! Guest clock measurement and correction for VM-backed hosts.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::driver::{Driver, DriverError};

/// Skew below which the guest clock is left alone.
pub const CLOCK_TOLERANCE: Duration = Duration::from_millis(2100);

const GUEST_TIME_COMMAND: &str = "date +%s.%N";

/// Source of the host's wall-clock time.
pub trait Clock {
    /// Current wall-clock time.
    fn now(&self) -> SystemTime;
}

/// [`Clock`] backed by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Outcome of a guest clock sync.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClockSync {
    /// The host is not a VM, so its clock follows the host kernel.
    Skipped,
    /// The guest clock could not be read.
    Unmeasured,
    /// The skew was within [`CLOCK_TOLERANCE`].
    InSync {
        /// Absolute difference between guest and host clocks.
        skew: Duration,
    },
    /// The guest clock was set to the host time.
    Adjusted {
        /// Skew before the adjustment.
        skew: Duration,
    },
    /// The guest clock was off but could not be set.
    AdjustFailed {
        /// Skew that remains.
        skew: Duration,
    },
}

/// Parses `date +%s.%N` output into a point in time.
///
/// Fractions longer than nanosecond precision are truncated and shorter ones
/// are right-padded.
///
/// # Errors
///
/// Returns [`DriverError::Parse`] when the output is not a decimal Unix
/// timestamp.
pub fn parse_guest_time(output: &str) -> Result<SystemTime, DriverError> {
    let raw = output.trim();
    let invalid = || DriverError::Parse {
        resource: String::from("guest time"),
        message: format!("expected seconds.nanoseconds, got {raw:?}"),
    };
    let (secs_text, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    if secs_text.is_empty() || !fraction.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(invalid());
    }
    let secs: u64 = secs_text.parse().map_err(|_| invalid())?;
    let digits = fraction.get(..9).unwrap_or(fraction);
    let nanos: u32 = format!("{digits:0<9}").parse().map_err(|_| invalid())?;
    UNIX_EPOCH
        .checked_add(Duration::new(secs, nanos))
        .ok_or_else(invalid)
}

/// Absolute difference between two points in time.
#[must_use]
pub fn skew_between(guest: SystemTime, host: SystemTime) -> Duration {
    guest
        .duration_since(host)
        .unwrap_or_else(|err| err.duration())
}

/// Measures the guest clock against `clock` and sets it when the skew reaches
/// [`CLOCK_TOLERANCE`]. Failures are logged and reported in the outcome
/// rather than returned.
///
/// Host time for the measurement is read before the guest command runs.
pub fn sync_clock<D: Driver + ?Sized, C: Clock>(driver: &D, clock: &C) -> ClockSync {
    let machine = driver.machine_name();
    let host = clock.now();
    let guest = match driver
        .run_cmd(GUEST_TIME_COMMAND)
        .and_then(|result| parse_guest_time(&result.stdout))
    {
        Ok(time) => time,
        Err(err) => {
            warn!(machine, error = %err, "unable to measure guest clock");
            return ClockSync::Unmeasured;
        }
    };
    let skew = skew_between(guest, host);
    if skew < CLOCK_TOLERANCE {
        debug!(machine, skew_ms = skew.as_millis(), "guest clock within tolerance");
        return ClockSync::InSync { skew };
    }

    let unix = clock
        .now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| since.as_secs());
    match driver.run_cmd(&format!("sudo date -s @{unix}")) {
        Ok(_) => {
            info!(machine, skew_ms = skew.as_millis(), "adjusted guest clock");
            ClockSync::Adjusted { skew }
        }
        Err(err) => {
            warn!(machine, skew_ms = skew.as_millis(), error = %err, "unable to adjust guest clock");
            ClockSync::AdjustFailed { skew }
        }
    }
}
