//! Exponential backoff for reconciler-level operations.
//!
//! Only errors that report themselves as [`Transient`] are retried; anything
//! else is returned on the first failure. Delays grow by
//! [`DEFAULT_MULTIPLIER`], are randomised by ±50% to avoid synchronised retry
//! storms, and the loop gives up once the next sleep would exceed the
//! elapsed-time budget.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::driver::DriverError;
use crate::exec::ExecError;
use crate::oci::OciError;
use crate::virtualbox::VirtualBoxError;

/// Growth factor applied to the interval after every failed attempt.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Upper bound for a single sleep between attempts.
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);

const JITTER_MIN: f64 = 0.5;
const JITTER_MAX: f64 = 1.5;

/// Errors that can say whether retrying may help.
pub trait Transient {
    /// Returns `true` when the failure may clear on its own.
    fn is_transient(&self) -> bool;
}

impl<T: Transient + ?Sized> Transient for Box<T> {
    fn is_transient(&self) -> bool {
        (**self).is_transient()
    }
}

impl Transient for ExecError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }
}

impl Transient for OciError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }
}

impl Transient for VirtualBoxError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }
}

impl Transient for DriverError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }
}

/// Exponential backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    /// Sleep before the second attempt, before jitter.
    pub initial_interval: Duration,
    /// Cap on the un-jittered interval.
    pub max_interval: Duration,
    /// Total time after which no further attempt is scheduled.
    pub max_elapsed: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
}

impl Backoff {
    /// Policy starting at `initial_interval` and giving up after
    /// `max_elapsed`.
    #[must_use]
    pub const fn expo(initial_interval: Duration, max_elapsed: Duration) -> Self {
        Self {
            initial_interval,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_elapsed,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }

    fn grow(&self, interval: Duration) -> Duration {
        interval.mul_f64(self.multiplier).min(self.max_interval)
    }
}

fn jittered(interval: Duration) -> Duration {
    let factor = rand::rng().random_range(JITTER_MIN..=JITTER_MAX);
    interval.mul_f64(factor)
}

/// Runs `operation` until it succeeds, fails permanently, or the backoff
/// budget is spent.
///
/// # Errors
///
/// Returns the first non-transient error, or the last transient error once
/// `policy.max_elapsed` would be exceeded.
pub async fn expo<T, E, F>(policy: &Backoff, operation_name: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: Transient + fmt::Display,
{
    let started = Instant::now();
    let mut interval = policy.initial_interval;
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        let err = match operation() {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempts = attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_transient() {
            debug!(operation = operation_name, attempt, error = %err, "permanent failure");
            return Err(err);
        }

        let delay = jittered(interval);
        if started.elapsed().saturating_add(delay) > policy.max_elapsed {
            warn!(operation = operation_name, attempts = attempt, error = %err, "giving up after retries");
            return Err(err);
        }

        warn!(
            operation = operation_name,
            attempt,
            delay_ms = delay.as_millis(),
            error = %err,
            "transient failure, will retry"
        );
        sleep(delay).await;
        interval = policy.grow(interval);
    }
}
