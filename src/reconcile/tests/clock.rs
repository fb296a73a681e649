//! Tests for guest clock measurement and correction.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rstest::rstest;

use super::{FixedClock, HOST_UNIX_SECS, guest_date, host_time};
use crate::driver::DriverError;
use crate::reconcile::{
    CLOCK_TOLERANCE, Clock, ClockSync, parse_guest_time, skew_between, sync_clock,
};
use crate::test_support::FakeDriver;

#[rstest]
#[case("1700000000.123456789\n", 1_700_000_000, 123_456_789)]
#[case("1700000000.5", 1_700_000_000, 500_000_000)]
#[case("1700000000", 1_700_000_000, 0)]
#[case("1700000000.1234567891", 1_700_000_000, 123_456_789)]
fn parses_date_output(#[case] output: &str, #[case] secs: u64, #[case] nanos: u32) {
    let parsed = parse_guest_time(output).expect("guest time should parse");

    assert_eq!(parsed, UNIX_EPOCH + Duration::new(secs, nanos));
}

#[rstest]
#[case("")]
#[case("Thu Nov 14 22:13:20 UTC 2023")]
#[case("1700000000.12x")]
#[case(".5")]
fn rejects_malformed_date_output(#[case] output: &str) {
    let err = parse_guest_time(output).expect_err("malformed output should fail");

    assert!(matches!(err, DriverError::Parse { .. }));
}

#[rstest]
fn skew_is_symmetric() {
    let later = host_time() + Duration::from_millis(1500);

    assert_eq!(skew_between(later, host_time()), Duration::from_millis(1500));
    assert_eq!(skew_between(host_time(), later), Duration::from_millis(1500));
}

#[rstest]
#[case::ahead_within(2000)]
#[case::behind_within(-2000)]
fn skew_below_threshold_is_left_alone(#[case] offset_ms: i64) {
    let driver = FakeDriver::vm("minihost");
    driver.reply("date +%s.%N", &guest_date(offset_ms));

    let outcome = sync_clock(&driver, &FixedClock(host_time()));

    assert_eq!(
        outcome,
        ClockSync::InSync {
            skew: Duration::from_millis(2000),
        }
    );
    assert_eq!(driver.guest_commands(), vec!["date +%s.%N"]);
}

#[rstest]
#[case::ahead(2200)]
#[case::behind(-2200)]
fn skew_at_or_above_threshold_sets_the_guest_clock(#[case] offset_ms: i64) {
    let driver = FakeDriver::vm("minihost");
    driver.reply("date +%s.%N", &guest_date(offset_ms));

    let outcome = sync_clock(&driver, &FixedClock(host_time()));

    assert_eq!(
        outcome,
        ClockSync::Adjusted {
            skew: Duration::from_millis(2200),
        }
    );
    assert_eq!(
        driver.guest_commands(),
        vec![
            String::from("date +%s.%N"),
            format!("sudo date -s @{HOST_UNIX_SECS}"),
        ]
    );
}

#[rstest]
fn threshold_is_inclusive() {
    let driver = FakeDriver::vm("minihost");
    let offset_ms = i64::try_from(CLOCK_TOLERANCE.as_millis()).expect("fits");
    driver.reply("date +%s.%N", &guest_date(offset_ms));

    let outcome = sync_clock(&driver, &FixedClock(host_time()));

    assert!(matches!(outcome, ClockSync::Adjusted { .. }));
}

#[rstest]
fn measurement_failure_is_reported_not_raised() {
    let driver = FakeDriver::vm("minihost");
    driver.fail("date +%s.%N", "date: command not found");

    let outcome = sync_clock(&driver, &FixedClock(host_time()));

    assert_eq!(outcome, ClockSync::Unmeasured);
    assert_eq!(driver.guest_commands().len(), 1);
}

#[rstest]
fn adjustment_failure_is_reported_not_raised() {
    let driver = FakeDriver::vm("minihost");
    driver.reply("date +%s.%N", &guest_date(-60_000));
    driver.fail("sudo date -s", "date: cannot set date: Operation not permitted");

    let outcome = sync_clock(&driver, &FixedClock(host_time()));

    assert_eq!(
        outcome,
        ClockSync::AdjustFailed {
            skew: Duration::from_secs(60),
        }
    );
}

/// Clock that notes how many guest commands had run each time it is read.
struct WatchingClock {
    driver: FakeDriver,
    readings: Mutex<Vec<usize>>,
}

impl Clock for WatchingClock {
    fn now(&self) -> SystemTime {
        self.readings
            .lock()
            .expect("readings lock")
            .push(self.driver.guest_commands().len());
        host_time()
    }
}

#[rstest]
fn host_time_is_read_before_the_guest_clock() {
    let driver = FakeDriver::vm("minihost");
    driver.reply("date +%s.%N", &guest_date(-60_000));
    let clock = WatchingClock {
        driver: driver.clone(),
        readings: Mutex::new(Vec::new()),
    };

    let outcome = sync_clock(&driver, &clock);

    assert!(matches!(outcome, ClockSync::Adjusted { .. }));
    let readings = clock.readings.lock().expect("readings lock").clone();
    assert_eq!(readings.first(), Some(&0), "readings: {readings:?}");
}
