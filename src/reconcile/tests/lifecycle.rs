//! Tests for creation, retry, stop, delete, and status.

use std::fs;

use rstest::rstest;

use super::{Harness, PROFILE};
use crate::driver::{Driver, DriverError};
use crate::host::HostStore;
use crate::provision::ProvisionError;
use crate::reconcile::{FixOptions, Phase, ReconcileError};
use crate::state::State;
use crate::test_support::FakeDriver;

fn transient_auth_error() -> ProvisionError {
    ProvisionError::Guest(DriverError::Timeout {
        machine: String::from(PROFILE),
        action: String::from("copy certificates"),
    })
}

#[tokio::test]
async fn start_host_creates_and_provisions_an_absent_machine() {
    let harness = Harness::new(FakeDriver::vm(PROFILE));
    let desired = harness.desired();

    let report = harness
        .reconciler
        .start_host(&desired, &FixOptions::default())
        .await
        .expect("start should succeed");

    assert_eq!(harness.driver.verbs(), vec!["pre_create_check", "create"]);
    assert_eq!(report.initial_state, State::Running);
    assert!(report.provisioned);
    assert_eq!(report.phases.last(), Some(&Phase::Ready));
    assert!(
        harness
            .reconciler
            .store()
            .exists(PROFILE)
            .expect("store readable")
    );
    assert_eq!(
        harness.provisioner.log(),
        vec![
            "provision:minihost",
            "post_start_setup:minihost",
            "configure_auth:minihost",
        ]
    );
}

#[tokio::test]
async fn start_host_reuses_an_existing_machine() {
    let harness = Harness::new(FakeDriver::vm(PROFILE).with_state(State::Stopped));
    let desired = harness.seed();

    let report = harness
        .reconciler
        .start_host(&desired, &FixOptions::default())
        .await
        .expect("start should succeed");

    assert_eq!(harness.driver.verbs(), vec!["start"]);
    assert!(!report.provisioned);
}

#[tokio::test]
async fn start_host_retries_transient_auth_failures() {
    let harness = Harness::new(FakeDriver::vm(PROFILE).with_state(State::Running));
    let desired = harness.seed();
    harness.provisioner.fail_next_auth(transient_auth_error());

    let report = harness
        .reconciler
        .start_host(&desired, &FixOptions::default())
        .await
        .expect("second attempt should succeed");

    let auth_attempts = harness
        .provisioner
        .log()
        .iter()
        .filter(|step| step.starts_with("configure_auth:"))
        .count();
    assert_eq!(auth_attempts, 2);
    assert_eq!(report.phases.last(), Some(&Phase::Ready));
}

#[tokio::test]
async fn start_host_gives_up_on_permanent_failures() {
    let harness = Harness::new(FakeDriver::vm(PROFILE).with_state(State::Running));
    let desired = harness.seed();
    harness
        .provisioner
        .fail_next_auth(ProvisionError::MissingCertificate {
            path: String::from("/nowhere/ca.pem"),
        });
    harness.provisioner.fail_next_auth(transient_auth_error());

    let failure = harness
        .reconciler
        .start_host(&desired, &FixOptions::default())
        .await
        .expect_err("missing certificates should not be retried");

    assert_eq!(failure.phase, Phase::AuthConfigured);
    assert_eq!(harness.provisioner.log().len(), 2);
}

#[tokio::test]
async fn start_host_reports_create_failures() {
    let harness = Harness::new(FakeDriver::vm(PROFILE).with_state(State::Stopped));
    let desired = harness.desired();

    let failure = harness
        .reconciler
        .start_host(&desired, &FixOptions::default())
        .await
        .expect_err("machine exists without a record");

    assert_eq!(failure.phase, Phase::Created);
    assert!(matches!(
        failure.source,
        ReconcileError::Driver {
            source: DriverError::AlreadyExists { .. },
            ..
        }
    ));
    assert!(
        harness
            .reconciler
            .store()
            .exists(PROFILE)
            .expect("store readable"),
        "the record is kept so delete can reach the machine"
    );
}

#[tokio::test]
async fn failed_create_can_be_deleted_and_recreated() {
    let harness = Harness::new(FakeDriver::vm(PROFILE).with_state(State::Stopped));
    let desired = harness.desired();

    harness
        .reconciler
        .start_host(&desired, &FixOptions::default())
        .await
        .expect_err("machine exists without a record");
    harness.reconciler.delete_host(PROFILE).expect("delete");

    assert_eq!(
        harness.driver.verbs(),
        vec!["pre_create_check", "create", "remove"]
    );
    assert_eq!(harness.driver.state(), State::None);
    assert!(
        !harness
            .reconciler
            .store()
            .exists(PROFILE)
            .expect("store readable")
    );

    let report = harness
        .reconciler
        .start_host(&desired, &FixOptions::default())
        .await
        .expect("start after delete should succeed");

    assert!(report.provisioned);
    assert_eq!(report.phases.last(), Some(&Phase::Ready));
}

#[tokio::test]
async fn create_failure_keeps_the_desired_record() {
    let harness = Harness::new(FakeDriver::vm(PROFILE).with_state(State::Stopped));
    let desired = harness.desired();

    harness
        .reconciler
        .start_host(&desired, &FixOptions::default())
        .await
        .expect_err("machine exists without a record");

    let stored = harness.reconciler.store().load(PROFILE).expect("record");
    assert_eq!(stored, desired);
}

#[rstest]
fn stop_host_stops_and_records() {
    let harness = Harness::new(FakeDriver::vm(PROFILE).with_state(State::Running));
    harness.seed();

    let state = harness.reconciler.stop_host(PROFILE).expect("stop");

    assert_eq!(state, State::Stopped);
    assert_eq!(harness.driver.verbs(), vec!["stop"]);
}

#[rstest]
fn stop_host_without_record_fails() {
    let harness = Harness::new(FakeDriver::vm(PROFILE));

    let err = harness
        .reconciler
        .stop_host(PROFILE)
        .expect_err("no record");

    assert!(matches!(err, ReconcileError::Store(_)));
    assert!(harness.driver.verbs().is_empty());
}

#[rstest]
fn delete_host_removes_machine_then_record() {
    let harness = Harness::new(FakeDriver::vm(PROFILE).with_state(State::Running));
    harness.seed();

    harness.reconciler.delete_host(PROFILE).expect("delete");

    assert_eq!(harness.driver.verbs(), vec!["remove"]);
    assert_eq!(harness.driver.state(), State::None);
    assert!(
        !harness
            .reconciler
            .store()
            .exists(PROFILE)
            .expect("store readable")
    );
}

#[rstest]
fn delete_host_is_idempotent() {
    let harness = Harness::new(FakeDriver::vm(PROFILE));

    harness.reconciler.delete_host(PROFILE).expect("first delete");
    harness.reconciler.delete_host(PROFILE).expect("second delete");

    assert!(harness.driver.verbs().is_empty());
}

#[rstest]
fn delete_host_clears_corrupt_records() {
    let harness = Harness::new(FakeDriver::vm(PROFILE).with_state(State::Running));
    harness.seed();
    let record = harness.reconciler.store().record_path(PROFILE);
    fs::write(&record, "{ not json").expect("corrupt record");

    harness.reconciler.delete_host(PROFILE).expect("delete");

    assert!(harness.driver.verbs().is_empty());
    assert!(!record.exists());
}

#[rstest]
fn status_reports_addresses_only_when_running() {
    let harness = Harness::new(FakeDriver::vm(PROFILE).with_state(State::Running));
    harness.seed();

    let running = harness.reconciler.host_status(PROFILE).expect("status");
    harness.driver.set_state(State::Stopped);
    let stopped = harness.reconciler.host_status(PROFILE).expect("status");

    assert_eq!(running.state, State::Running);
    assert_eq!(running.driver_name, "virtualbox");
    assert_eq!(running.ip.as_deref(), Some("192.168.59.100"));
    assert_eq!(running.url.as_deref(), Some("tcp://127.0.0.1:2376"));
    assert_eq!(stopped.state, State::Stopped);
    assert_eq!(stopped.ip, None);
    assert_eq!(stopped.error, None);
}

#[rstest]
fn host_ip_asks_the_driver() {
    let harness = Harness::new(FakeDriver::vm(PROFILE).with_state(State::Running));
    harness.seed();

    assert_eq!(
        harness.reconciler.host_ip(PROFILE).expect("ip"),
        "192.168.59.100"
    );
}

#[rstest]
fn host_driver_reports_the_observed_state() {
    let harness = Harness::new(FakeDriver::vm(PROFILE).with_state(State::Paused));
    harness.seed();

    let (driver, state) = harness.reconciler.host_driver(PROFILE).expect("driver");

    assert_eq!(state, State::Paused);
    assert_eq!(driver.machine_name(), PROFILE);
    assert!(harness.driver.verbs().is_empty());
}
