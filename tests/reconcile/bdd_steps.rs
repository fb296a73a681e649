//! BDD step definitions for host reconciliation.

use minihost::driver::DriverError;
use minihost::host::HostStore;
use minihost::provision::ProvisionError;
use minihost::reconcile::FixOptions;
use minihost::state::State;
use minihost::test_support::FakeDriver;
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{PROFILE, ReconcileContext, StartOutcome};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn parse_state(label: &str) -> Result<State, StepError> {
    match label {
        "Running" => Ok(State::Running),
        "Stopped" => Ok(State::Stopped),
        "Paused" => Ok(State::Paused),
        "Saved" => Ok(State::Saved),
        _ => Err(StepError::Assertion(format!("unknown machine state: {label}"))),
    }
}

fn existing_machine(
    reconcile_context: ReconcileContext,
    driver: FakeDriver,
    state: &str,
) -> Result<ReconcileContext, StepError> {
    let context = reconcile_context.with_driver(driver.with_state(parse_state(state)?));
    context.seed();
    Ok(context)
}

#[given("a virtualbox profile with no machine")]
fn absent_machine(reconcile_context: ReconcileContext) -> ReconcileContext {
    reconcile_context.with_driver(FakeDriver::vm(PROFILE))
}

#[given("an existing virtualbox machine that is \"{state}\"")]
fn existing_vm(
    reconcile_context: ReconcileContext,
    state: String,
) -> Result<ReconcileContext, StepError> {
    existing_machine(reconcile_context, FakeDriver::vm(PROFILE), &state)
}

#[given("an existing docker machine that is \"{state}\"")]
fn existing_container(
    reconcile_context: ReconcileContext,
    state: String,
) -> Result<ReconcileContext, StepError> {
    existing_machine(reconcile_context, FakeDriver::container(PROFILE), &state)
}

#[given("the engine environment \"{entry}\"")]
fn engine_environment(mut reconcile_context: ReconcileContext, entry: String) -> ReconcileContext {
    reconcile_context.options = FixOptions {
        engine_env: vec![entry],
        ..reconcile_context.options
    };
    reconcile_context
}

#[given("installing certificates times out once")]
fn auth_times_out_once(reconcile_context: ReconcileContext) -> ReconcileContext {
    reconcile_context
        .provisioner
        .fail_next_auth(ProvisionError::Guest(DriverError::Timeout {
            machine: String::from(PROFILE),
            action: String::from("copy certificates"),
        }));
    reconcile_context
}

#[given("provisioning is rejected")]
fn provisioning_rejected(reconcile_context: ReconcileContext) -> ReconcileContext {
    reconcile_context
        .provisioner
        .fail_provision(ProvisionError::SwarmUnsupported {
            machine: String::from(PROFILE),
        });
    reconcile_context
}

#[when("I start the host")]
fn start_host(reconcile_context: ReconcileContext) -> Result<ReconcileContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let reconciler = reconcile_context.reconciler();
    let desired = reconcile_context.desired();
    let options = reconcile_context.options.clone();
    let outcome = match runtime.block_on(reconciler.start_host(&desired, &options)) {
        Ok(report) => StartOutcome::Ready(Box::new(report)),
        Err(failure) => StartOutcome::Failed(failure),
    };
    Ok(reconcile_context.with_outcome(outcome))
}

#[then("the host is ready")]
fn host_ready(reconcile_context: &ReconcileContext) -> Result<(), StepError> {
    match &reconcile_context.outcome {
        Some(StartOutcome::Ready(report)) if report.host.name == PROFILE => Ok(()),
        Some(StartOutcome::Ready(report)) => Err(StepError::Assertion(format!(
            "expected {PROFILE}, got {}",
            report.host.name
        ))),
        Some(StartOutcome::Failed(failure)) => Err(StepError::Assertion(format!(
            "expected success, got failure: {failure}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the start fails during \"{phase}\"")]
fn start_fails(reconcile_context: &ReconcileContext, phase: String) -> Result<(), StepError> {
    let Some(StartOutcome::Failed(failure)) = &reconcile_context.outcome else {
        return Err(StepError::Assertion(String::from(
            "expected failure outcome",
        )));
    };
    if failure.phase.to_string() == phase {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected failure during {phase}, got {}",
            failure.phase
        )))
    }
}

fn expect_verb(reconcile_context: &ReconcileContext, verb: &str) -> Result<(), StepError> {
    let verbs = reconcile_context.driver.verbs();
    if verbs.iter().any(|seen| seen == verb) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected driver verb {verb}, got {verbs:?}"
        )))
    }
}

#[then("the machine was created")]
fn machine_created(reconcile_context: &ReconcileContext) -> Result<(), StepError> {
    expect_verb(reconcile_context, "create")
}

#[then("the machine was started")]
fn machine_started(reconcile_context: &ReconcileContext) -> Result<(), StepError> {
    expect_verb(reconcile_context, "start")
}

fn provision_calls(reconcile_context: &ReconcileContext) -> usize {
    reconcile_context
        .provisioner
        .log()
        .iter()
        .filter(|entry| entry.starts_with("provision:"))
        .count()
}

#[then("the guest was provisioned")]
fn guest_provisioned(reconcile_context: &ReconcileContext) -> Result<(), StepError> {
    if provision_calls(reconcile_context) > 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "provisioner should be invoked",
        )))
    }
}

#[then("the guest was not provisioned")]
fn guest_not_provisioned(reconcile_context: &ReconcileContext) -> Result<(), StepError> {
    match provision_calls(reconcile_context) {
        0 => Ok(()),
        calls => Err(StepError::Assertion(format!(
            "provisioner ran {calls} times"
        ))),
    }
}

#[then("certificates were installed \"{count}\" times")]
fn certificates_installed(
    reconcile_context: &ReconcileContext,
    count: usize,
) -> Result<(), StepError> {
    let calls = reconcile_context
        .provisioner
        .log()
        .iter()
        .filter(|entry| entry.starts_with("configure_auth:"))
        .count();
    if calls == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} certificate installs, got {calls}"
        )))
    }
}

#[then("the stored engine environment is \"{entry}\"")]
fn stored_engine_environment(
    reconcile_context: &ReconcileContext,
    entry: String,
) -> Result<(), StepError> {
    let host = reconcile_context
        .store()
        .load(PROFILE)
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    if host.options.engine.env == [entry.clone()] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected engine env [{entry}], got {:?}",
            host.options.engine.env
        )))
    }
}

#[then("the guest clock was not read")]
fn clock_not_read(reconcile_context: &ReconcileContext) -> Result<(), StepError> {
    let commands = reconcile_context.driver.guest_commands();
    if commands.iter().any(|command| command.starts_with("date")) {
        Err(StepError::Assertion(format!(
            "clock was read for a container node: {commands:?}"
        )))
    } else {
        Ok(())
    }
}
