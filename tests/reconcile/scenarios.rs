//! BDD scenarios for host reconciliation.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ReconcileContext, reconcile_context};

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Create and provision an absent VM"
)]
fn scenario_create_absent_vm(reconcile_context: ReconcileContext) {
    drop(reconcile_context);
}

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Restart a stopped VM without reprovisioning"
)]
fn scenario_restart_stopped_vm(reconcile_context: ReconcileContext) {
    drop(reconcile_context);
}

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Reprovision when the engine environment changes"
)]
fn scenario_engine_env_change(reconcile_context: ReconcileContext) {
    drop(reconcile_context);
}

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Retry a certificate install that times out"
)]
fn scenario_auth_retry(reconcile_context: ReconcileContext) {
    drop(reconcile_context);
}

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Give up on a permanent provisioning failure"
)]
fn scenario_permanent_provision_failure(reconcile_context: ReconcileContext) {
    drop(reconcile_context);
}

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Container nodes skip the guest clock check"
)]
fn scenario_container_skips_clock(reconcile_context: ReconcileContext) {
    drop(reconcile_context);
}
