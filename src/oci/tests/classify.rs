//! Tests for failure classification.

use rstest::rstest;

use super::super::*;
use super::fixtures::POOL_OVERLAPS;

#[rstest]
#[case(POOL_OVERLAPS, FailureKind::SubnetTaken)]
#[case(
    "failed to allocate gateway (192.168.49.1): Address already in use",
    FailureKind::GatewayTaken
)]
#[case("Error: No such network: minihost", FailureKind::NoSuchNetwork)]
#[case(
    "error while removing network: network minihost id 3f has active endpoints",
    FailureKind::ActiveEndpoints
)]
#[case("Error: No such container: minihost", FailureKind::NoSuchContainer)]
#[case("permission denied while trying to connect", FailureKind::Unrecognized)]
fn classify_failure_recognises_runtime_messages(
    #[case] output: &str,
    #[case] expected: FailureKind,
) {
    assert_eq!(classify_failure(output), expected);
}

#[rstest]
fn gateway_message_requires_address_in_use() {
    assert_eq!(
        classify_failure("failed to allocate gateway (192.168.49.1): invalid range"),
        FailureKind::Unrecognized
    );
}

#[rstest]
fn collisions_are_transient_and_command_failures_are_not() {
    let taken = OciError::SubnetTaken {
        subnet: String::from("192.168.49.0/24"),
    };
    let failure = OciError::CommandFailure {
        command: String::from("docker ps"),
        status_text: String::from("1"),
        output: String::from("boom"),
        kind: FailureKind::Unrecognized,
    };

    assert!(taken.is_transient());
    assert!(!failure.is_transient());
}
