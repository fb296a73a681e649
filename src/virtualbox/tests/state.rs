//! Tests for machine-readable VM state parsing.

use rstest::rstest;

use super::super::*;
use crate::state::State;

#[rstest]
#[case("VMState=\"running\"", State::Running)]
#[case("VMState=\"paused\"", State::Paused)]
#[case("VMState=\"saved\"", State::Saved)]
#[case("VMState=\"poweroff\"", State::Stopped)]
#[case("VMState=\"aborted\"", State::Stopped)]
#[case("VMState=\"gurumeditation\"", State::None)]
fn vm_state_is_mapped(#[case] line: &str, #[case] expected: State) {
    let info = format!("name=\"minihost\"\nostype=\"Linux 2.6\"\n{line}\nVMStateChangeTime=\"2024\"\n");

    assert_eq!(parse_vm_state(&info).expect("state should parse"), expected);
}

#[rstest]
fn missing_state_line_is_a_parse_error() {
    let err = parse_vm_state("name=\"minihost\"\n").expect_err("no state line");

    let VirtualBoxError::Parse { ref message, .. } = err else {
        panic!("unexpected: {err}");
    };
    assert!(
        message.contains("name=") && message.contains("minihost"),
        "output should be kept in the error: {message}"
    );
}
