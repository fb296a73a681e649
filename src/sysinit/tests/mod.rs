//! Unit tests for guest init system control.

mod detect;

use rstest::fixture;

use crate::driver::{BaseSettings, NoneDriver};
use crate::test_support::ScriptedRunner;

#[fixture]
pub fn runner() -> ScriptedRunner {
    ScriptedRunner::new()
}

pub fn guest(runner: &ScriptedRunner) -> NoneDriver<ScriptedRunner> {
    NoneDriver::new(
        BaseSettings::new("minihost", "/home/dev/.minihost/machines/minihost"),
        runner.clone(),
    )
}

/// Guest command lines as seen by the host shell.
pub fn guest_commands(runner: &ScriptedRunner) -> Vec<String> {
    runner
        .command_strings()
        .into_iter()
        .map(|cmd| cmd.trim_start_matches("sh -c ").to_owned())
        .collect()
}
