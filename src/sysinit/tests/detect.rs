//! Tests for init system detection and guest file installation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rstest::rstest;

use super::super::*;
use super::{guest, guest_commands, runner};
use crate::test_support::ScriptedRunner;

#[rstest]
fn systemd_wins_when_both_probes_would_succeed(runner: ScriptedRunner) {
    runner.push_stdout("systemd 252\n");
    let driver = guest(&runner);

    let init = InitManager::detect(&driver).expect("systemd should be detected");

    assert_eq!(init.name(), "systemd");
    assert_eq!(guest_commands(&runner), vec!["systemctl --version"]);
}

#[rstest]
fn openrc_is_used_when_systemctl_is_missing(runner: ScriptedRunner) {
    runner.push_failure(127, "systemctl: command not found");
    runner.push_stdout("openrc (OpenRC) 0.45\n");
    let driver = guest(&runner);

    let init = InitManager::detect(&driver).expect("openrc should be detected");

    assert_eq!(init.name(), "OpenRC");
}

#[rstest]
fn missing_init_system_is_an_error(runner: ScriptedRunner) {
    runner.push_failure(127, "not found");
    runner.push_failure(127, "not found");
    let driver = guest(&runner);

    let err = InitManager::detect(&driver).expect_err("nothing to detect");

    assert_eq!(
        err,
        SysInitError::Undetected {
            machine: String::from("minihost")
        }
    );
}

#[rstest]
fn detected_manager_delegates_verbs(runner: ScriptedRunner) {
    runner.push_failure(127, "not found");
    runner.push_success();
    runner.push_success();
    let driver = guest(&runner);

    let init = InitManager::detect(&driver).expect("openrc should be detected");
    init.restart("docker").expect("restart should succeed");

    assert_eq!(
        guest_commands(&runner).last().map(String::as_str),
        Some("sudo service docker restart")
    );
}

#[rstest]
fn guest_files_are_written_base64_encoded(runner: ScriptedRunner) {
    runner.push_success();
    let driver = guest(&runner);
    let file = GuestFile::new("/etc/init.d/docker", "#!/bin/bash\necho 'hi'\n", "0755");

    write_guest_file(&driver, &file).expect("write should succeed");

    let encoded = STANDARD.encode("#!/bin/bash\necho 'hi'\n");
    assert_eq!(
        guest_commands(&runner),
        vec![format!(
            "sudo mkdir -p /etc/init.d && printf %s {encoded} | base64 -d | sudo tee /etc/init.d/docker >/dev/null && sudo chmod 0755 /etc/init.d/docker"
        )]
    );
}
