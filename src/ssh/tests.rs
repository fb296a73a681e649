//! Tests for SSH argument construction.

use rstest::{fixture, rstest};

use super::*;
use crate::test_support::ScriptedRunner;

#[fixture]
fn target() -> SshTarget {
    SshTarget {
        user: String::from("docker"),
        host: String::from("127.0.0.1"),
        port: 40022,
        identity_file: Some(String::from("/store/machines/minihost/id_rsa")),
    }
}

fn rendered(args: &[OsString]) -> Vec<String> {
    args.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

#[rstest]
fn default_options_disable_prompts_and_host_checks(target: SshTarget) {
    let client = SshClient::new(SshConfig::builtin(), ScriptedRunner::new());

    let args = rendered(&client.build_args(&target, "uptime"));

    assert_eq!(
        args,
        vec![
            "-p",
            "40022",
            "-i",
            "/store/machines/minihost/id_rsa",
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "ConnectTimeout=10",
            "docker@127.0.0.1",
            "uptime",
        ]
    );
}

#[rstest]
fn config_identity_is_used_when_machine_has_none(mut target: SshTarget) {
    target.identity_file = None;
    let config = SshConfig {
        identity_file: Some(String::from("/keys/fallback")),
        strict_host_key_checking: true,
        ..SshConfig::builtin()
    };
    let client = SshClient::new(config, ScriptedRunner::new());

    let args = rendered(&client.build_args(&target, "true"));

    assert!(args.contains(&String::from("/keys/fallback")), "{args:?}");
    assert!(
        !args.contains(&String::from("StrictHostKeyChecking=no")),
        "{args:?}"
    );
}

#[rstest]
fn run_invokes_configured_binary(target: SshTarget) {
    let runner = ScriptedRunner::new();
    runner.push_stdout("up 3 days\n");
    let config = SshConfig {
        ssh_bin: String::from("/usr/bin/ssh"),
        ..SshConfig::builtin()
    };
    let client = SshClient::new(config, runner.clone());

    let result = client.run(&target, "uptime").expect("ssh should run");

    assert_eq!(result.stdout, "up 3 days\n");
    assert_eq!(
        runner.invocations().first().map(|call| call.program.clone()),
        Some(String::from("/usr/bin/ssh"))
    );
}

#[rstest]
#[case("", "ssh_bin")]
#[case("   ", "ssh_bin")]
fn validation_rejects_blank_binary(#[case] value: &str, #[case] field: &str) {
    let config = SshConfig {
        ssh_bin: value.to_owned(),
        ..SshConfig::builtin()
    };

    let err = config.validate().expect_err("blank binary is invalid");

    assert_eq!(
        err,
        SshConfigError::InvalidConfig {
            field: field.to_owned()
        }
    );
    assert!(err.to_string().contains("MINIHOST_SSH_SSH_BIN"), "{err}");
}

#[rstest]
fn expand_tilde_leaves_absolute_paths() {
    assert_eq!(expand_tilde("/absolute/path"), "/absolute/path");
}
