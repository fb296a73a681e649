//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn isolated_home() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"))
}

#[test]
fn cli_without_arguments_prints_usage() {
    let mut cmd = cargo_bin_cmd!("minihost");
    cmd.env_remove("MINIHOST_PROFILE")
        .assert()
        .code(64)
        .stdout("")
        .stderr(predicate::str::contains("Usage: minihost"));
}

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("minihost");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("start")
                .and(predicate::str::contains("status"))
                .and(predicate::str::contains("mount")),
        );
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let mut cmd = cargo_bin_cmd!("minihost");
    cmd.args(["start", "--no-such-flag"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("--no-such-flag"));
}

#[test]
fn status_of_a_missing_profile_reports_no_input() {
    let home = isolated_home();
    let mut cmd = cargo_bin_cmd!("minihost");
    cmd.env("HOME", home.path())
        .env("MINIHOST_HOME", home.path())
        .args(["status", "--profile", "ghost"])
        .assert()
        .code(66)
        .stdout("")
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn invalid_configuration_names_its_source() {
    let home = isolated_home();
    let mut cmd = cargo_bin_cmd!("minihost");
    cmd.env("HOME", home.path())
        .env("MINIHOST_HOME", home.path())
        .args(["start", "--driver", "virtualbox", "--memory", "512"])
        .assert()
        .code(64)
        .stderr(
            predicate::str::contains("usable minimum of 1800MB")
                .and(predicate::str::contains("MINIHOST_MEMORY_MB")),
        );
}

#[test]
fn mount_rejects_a_missing_separator() {
    let home = isolated_home();
    let mut cmd = cargo_bin_cmd!("minihost");
    cmd.env("HOME", home.path())
        .env("MINIHOST_HOME", home.path())
        .args(["mount", "/just/a/path"])
        .assert()
        .code(64);
}

#[test]
fn mount_rejects_a_missing_source_directory() {
    let home = isolated_home();
    let missing = home.path().join("does-not-exist");
    let mut cmd = cargo_bin_cmd!("minihost");
    cmd.env("HOME", home.path())
        .env("MINIHOST_HOME", home.path())
        .arg("mount")
        .arg(format!("{}:/mnt/data", missing.display()))
        .assert()
        .code(66);
}

#[test]
fn delete_of_a_missing_profile_succeeds() {
    let home = isolated_home();
    let mut cmd = cargo_bin_cmd!("minihost");
    cmd.env("HOME", home.path())
        .env("MINIHOST_HOME", home.path())
        .args(["delete", "--profile", "ghost"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ghost"));
}
