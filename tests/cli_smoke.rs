//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

#[test]
fn cli_without_action_prints_usage_and_fails() {
    let mut cmd = cargo_bin_cmd!("rbd-extstorage");
    cmd.assert().code(1).stdout("").stderr(contains("ACTION"));
}

#[test]
fn cli_help_lists_environment_inputs() {
    let mut cmd = cargo_bin_cmd!("rbd-extstorage");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(contains("VOL_CNAME"))
        .stdout(contains("RBD_EXTSTORAGE_"));
}

#[test]
fn cli_version_succeeds() {
    let mut cmd = cargo_bin_cmd!("rbd-extstorage");
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}
