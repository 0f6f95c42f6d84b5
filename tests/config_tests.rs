//! Tests for adapter configuration loading and validation.

#[path = "common/fake_rbd.rs"]
mod fake_rbd;

use cap_std::{ambient_authority, fs_utf8::Dir};
use fake_rbd::FakeRbd;
use predicates::str::contains;
use rbd_extstorage::config::{AdapterConfig, CONFIG_FILE_NAME, ConfigError};
use rbd_extstorage::logging::DEFAULT_LOG_FILTER;
use rstest::*;

#[fixture]
fn valid_config() -> AdapterConfig {
    AdapterConfig {
        rbd_bin: String::from("/usr/bin/rbd"),
        ceph_conf: None,
        log_filter: String::from(DEFAULT_LOG_FILTER),
        log_json: true,
    }
}

#[rstest]
fn config_validation_rejects_blank_rbd_bin_with_actionable_error(valid_config: AdapterConfig) {
    let cfg = AdapterConfig {
        rbd_bin: String::from("   "),
        ..valid_config
    };

    let error = cfg.validate().expect_err("rbd binary is required");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error");
    };
    assert!(
        message.contains("RBD_EXTSTORAGE_RBD_BIN"),
        "error should mention env var: {message}"
    );
    assert!(
        message.contains(CONFIG_FILE_NAME),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains("rbd_bin"),
        "error should mention TOML key: {message}"
    );
}

#[rstest]
fn config_file_supplies_ceph_conf_for_attach_uri() {
    let rbd = FakeRbd::new();
    let config_path = write_config(
        &rbd,
        &format!(
            "rbd_bin = \"{}\"\nceph_conf = \"/etc/ceph/cluster.conf\"\n",
            rbd.bin()
        ),
    );

    rbd.provider()
        .env_remove("RBD_EXTSTORAGE_RBD_BIN")
        .env("RBD_EXTSTORAGE_CONFIG_PATH", config_path.as_str())
        .arg("attach")
        .assert()
        .success()
        .stdout("/dev/rbd0\nkvm:rbd:ganeti/disk0:conf=/etc/ceph/cluster.conf");
}

#[rstest]
fn environment_overrides_config_file() {
    let rbd = FakeRbd::new();
    let config_path = write_config(&rbd, "rbd_bin = \"/nonexistent/rbd\"\n");

    rbd.provider()
        .env("RBD_EXTSTORAGE_CONFIG_PATH", config_path.as_str())
        .arg("remove")
        .assert()
        .success();

    assert_eq!(rbd.calls(), vec![String::from("rm ganeti/disk0")]);
}

#[rstest]
fn invalid_config_file_value_fails_the_action() {
    let rbd = FakeRbd::new();
    let config_path = write_config(&rbd, "rbd_bin = \"\"\n");

    rbd.provider()
        .env_remove("RBD_EXTSTORAGE_RBD_BIN")
        .env("RBD_EXTSTORAGE_CONFIG_PATH", config_path.as_str())
        .arg("verify")
        .assert()
        .code(1)
        .stderr(contains("RBD_EXTSTORAGE_RBD_BIN"));

    assert!(rbd.calls().is_empty());
}

#[rstest]
fn json_logging_emits_structured_lines() {
    let rbd = FakeRbd::new();

    rbd.provider()
        .env("RBD_EXTSTORAGE_LOG_JSON", "true")
        .arg("remove")
        .assert()
        .success()
        .stderr(contains("\"level\":\"INFO\""));
}

fn write_config(rbd: &FakeRbd, contents: &str) -> camino::Utf8PathBuf {
    Dir::open_ambient_dir(rbd.root(), ambient_authority())
        .unwrap_or_else(|err| panic!("open temp dir: {err}"))
        .write(CONFIG_FILE_NAME, contents)
        .unwrap_or_else(|err| panic!("write config: {err}"));
    rbd.root().join(CONFIG_FILE_NAME)
}

#[rstest]
fn malformed_config_file_fails_the_action() {
    let rbd = FakeRbd::new();
    let config_path = write_config(&rbd, "rbd_bin = [unterminated\n");

    rbd.provider()
        .env("RBD_EXTSTORAGE_CONFIG_PATH", config_path.as_str())
        .arg("verify")
        .assert()
        .code(1)
        .stderr(contains("configuration parsing failed"));

    assert!(rbd.calls().is_empty());
}
