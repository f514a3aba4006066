//! Config error-message, atomic-write and validation integration tests.
//! Storage: ~/.envsync/config.yaml

use assert_fs::prelude::*;
use envsync_core::{
    config::{self, AgentConfig},
    ConfigError,
};
use predicates::prelude::predicate;
use std::fs;

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
    assert!(err.to_string().contains("envsync init"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".envsync");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("config.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"), "must contain file path, got: {err}");
}

#[test]
fn load_config_missing_required_section_is_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".envsync/config.yaml")
        .write_str("remote: {url: https://remote}\n")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[test]
fn load_rejects_empty_remote_url() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut cfg = AgentConfig::default();
    cfg.remote.url = String::new();
    config::save_at(home.path(), &cfg).expect("save");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
    assert!(err.to_string().contains("remote.url"));
}

// ---------------------------------------------------------------------------
// 2. Save
// ---------------------------------------------------------------------------

#[test]
fn save_writes_yaml_and_leaves_no_tmp_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = config::save_at(home.path(), &AgentConfig::default()).expect("save");

    home.child(".envsync/config.yaml")
        .assert(predicate::str::contains("reconcile_interval_secs: 5"));
    home.child(".envsync/config.yaml.tmp")
        .assert(predicate::path::missing());
    assert_eq!(path, config::config_path_at(home.path()));
}

#[cfg(unix)]
#[test]
fn saved_config_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = config::save_at(home.path(), &AgentConfig::default()).expect("save");
    let mode = fs::metadata(path).expect("metadata").permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);
}
