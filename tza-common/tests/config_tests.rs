//! Integration tests for configuration resolution and graceful degradation
//!
//! Tests that manipulate TZA_DATA_DIR or TZA_CONFIG are marked with #[serial]
//! so they run sequentially, not in parallel.

use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tza_common::config::{
    load_toml_config, resolve_data_dir, TomlConfig, CONFIG_PATH_ENV, DATA_DIR_ENV,
};
use tza_common::Error;

#[test]
#[serial]
fn test_cli_arg_takes_precedence_over_env_and_toml() {
    env::set_var(DATA_DIR_ENV, "/tmp/tza-from-env");
    let toml_config = TomlConfig {
        data_dir: Some(PathBuf::from("/tmp/tza-from-toml")),
        ..Default::default()
    };

    let resolved = resolve_data_dir(Some(Path::new("/tmp/tza-from-cli")), &toml_config);
    assert_eq!(resolved, PathBuf::from("/tmp/tza-from-cli"));

    env::remove_var(DATA_DIR_ENV);
}

#[test]
#[serial]
fn test_env_var_takes_precedence_over_toml() {
    env::set_var(DATA_DIR_ENV, "/tmp/tza-from-env");
    let toml_config = TomlConfig {
        data_dir: Some(PathBuf::from("/tmp/tza-from-toml")),
        ..Default::default()
    };

    let resolved = resolve_data_dir(None, &toml_config);
    assert_eq!(resolved, PathBuf::from("/tmp/tza-from-env"));

    env::remove_var(DATA_DIR_ENV);
}

#[test]
#[serial]
fn test_toml_used_when_no_cli_or_env() {
    env::remove_var(DATA_DIR_ENV);
    let toml_config = TomlConfig {
        data_dir: Some(PathBuf::from("/tmp/tza-from-toml")),
        ..Default::default()
    };

    let resolved = resolve_data_dir(None, &toml_config);
    assert_eq!(resolved, PathBuf::from("/tmp/tza-from-toml"));
}

#[test]
#[serial]
fn test_default_data_dir_is_non_empty() {
    env::remove_var(DATA_DIR_ENV);

    let resolved = resolve_data_dir(None, &TomlConfig::default());
    assert!(!resolved.as_os_str().is_empty());
}

#[test]
#[serial]
fn test_explicit_missing_config_is_an_error() {
    env::remove_var(CONFIG_PATH_ENV);
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope.toml");

    let result = load_toml_config(Some(&missing));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_explicit_config_is_loaded() {
    env::remove_var(CONFIG_PATH_ENV);
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
data_dir = "/srv/tza"

[archive]
concurrency = 2
gateway = "https://ipfs.io/ipfs"

[discovery]
spider_delay_ms = 1000
"#,
    )
    .unwrap();

    let config = load_toml_config(Some(&path)).unwrap();
    assert_eq!(config.data_dir, Some(PathBuf::from("/srv/tza")));
    assert_eq!(config.archive.concurrency, 2);
    assert_eq!(config.archive.gateway, "https://ipfs.io/ipfs");
    assert_eq!(config.archive.rate_per_minute, 12);
    assert_eq!(config.discovery.spider_delay_ms, 1000);
}

#[test]
#[serial]
fn test_config_path_from_env() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("env.toml");
    std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();
    env::set_var(CONFIG_PATH_ENV, &path);

    let config = load_toml_config(None).unwrap();
    assert_eq!(config.logging.level, "debug");

    env::remove_var(CONFIG_PATH_ENV);
}

#[test]
#[serial]
fn test_invalid_values_are_rejected_at_load() {
    env::remove_var(CONFIG_PATH_ENV);
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bad.toml");
    std::fs::write(&path, "[archive]\nrate_per_minute = 0\n").unwrap();

    let result = load_toml_config(Some(&path));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_malformed_toml_is_rejected() {
    env::remove_var(CONFIG_PATH_ENV);
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "[archive\nconcurrency = ").unwrap();

    assert!(load_toml_config(Some(&path)).is_err());
}
