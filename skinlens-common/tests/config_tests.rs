//! Tests for TOML configuration loading, atomic writes and root folder resolution
//!
//! Tests that manipulate SKINLENS_ROOT_FOLDER are marked #[serial] so they do
//! not race on the process environment.

use serial_test::serial;
use skinlens_common::config::{
    load_toml_config, write_toml_config, LoggingConfig, RootFolderInitializer, RootFolderResolver,
    TomlConfig, ROOT_FOLDER_ENV,
};
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_missing_config_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.toml");

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config, TomlConfig::default());
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.cache.ttl_seconds, 300);
    assert_eq!(config.cache.fallback_ttl_seconds, 30);
    assert_eq!(config.cache.capacity, 100);
    assert_eq!(config.orchestration.clinical_fanout, 3);
}

#[test]
fn test_partial_config_fills_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("skinlens-ai.toml");
    std::fs::write(
        &path,
        r#"
port = 6000

[providers]
huggingface_api_key = "hf-key"

[orchestration]
clinical_fanout = 2
partial_ensemble_penalty = 0.9
"#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.port, 6000);
    assert_eq!(config.providers.huggingface_api_key.as_deref(), Some("hf-key"));
    assert!(config.providers.gemini_api_key.is_none());
    assert_eq!(config.orchestration.clinical_fanout, 2);
    assert_eq!(config.orchestration.partial_ensemble_penalty, 0.9);
    // Untouched fields keep their defaults
    assert_eq!(config.orchestration.provider_timeout_ms, 8_000);
    assert_eq!(config.orchestration.breaker_failure_threshold, 3);
}

#[test]
fn test_malformed_config_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "port = \"not a number\"").unwrap();

    assert!(load_toml_config(&path).is_err());
}

#[test]
fn test_atomic_write_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("nested").join("skinlens-ai.toml");

    let mut config = TomlConfig::default();
    config.root_folder = Some(PathBuf::from("/srv/skinlens"));
    config.logging = LoggingConfig {
        level: "debug".to_string(),
        file: None,
    };
    config.providers.gemini_api_key = Some("gemini-key".to_string());

    write_toml_config(&config, &target).unwrap();

    assert!(target.exists());
    assert!(!target.with_extension("toml.tmp").exists());

    let parsed = load_toml_config(&target).unwrap();
    assert_eq!(parsed, config);
}

#[test]
#[cfg(unix)]
fn test_atomic_write_sets_permissions_0600() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("secret.toml");
    write_toml_config(&TomlConfig::default(), &target).unwrap();

    let mode = std::fs::metadata(&target).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
#[serial]
fn test_resolver_cli_arg_wins() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/skinlens-env");

    let root = RootFolderResolver::new("test-module")
        .with_cli_arg(Some(PathBuf::from("/tmp/skinlens-cli")))
        .with_toml_root(Some(PathBuf::from("/tmp/skinlens-toml")))
        .resolve();
    assert_eq!(root, PathBuf::from("/tmp/skinlens-cli"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_env_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/skinlens-env");

    let root = RootFolderResolver::new("test-module")
        .with_toml_root(Some(PathBuf::from("/tmp/skinlens-toml")))
        .resolve();
    assert_eq!(root, PathBuf::from("/tmp/skinlens-env"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_falls_back_to_default() {
    env::remove_var(ROOT_FOLDER_ENV);

    let root = RootFolderResolver::new("test-module").resolve();
    assert_eq!(root, skinlens_common::config::default_root_folder());

    let root = RootFolderResolver::new("test-module")
        .with_toml_root(Some(PathBuf::from("/tmp/skinlens-toml")))
        .resolve();
    assert_eq!(root, PathBuf::from("/tmp/skinlens-toml"));
}

#[test]
fn test_initializer_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("a").join("b");

    let initializer = RootFolderInitializer::new(root.clone());
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert_eq!(initializer.database_path(), root.join("skinlens.db"));
}
