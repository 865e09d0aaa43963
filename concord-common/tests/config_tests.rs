//! Tests for TOML config loading and root folder resolution
//!
//! Tests that touch CONCORD_ROOT_FOLDER are marked #[serial] so they do not
//! race on the process environment.

use concord_common::config::{
    load_toml_config, write_toml_config, LoggingConfig, RootFolderInitializer, RootFolderResolver,
    TomlConfig, ROOT_FOLDER_ENV,
};
use concord_common::Error;
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_missing_config_file_yields_defaults() {
    let temp = TempDir::new().unwrap();
    let config = load_toml_config(&temp.path().join("absent.toml")).unwrap();
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_malformed_config_file_is_error() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("concord.toml");
    std::fs::write(&path, "[matching\nmin_match_score = ").unwrap();

    let result = load_toml_config(&path);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_wrong_field_type_is_error() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("concord.toml");
    std::fs::write(&path, "[repair]\nmax_attempts = \"three\"\n").unwrap();

    assert!(matches!(load_toml_config(&path), Err(Error::Config(_))));
}

#[test]
fn test_write_then_load_preserves_sections() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("concord.toml");

    let mut config = TomlConfig::default();
    config.root_folder = Some(PathBuf::from("/srv/concord"));
    config.logging = LoggingConfig {
        level: "debug".to_string(),
        file: None,
    };
    config.matching.shingle_width = Some(4);
    config.concurrency.max_concurrent_judges = Some(1);
    config.judge.endpoint = Some("http://127.0.0.1:9100/judge".to_string());

    write_toml_config(&config, &path).unwrap();
    assert!(!path.with_extension("toml.tmp").exists());

    let loaded = load_toml_config(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
#[serial]
fn test_cli_argument_wins_over_env() {
    env::set_var(ROOT_FOLDER_ENV, "/from/env");

    let resolver = RootFolderResolver::new("test").with_cli_arg(Some(PathBuf::from("/from/cli")));
    assert_eq!(resolver.resolve(), PathBuf::from("/from/cli"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_env_wins_over_toml() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("concord.toml");
    std::fs::write(&path, "root_folder = \"/from/toml\"\n").unwrap();
    env::set_var(ROOT_FOLDER_ENV, "/from/env");

    let resolver = RootFolderResolver::new("test").with_config_path(Some(path));
    assert_eq!(resolver.resolve(), PathBuf::from("/from/env"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_toml_root_folder_used_without_overrides() {
    env::remove_var(ROOT_FOLDER_ENV);
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("concord.toml");
    std::fs::write(&path, "root_folder = \"/from/toml\"\n").unwrap();

    let resolver = RootFolderResolver::new("test").with_config_path(Some(path));
    assert_eq!(resolver.resolve(), PathBuf::from("/from/toml"));
}

#[test]
fn test_initializer_creates_directory() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("a").join("b");

    let init = RootFolderInitializer::new(root.clone());
    init.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert_eq!(init.database_path(), root.join("concord.db"));
}
