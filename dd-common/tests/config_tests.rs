//! Root folder resolution and TOML config tests
//!
//! Tests touching DD_ROOT_FOLDER / DD_ROOT run under #[serial].

use dd_common::config::{
    RootFolderInitializer, RootFolderResolver, TomlConfig, ROOT_ENV, ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::path::PathBuf;

fn clear_env() {
    std::env::remove_var(ROOT_FOLDER_ENV);
    std::env::remove_var(ROOT_ENV);
}

#[test]
#[serial]
fn test_cli_argument_wins_over_env() {
    clear_env();
    std::env::set_var(ROOT_FOLDER_ENV, "/tmp/from-env");

    let root = RootFolderResolver::new("dd-analyzer")
        .with_cli_arg(Some(PathBuf::from("/tmp/from-cli")))
        .resolve();
    assert_eq!(root, PathBuf::from("/tmp/from-cli"));

    clear_env();
}

#[test]
#[serial]
fn test_primary_env_var_before_alternative() {
    clear_env();
    std::env::set_var(ROOT_FOLDER_ENV, "/tmp/primary");
    std::env::set_var(ROOT_ENV, "/tmp/alternative");

    let root = RootFolderResolver::new("dd-analyzer").resolve();
    assert_eq!(root, PathBuf::from("/tmp/primary"));

    std::env::remove_var(ROOT_FOLDER_ENV);
    let root = RootFolderResolver::new("dd-analyzer").resolve();
    assert_eq!(root, PathBuf::from("/tmp/alternative"));

    clear_env();
}

#[test]
#[serial]
fn test_blank_env_var_is_ignored() {
    clear_env();
    std::env::set_var(ROOT_FOLDER_ENV, "   ");

    let root = RootFolderResolver::new("dd-analyzer-test-no-config").resolve();
    assert_ne!(root, PathBuf::from("   "));

    clear_env();
}

#[test]
fn test_partial_toml_uses_section_defaults() {
    let config: TomlConfig = toml::from_str(
        r#"
        [llm]
        model = "gpt-4o"

        [pipeline]
        review_gates = true
        "#,
    )
    .unwrap();

    assert_eq!(config.llm.model, "gpt-4o");
    assert_eq!(config.llm.max_retries, 3);
    assert!(config.pipeline.review_gates);
    assert_eq!(config.pipeline.max_concurrent_documents, 4);
    assert_eq!(config.server.port, 5740);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_load_or_default_tolerates_missing_and_invalid_files() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("missing.toml");
    assert_eq!(TomlConfig::load_or_default(&missing), TomlConfig::default());

    let invalid = dir.path().join("invalid.toml");
    std::fs::write(&invalid, "this is = = not toml").unwrap();
    assert_eq!(TomlConfig::load_or_default(&invalid), TomlConfig::default());
}

#[test]
fn test_write_then_load_preserves_api_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("dd-analyzer.toml");

    let mut config = TomlConfig::default();
    config.llm.api_key = Some("sk-test".to_string());
    config.ingest.max_files = 10;
    config.write_to(&path).unwrap();

    let loaded = TomlConfig::from_file(&path).unwrap();
    assert_eq!(loaded.llm.api_key.as_deref(), Some("sk-test"));
    assert_eq!(loaded.ingest.max_files, 10);
}

#[test]
fn test_initializer_layout() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("dd-root");
    let initializer = RootFolderInitializer::new(root.clone());

    assert!(!initializer.database_exists());
    initializer.ensure_directory_exists().unwrap();
    // idempotent
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert!(initializer.documents_dir().is_dir());
    assert_eq!(initializer.database_path(), root.join("dd.db"));
    assert_eq!(
        initializer.config_path("dd-analyzer"),
        root.join("dd-analyzer.toml")
    );
}
