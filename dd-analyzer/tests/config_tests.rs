//! LLM API key resolution
//!
//! Tests touching DD_LLM_API_KEY run with #[serial] so they do not race on
//! the process environment.

use serial_test::serial;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use dd_analyzer::config::{
    is_valid_key, migrate_key_to_database, resolve_llm_api_key, KeySource, LLM_API_KEY_ENV,
};
use dd_analyzer::db::settings::{get_llm_api_key, set_llm_api_key};
use dd_common::config::TomlConfig;

async fn settings_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .unwrap();
    dd_common::db::create_settings_table(&pool).await.unwrap();
    pool
}

fn toml_with_key(key: Option<&str>) -> TomlConfig {
    let mut config = TomlConfig::default();
    config.llm.api_key = key.map(str::to_string);
    config
}

#[tokio::test]
#[serial]
async fn test_database_overrides_env_and_toml() {
    let pool = settings_pool().await;
    set_llm_api_key(&pool, "db-key".to_string()).await.unwrap();
    std::env::set_var(LLM_API_KEY_ENV, "env-key");

    let result = resolve_llm_api_key(&pool, &toml_with_key(Some("toml-key"))).await;
    std::env::remove_var(LLM_API_KEY_ENV);

    assert_eq!(result.unwrap(), ("db-key".to_string(), KeySource::Database));
}

#[tokio::test]
#[serial]
async fn test_env_fallback_when_database_empty() {
    let pool = settings_pool().await;
    std::env::set_var(LLM_API_KEY_ENV, "env-key");

    let result = resolve_llm_api_key(&pool, &toml_with_key(Some("toml-key"))).await;
    std::env::remove_var(LLM_API_KEY_ENV);

    assert_eq!(result.unwrap(), ("env-key".to_string(), KeySource::Environment));
}

#[tokio::test]
#[serial]
async fn test_toml_fallback() {
    let pool = settings_pool().await;
    std::env::remove_var(LLM_API_KEY_ENV);

    let result = resolve_llm_api_key(&pool, &toml_with_key(Some("toml-key"))).await;
    assert_eq!(result.unwrap(), ("toml-key".to_string(), KeySource::Toml));
}

#[tokio::test]
#[serial]
async fn test_whitespace_keys_are_skipped() {
    let pool = settings_pool().await;
    set_llm_api_key(&pool, "   ".to_string()).await.unwrap();
    std::env::set_var(LLM_API_KEY_ENV, "");

    let result = resolve_llm_api_key(&pool, &toml_with_key(Some("toml-key"))).await;
    std::env::remove_var(LLM_API_KEY_ENV);

    assert_eq!(result.unwrap().1, KeySource::Toml);
}

#[tokio::test]
#[serial]
async fn test_missing_key_error_lists_sources() {
    let pool = settings_pool().await;
    std::env::remove_var(LLM_API_KEY_ENV);

    let err = resolve_llm_api_key(&pool, &toml_with_key(None))
        .await
        .unwrap_err()
        .to_string();
    assert!(err.contains("/api/settings/llm_api_key"));
    assert!(err.contains(LLM_API_KEY_ENV));
    assert!(err.contains("[llm]"));
}

#[tokio::test]
#[serial]
async fn test_env_key_migrates_to_database_and_toml() {
    let pool = settings_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let toml_path = dir.path().join("dd-analyzer.toml");

    migrate_key_to_database("env-key", KeySource::Environment, &pool, &toml_path)
        .await
        .unwrap();

    assert_eq!(get_llm_api_key(&pool).await.unwrap().as_deref(), Some("env-key"));
    let written = TomlConfig::from_file(&toml_path).unwrap();
    assert_eq!(written.llm.api_key.as_deref(), Some("env-key"));
}

#[tokio::test]
async fn test_toml_key_migrates_to_database_only() {
    let pool = settings_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let toml_path = dir.path().join("dd-analyzer.toml");

    migrate_key_to_database("toml-key", KeySource::Toml, &pool, &toml_path)
        .await
        .unwrap();

    assert_eq!(get_llm_api_key(&pool).await.unwrap().as_deref(), Some("toml-key"));
    assert!(!toml_path.exists());
}

#[test]
fn test_key_validation() {
    assert!(is_valid_key("sk-abc"));
    assert!(is_valid_key("  padded  "));
    assert!(!is_valid_key(""));
    assert!(!is_valid_key(" \t\n"));
}
