//! Configuration resolution for dd-analyzer
//!
//! The LLM API key is resolved Database → ENV → TOML.

use dd_common::config::TomlConfig;
use dd_common::{Error, Result};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{info, warn};

/// Environment variable holding the LLM API key
pub const LLM_API_KEY_ENV: &str = "DD_LLM_API_KEY";

/// Where a resolved key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Database,
    Environment,
    Toml,
}

impl KeySource {
    pub fn as_str(self) -> &'static str {
        match self {
            KeySource::Database => "database",
            KeySource::Environment => "environment",
            KeySource::Toml => "TOML",
        }
    }
}

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve the LLM API key
///
/// Warns when more than one source holds a key; the highest priority wins.
pub async fn resolve_llm_api_key(db: &SqlitePool, toml_config: &TomlConfig) -> Result<(String, KeySource)> {
    let db_key = crate::db::settings::get_llm_api_key(db).await?;
    let env_key = std::env::var(LLM_API_KEY_ENV).ok();
    let toml_key = toml_config.llm.api_key.clone();

    let candidates = [
        (db_key, KeySource::Database),
        (env_key, KeySource::Environment),
        (toml_key, KeySource::Toml),
    ];
    let valid: Vec<(String, KeySource)> = candidates
        .into_iter()
        .filter_map(|(key, source)| key.filter(|k| is_valid_key(k)).map(|k| (k, source)))
        .collect();

    if valid.len() > 1 {
        let sources: Vec<&str> = valid.iter().map(|(_, s)| s.as_str()).collect();
        warn!(
            "LLM API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            valid[0].1.as_str()
        );
    }

    match valid.into_iter().next() {
        Some((key, source)) => {
            info!("LLM API key loaded from {}", source.as_str());
            Ok((key, source))
        }
        None => Err(Error::Config(format!(
            "LLM API key not configured. Configure one of:\n\
             1. API: POST /api/settings/llm_api_key\n\
             2. Environment: {}=your-key\n\
             3. TOML config: [llm] api_key = \"your-key\"",
            LLM_API_KEY_ENV
        ))),
    }
}

/// Store a key in the TOML config as a backup of the database value
///
/// TOML write failures are logged, not returned.
pub fn sync_key_to_toml(key: &str, toml_path: &Path) {
    let mut config = TomlConfig::load_or_default(toml_path);
    config.llm.api_key = Some(key.to_string());

    match config.write_to(toml_path) {
        Ok(()) => info!("LLM API key synced to TOML: {}", toml_path.display()),
        Err(e) => warn!("TOML write failed (database write succeeded): {}", e),
    }
}

/// Copy a key found in ENV or TOML into the database
pub async fn migrate_key_to_database(
    key: &str,
    source: KeySource,
    db: &SqlitePool,
    toml_path: &Path,
) -> Result<()> {
    if source == KeySource::Database {
        return Ok(());
    }

    crate::db::settings::set_llm_api_key(db, key.to_string()).await?;
    if source == KeySource::Environment {
        sync_key_to_toml(key, toml_path);
    }

    info!("LLM API key migrated from {} to database", source.as_str());
    Ok(())
}
