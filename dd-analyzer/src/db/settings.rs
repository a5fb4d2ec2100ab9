//! Settings database operations
//!
//! Key/value accessors for the `settings` table.

use dd_common::{Error, Result};
use sqlx::SqlitePool;

pub const LLM_API_KEY: &str = "llm_api_key";
pub const CLASSIFIER_AUTO_ACCEPT: &str = "classifier_auto_accept";
pub const CLASSIFIER_REVIEW_FLOOR: &str = "classifier_review_floor";

/// LLM API key stored via the settings API
pub async fn get_llm_api_key(db: &SqlitePool) -> Result<Option<String>> {
    get_setting::<String>(db, LLM_API_KEY).await
}

pub async fn set_llm_api_key(db: &SqlitePool, key: String) -> Result<()> {
    set_setting(db, LLM_API_KEY, key).await
}

/// Classifier confidence at or above which a document is `classified`
///
/// **Default:** 0.6
pub async fn get_classifier_auto_accept(db: &SqlitePool) -> Result<f64> {
    get_setting(db, CLASSIFIER_AUTO_ACCEPT)
        .await
        .map(|opt| opt.unwrap_or(0.6))
}

/// Classifier confidence below which a document is `unclassified`
///
/// **Default:** 0.25
pub async fn get_classifier_review_floor(db: &SqlitePool) -> Result<f64> {
    get_setting(db, CLASSIFIER_REVIEW_FLOOR)
        .await
        .map(|opt| opt.unwrap_or(0.25))
}

/// Generic setting getter
pub async fn get_setting<T>(db: &SqlitePool, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &SqlitePool, key: &str, value: T) -> Result<()>
where
    T: ToString,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}
