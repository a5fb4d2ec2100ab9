//! Database access for dd-analyzer
//!
//! Schema lives in `dd_common::db`; these modules hold the queries. UUIDs are
//! bound as strings and timestamps as RFC3339 text.

pub mod checkpoints;
pub mod documents;
pub mod evaluations;
pub mod projects;
pub mod risks;
pub mod runs;
pub mod settings;

use dd_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open (or create) the database and bring the schema up to date
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    dd_common::db::init_database(db_path).await
}
