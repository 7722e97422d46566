//! Per-silo SQLite connection management.
//!
//! Each silo owns exactly one database file, opened write-ahead-logged so
//! readers never block behind an in-flight writer transaction (SPEC_FULL.md
//! §5). Grounded on the teacher's `db::connect` (WAL pragma, pool sizing),
//! retargeted from one process-wide database to one pool per silo.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Opens (creating if absent) the SQLite database at `db_path` in WAL mode.
/// Does not run migrations; callers invoke [`crate::migrate::migrate`]
/// themselves so `init` and `start` share one code path.
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(false);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
