//! Per-silo database schema migrations.
//!
//! Creates every table in SPEC_FULL.md §4.C (`chunks`, `vec_chunks`, three
//! FTS5 indices, `files`, `files_fts`, `mtimes`, `meta`) and is idempotent:
//! safe to call on every silo start, not just `init`. Grounded on the
//! teacher's `migrate::run_migrations` (`CREATE TABLE IF NOT EXISTS` +
//! FTS existence check before `CREATE VIRTUAL TABLE`), extended with the
//! additive-column check SPEC_FULL.md §4.C requires for schema version 2.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::CURRENT_SCHEMA_VERSION;

/// Runs every migration against `pool`. Safe to call repeatedly.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY,
            file_path TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            section_path TEXT NOT NULL DEFAULT '[]',
            text TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            metadata TEXT NOT NULL DEFAULT 'null',
            content_hash TEXT NOT NULL,
            heading_depth INTEGER NOT NULL DEFAULT 0,
            tags_text TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file_path ON chunks(file_path)")
        .execute(pool)
        .await?;

    ensure_column(pool, "chunks", "heading_depth", "INTEGER NOT NULL DEFAULT 0").await?;
    ensure_column(pool, "chunks", "tags_text", "TEXT NOT NULL DEFAULT ''").await?;

    // vec_chunks: a plain rowid table scored by brute-force cosine scan in
    // Rust (SPEC_FULL.md §4.C) rather than a dedicated ANN extension. Its
    // rowid is what becomes chunks.id (assigned on insert, see storage.rs).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vec_chunks (
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    create_fts_if_missing(
        pool,
        "chunks_fts",
        "CREATE VIRTUAL TABLE chunks_fts USING fts5(\
            text, \
            content='chunks', content_rowid='id', \
            tokenize='unicode61'\
        )",
    )
    .await?;

    create_fts_if_missing(
        pool,
        "chunks_trigram",
        "CREATE VIRTUAL TABLE chunks_trigram USING fts5(\
            text, \
            tokenize='trigram'\
        )",
    )
    .await?;

    create_fts_if_missing(
        pool,
        "chunks_meta_fts",
        "CREATE VIRTUAL TABLE chunks_meta_fts USING fts5(\
            tags_text, \
            tokenize='unicode61'\
        )",
    )
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            stored_key TEXT NOT NULL UNIQUE,
            basename TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    create_fts_if_missing(
        pool,
        "files_fts",
        "CREATE VIRTUAL TABLE files_fts USING fts5(\
            file_path, file_name, \
            tokenize='trigram'\
        )",
    )
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mtimes (
            stored_key TEXT PRIMARY KEY,
            mtime_ms REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO meta (key, value) VALUES ('schema_version', ?) \
         ON CONFLICT(key) DO NOTHING",
    )
    .bind(CURRENT_SCHEMA_VERSION.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type IN ('table','view') AND name = ?",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

async fn create_fts_if_missing(pool: &SqlitePool, name: &str, ddl: &str) -> Result<()> {
    if !table_exists(pool, name).await? {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

/// Adds `column` to `table` if `pragma_table_info` doesn't already report
/// it, so older silo databases pick up schema-v2 columns on next open
/// without losing existing rows.
async fn ensure_column(pool: &SqlitePool, table: &str, column: &str, ddl_type: &str) -> Result<()> {
    let rows = sqlx::query_as::<_, (String,)>(&format!("SELECT name FROM pragma_table_info('{table}')"))
        .fetch_all(pool)
        .await?;
    let has_column = rows.iter().any(|(name,)| name == column);
    if !has_column {
        sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {ddl_type}"))
            .execute(pool)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        SqlitePool::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn migrate_creates_every_table() {
        let pool = memory_pool().await;
        migrate(&pool).await.unwrap();

        for table in [
            "chunks",
            "vec_chunks",
            "chunks_fts",
            "chunks_trigram",
            "chunks_meta_fts",
            "files",
            "files_fts",
            "mtimes",
            "meta",
        ] {
            assert!(table_exists(&pool, table).await.unwrap(), "missing table {table}");
        }
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let pool = memory_pool().await;
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn schema_version_is_recorded() {
        let pool = memory_pool().await;
        migrate(&pool).await.unwrap();
        let version: String = sqlx::query_scalar("SELECT value FROM meta WHERE key = 'schema_version'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION.to_string());
    }
}
