//! Per-silo storage layer: the upsert protocol and batched flush described
//! in SPEC_FULL.md §4.C, plus the row-level query helpers the query engine
//! (`search.rs`) issues for each of the five retrieval signals.
//!
//! Grounded on the teacher's `ingest::replace_chunks` (delete-then-insert
//! transactional upsert) generalized from one FTS index to the three FTS
//! indices plus vector index this spec requires, and on `db.rs`'s
//! synchronous-but-pooled connection style.

use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::chunk::PreparedFile;
use crate::embedding::vec_to_blob;
use crate::error::StorageError;
use crate::models::{Chunk, SiloMeta, StoredKey};

/// One unit of work for [`flush_prepared_files`]: either replace a file's
/// chunks with freshly prepared ones, or remove it entirely.
pub enum FlushItem {
    Upsert(PreparedFile),
    Delete(StoredKey),
}

/// Wraps an entire batch in one transaction (SPEC_FULL.md §4.C
/// "Batched flush"): if any statement fails — most notably a vector
/// dimension mismatch — the whole batch rolls back and no orphan rows are
/// left in any index.
pub async fn flush_prepared_files(
    pool: &SqlitePool,
    items: Vec<FlushItem>,
    expected_dims: usize,
) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;

    for item in items {
        match item {
            FlushItem::Upsert(prepared) if prepared.chunks.is_empty() => {
                // A file with zero chunks (e.g. parse/chunk error, or now
                // empty) is handled as a delete: stale rows are purged.
                delete_file(&mut tx, &prepared.stored_key).await?;
            }
            FlushItem::Upsert(prepared) => {
                upsert_file(&mut tx, &prepared, expected_dims).await?;
            }
            FlushItem::Delete(stored_key) => {
                delete_file(&mut tx, &stored_key).await?;
            }
        }
    }

    tx.commit().await?;
    Ok(())
}

async fn upsert_file(
    tx: &mut Transaction<'_, Sqlite>,
    prepared: &PreparedFile,
    expected_dims: usize,
) -> Result<(), StorageError> {
    if prepared.embeddings.len() != prepared.chunks.len() {
        return Err(StorageError::DimensionMismatch {
            expected: prepared.chunks.len(),
            got: prepared.embeddings.len(),
        });
    }
    for embedding in &prepared.embeddings {
        if embedding.len() != expected_dims {
            return Err(StorageError::DimensionMismatch {
                expected: expected_dims,
                got: embedding.len(),
            });
        }
    }

    delete_existing_chunks(tx, &prepared.stored_key).await?;
    let file_id = ensure_file_record(tx, &prepared.stored_key).await?;
    let _ = file_id;

    for (chunk, embedding) in prepared.chunks.iter().zip(prepared.embeddings.iter()) {
        insert_chunk(tx, chunk, embedding).await?;
    }

    upsert_mtime(tx, &prepared.stored_key, prepared.mtime_ms as f64).await?;
    Ok(())
}

async fn delete_file(tx: &mut Transaction<'_, Sqlite>, stored_key: &StoredKey) -> Result<(), StorageError> {
    delete_existing_chunks(tx, stored_key).await?;

    sqlx::query("DELETE FROM mtimes WHERE stored_key = ?")
        .bind(stored_key.as_str())
        .execute(&mut **tx)
        .await?;

    if let Some(file_id) = find_file_id(tx, stored_key).await? {
        sqlx::query("DELETE FROM files_fts WHERE rowid = ?")
            .bind(file_id)
            .execute(&mut **tx)
            .await?;
        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(file_id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

/// Step 1-2 of the upsert protocol: unindex and delete every existing
/// chunk row for `stored_key`. The BM25 FTS is external-content, so its
/// delete must carry the old text; deletes from the other two FTS tables
/// and the vector index are keyed by rowid alone.
async fn delete_existing_chunks(
    tx: &mut Transaction<'_, Sqlite>,
    stored_key: &StoredKey,
) -> Result<(), StorageError> {
    let existing: Vec<(i64, String)> = sqlx::query_as("SELECT id, text FROM chunks WHERE file_path = ?")
        .bind(stored_key.as_str())
        .fetch_all(&mut **tx)
        .await?;

    for (id, text) in existing {
        sqlx::query("INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES ('delete', ?, ?)")
            .bind(id)
            .bind(&text)
            .execute(&mut **tx)
            .await?;
        sqlx::query("DELETE FROM chunks_trigram WHERE rowid = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        sqlx::query("DELETE FROM chunks_meta_fts WHERE rowid = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        sqlx::query("DELETE FROM vec_chunks WHERE rowid = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

/// Step 3: ensures a `files`/`files_fts` row exists for `stored_key`,
/// returning its row id.
async fn ensure_file_record(
    tx: &mut Transaction<'_, Sqlite>,
    stored_key: &StoredKey,
) -> Result<i64, StorageError> {
    if let Some(id) = find_file_id(tx, stored_key).await? {
        return Ok(id);
    }

    let basename = stored_key
        .parse()
        .map(|(_, rel)| rel.rsplit('/').next().unwrap_or(rel).to_string())
        .unwrap_or_else(|| stored_key.as_str().to_string());

    let id = sqlx::query("INSERT INTO files (stored_key, basename) VALUES (?, ?)")
        .bind(stored_key.as_str())
        .bind(&basename)
        .execute(&mut **tx)
        .await?
        .last_insert_rowid();

    sqlx::query("INSERT INTO files_fts(rowid, file_path, file_name) VALUES (?, ?, ?)")
        .bind(id)
        .bind(stored_key.as_str())
        .bind(&basename)
        .execute(&mut **tx)
        .await?;

    Ok(id)
}

async fn find_file_id(
    tx: &mut Transaction<'_, Sqlite>,
    stored_key: &StoredKey,
) -> Result<Option<i64>, StorageError> {
    let id: Option<i64> = sqlx::query_scalar("SELECT id FROM files WHERE stored_key = ?")
        .bind(stored_key.as_str())
        .fetch_optional(&mut **tx)
        .await?;
    Ok(id)
}

/// Step 4: insert the embedding (assigning the row id), the chunk row
/// under that id, and its entries in the BM25, trigram, and (if
/// `tags_text` is non-empty) tag FTS indices.
async fn insert_chunk(
    tx: &mut Transaction<'_, Sqlite>,
    chunk: &Chunk,
    embedding: &[f32],
) -> Result<(), StorageError> {
    let blob = vec_to_blob(embedding);
    let id = sqlx::query("INSERT INTO vec_chunks (embedding) VALUES (?)")
        .bind(blob)
        .execute(&mut **tx)
        .await?
        .last_insert_rowid();

    let section_path_json = serde_json::to_string(&chunk.section_path).unwrap_or_else(|_| "[]".to_string());
    let metadata_json = serde_json::to_string(&chunk.metadata).unwrap_or_else(|_| "null".to_string());

    sqlx::query(
        r#"
        INSERT INTO chunks
            (id, file_path, chunk_index, section_path, text, start_line, end_line,
             metadata, content_hash, heading_depth, tags_text)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(chunk.file_path.as_str())
    .bind(chunk.chunk_index)
    .bind(&section_path_json)
    .bind(&chunk.text)
    .bind(chunk.start_line)
    .bind(chunk.end_line)
    .bind(&metadata_json)
    .bind(&chunk.content_hash)
    .bind(chunk.heading_depth)
    .bind(&chunk.tags_text)
    .execute(&mut **tx)
    .await?;

    sqlx::query("INSERT INTO chunks_fts(rowid, text) VALUES (?, ?)")
        .bind(id)
        .bind(&chunk.text)
        .execute(&mut **tx)
        .await?;
    sqlx::query("INSERT INTO chunks_trigram(rowid, text) VALUES (?, ?)")
        .bind(id)
        .bind(&chunk.text)
        .execute(&mut **tx)
        .await?;
    if !chunk.tags_text.is_empty() {
        sqlx::query("INSERT INTO chunks_meta_fts(rowid, tags_text) VALUES (?, ?)")
            .bind(id)
            .bind(&chunk.tags_text)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

/// Step 5: upserts the file's last observed mtime.
async fn upsert_mtime(
    tx: &mut Transaction<'_, Sqlite>,
    stored_key: &StoredKey,
    mtime_ms: f64,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO mtimes (stored_key, mtime_ms) VALUES (?, ?) \
         ON CONFLICT(stored_key) DO UPDATE SET mtime_ms = excluded.mtime_ms",
    )
    .bind(stored_key.as_str())
    .bind(mtime_ms)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ============ Read-side helpers shared by reconciler, search, and status ============

/// The full mtime map, keyed by stored key (SPEC_FULL.md §3 "Mtime map").
pub async fn load_mtimes(pool: &SqlitePool) -> Result<std::collections::HashMap<StoredKey, f64>, StorageError> {
    let rows: Vec<(String, f64)> = sqlx::query_as("SELECT stored_key, mtime_ms FROM mtimes")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(k, v)| (StoredKey::from(k), v)).collect())
}

pub async fn file_count(pool: &SqlitePool) -> Result<i64, StorageError> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM files").fetch_one(pool).await?)
}

pub async fn chunk_count(pool: &SqlitePool) -> Result<i64, StorageError> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM chunks").fetch_one(pool).await?)
}

/// Wipes every row from every content and index table, leaving the schema
/// itself intact. Used to implement a full rebuild without closing and
/// reopening the pool.
pub async fn clear_all(pool: &SqlitePool) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    for table in [
        "chunks_fts",
        "chunks_trigram",
        "chunks_meta_fts",
        "files_fts",
        "vec_chunks",
        "chunks",
        "files",
        "mtimes",
        "meta",
    ] {
        sqlx::query(&format!("DELETE FROM {table}")).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn write_meta(pool: &SqlitePool, meta: &SiloMeta) -> Result<(), StorageError> {
    let entries = [
        ("model", meta.model.clone()),
        ("dimensions", meta.dimensions.to_string()),
        ("created_at", meta.created_at.to_rfc3339()),
        ("version", meta.version.to_string()),
        (
            "config_snapshot",
            serde_json::to_string(&meta.config_snapshot).unwrap_or_else(|_| "null".to_string()),
        ),
    ];
    for (key, value) in entries {
        sqlx::query(
            "INSERT INTO meta (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn read_meta(pool: &SqlitePool) -> Result<Option<SiloMeta>, StorageError> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM meta").fetch_all(pool).await?;
    if rows.is_empty() {
        return Ok(None);
    }
    let get = |k: &str| rows.iter().find(|(key, _)| key == k).map(|(_, v)| v.clone());

    let model = match get("model") {
        Some(m) => m,
        None => return Ok(None),
    };
    let dimensions: usize = get("dimensions").and_then(|v| v.parse().ok()).unwrap_or(0);
    let created_at = get("created_at")
        .and_then(|v| chrono::DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(chrono::Utc::now);
    let version: i32 = get("version").and_then(|v| v.parse().ok()).unwrap_or(1);
    let config_snapshot = get("config_snapshot")
        .and_then(|v| serde_json::from_str(&v).ok())
        .unwrap_or(serde_json::Value::Null);

    Ok(Some(SiloMeta {
        model,
        dimensions,
        created_at,
        version,
        config_snapshot,
    }))
}

/// Loads a full row for each id, preserving the caller's id order (used
/// after RRF ranking picks the top `chunk_limit` ids).
pub async fn load_chunks_by_ids(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<Chunk>, StorageError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT id, file_path, chunk_index, section_path, text, start_line, end_line, \
                metadata, content_hash, heading_depth, tags_text \
         FROM chunks WHERE id IN ({placeholders})"
    );
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;

    let mut by_id = std::collections::HashMap::new();
    for row in rows {
        let id: i64 = row.get("id");
        let section_path: String = row.get("section_path");
        let metadata: String = row.get("metadata");
        let chunk = Chunk {
            id: Some(id),
            file_path: StoredKey::from(row.get::<String, _>("file_path")),
            chunk_index: row.get("chunk_index"),
            section_path: serde_json::from_str(&section_path).unwrap_or_default(),
            text: row.get("text"),
            start_line: row.get("start_line"),
            end_line: row.get("end_line"),
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
            content_hash: row.get("content_hash"),
            heading_depth: row.get("heading_depth"),
            tags_text: row.get("tags_text"),
        };
        by_id.insert(id, chunk);
    }

    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

/// One candidate row from any of the five retrieval signals: a chunk id
/// and the raw score the signal assigned it (before rank conversion).
#[derive(Debug, Clone, Copy)]
pub struct SignalHit {
    pub chunk_id: i64,
    pub raw_score: f64,
}

/// Signal 1: brute-force cosine scan over `vec_chunks`, sorted descending,
/// truncated to `limit`. This is the one signal not expressible as a plain
/// SQL ORDER BY, hence the in-process scan SPEC_FULL.md §4.C documents.
pub async fn vector_signal(pool: &SqlitePool, query_vec: &[f32], limit: usize) -> Result<Vec<SignalHit>, StorageError> {
    let rows: Vec<(i64, Vec<u8>)> = sqlx::query_as("SELECT c.id, v.embedding FROM chunks c JOIN vec_chunks v ON v.rowid = c.id")
        .fetch_all(pool)
        .await?;

    let mut hits: Vec<SignalHit> = rows
        .into_iter()
        .map(|(id, blob)| {
            let vec = crate::embedding::blob_to_vec(&blob);
            let score = crate::embedding::cosine_similarity(query_vec, &vec) as f64;
            SignalHit { chunk_id: id, raw_score: score }
        })
        .collect();

    hits.sort_by(|a, b| b.raw_score.partial_cmp(&a.raw_score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
}

/// Signal 2: BM25 MATCH against `chunks_fts`. FTS5's implicit `rank`
/// column is ascending-better; negated so callers treat every signal's
/// `raw_score` as higher-is-better.
pub async fn bm25_signal(pool: &SqlitePool, fts_query: &str, limit: usize) -> Result<Vec<SignalHit>, StorageError> {
    fts_rank_signal(pool, "chunks_fts", fts_query, limit).await
}

/// Signal 3: trigram substring MATCH against `chunks_trigram`.
pub async fn trigram_signal(pool: &SqlitePool, fts_query: &str, limit: usize) -> Result<Vec<SignalHit>, StorageError> {
    fts_rank_signal(pool, "chunks_trigram", fts_query, limit).await
}

/// Signal 5: BM25 MATCH against `chunks_meta_fts` (tags/aliases/titles).
pub async fn tags_signal(pool: &SqlitePool, fts_query: &str, limit: usize) -> Result<Vec<SignalHit>, StorageError> {
    fts_rank_signal(pool, "chunks_meta_fts", fts_query, limit).await
}

async fn fts_rank_signal(
    pool: &SqlitePool,
    table: &str,
    fts_query: &str,
    limit: usize,
) -> Result<Vec<SignalHit>, StorageError> {
    let sql = format!("SELECT rowid, rank FROM {table} WHERE {table} MATCH ? ORDER BY rank LIMIT ?");
    let result = sqlx::query_as::<_, (i64, f64)>(&sql)
        .bind(fts_query)
        .bind(limit as i64)
        .fetch_all(pool)
        .await;

    // FTS5 syntax errors in a user-supplied query are caught per-signal
    // and drop that signal entirely (SPEC_FULL.md §4.D edge cases).
    match result {
        Ok(rows) => Ok(rows
            .into_iter()
            .map(|(id, rank)| SignalHit { chunk_id: id, raw_score: -rank })
            .collect()),
        Err(sqlx::Error::Database(e)) if e.message().contains("fts5") || e.message().contains("syntax") => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Signal 4: trigram MATCH against `files_fts`, expanded to every chunk
/// belonging to each matched file. Every chunk of one matched file shares
/// that file's rank position, per SPEC_FULL.md §4.D step 3.
pub async fn filepath_signal(pool: &SqlitePool, fts_query: &str, limit: usize) -> Result<Vec<SignalHit>, StorageError> {
    let sql = "SELECT file_path, rank FROM files_fts WHERE files_fts MATCH ? ORDER BY rank LIMIT ?";
    let result = sqlx::query_as::<_, (String, f64)>(sql)
        .bind(fts_query)
        .bind(limit as i64)
        .fetch_all(pool)
        .await;

    let matched_files: Vec<(String, f64)> = match result {
        Ok(rows) => rows,
        Err(sqlx::Error::Database(e)) if e.message().contains("fts5") || e.message().contains("syntax") => {
            return Ok(Vec::new())
        }
        Err(e) => return Err(e.into()),
    };

    let mut hits = Vec::new();
    for (file_path, rank) in matched_files {
        let chunk_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM chunks WHERE file_path = ?")
            .bind(&file_path)
            .fetch_all(pool)
            .await?;
        for id in chunk_ids {
            hits.push(SignalHit { chunk_id: id, raw_score: -rank });
        }
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    async fn migrated_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::migrate(&pool).await.unwrap();
        pool
    }

    fn sample_chunk(file_path: &str, text: &str) -> Chunk {
        Chunk {
            id: None,
            file_path: StoredKey::from(file_path.to_string()),
            chunk_index: 0,
            section_path: vec!["doc".to_string()],
            text: text.to_string(),
            start_line: 1,
            end_line: 1,
            metadata: serde_json::Value::Null,
            content_hash: Chunk::content_hash_of(text),
            heading_depth: 0,
            tags_text: String::new(),
        }
    }

    #[tokio::test]
    async fn upsert_creates_row_coherent_indices() {
        let pool = migrated_pool().await;
        let prepared = PreparedFile {
            stored_key: StoredKey::from("0:a.md".to_string()),
            chunks: vec![sample_chunk("0:a.md", "oldterm specialword")],
            embeddings: vec![vec![1.0, 0.0]],
            mtime_ms: 1000,
        };
        flush_prepared_files(&pool, vec![FlushItem::Upsert(prepared)], 2).await.unwrap();

        let hits = bm25_signal(&pool, "\"oldterm\"", 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vec_chunks").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn upsert_replaces_fts_cleanly() {
        let pool = migrated_pool().await;
        let first = PreparedFile {
            stored_key: StoredKey::from("0:a.md".to_string()),
            chunks: vec![sample_chunk("0:a.md", "oldterm specialword")],
            embeddings: vec![vec![1.0, 0.0]],
            mtime_ms: 1000,
        };
        flush_prepared_files(&pool, vec![FlushItem::Upsert(first)], 2).await.unwrap();

        let second = PreparedFile {
            stored_key: StoredKey::from("0:a.md".to_string()),
            chunks: vec![sample_chunk("0:a.md", "newterm differentword")],
            embeddings: vec![vec![0.0, 1.0]],
            mtime_ms: 2000,
        };
        flush_prepared_files(&pool, vec![FlushItem::Upsert(second)], 2).await.unwrap();

        assert_eq!(bm25_signal(&pool, "\"oldterm\"", 10).await.unwrap().len(), 0);
        assert_eq!(bm25_signal(&pool, "\"newterm\"", 10).await.unwrap().len(), 1);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn failed_upsert_rolls_back_entire_batch() {
        let pool = migrated_pool().await;
        let good = PreparedFile {
            stored_key: StoredKey::from("0:a.md".to_string()),
            chunks: vec![sample_chunk("0:a.md", "hello world")],
            embeddings: vec![vec![1.0, 0.0]],
            mtime_ms: 1000,
        };
        let bad = PreparedFile {
            stored_key: StoredKey::from("0:b.md".to_string()),
            chunks: vec![sample_chunk("0:b.md", "wrong dims")],
            embeddings: vec![vec![1.0, 0.0, 0.0]], // 3 dims, expected 2
            mtime_ms: 1000,
        };

        let result = flush_prepared_files(&pool, vec![FlushItem::Upsert(good), FlushItem::Upsert(bad)], 2).await;
        assert!(result.is_err());

        let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks").fetch_one(&pool).await.unwrap();
        assert_eq!(chunk_count, 0, "failed batch must leave no orphan rows");
        let fts_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks_fts").fetch_one(&pool).await.unwrap();
        assert_eq!(fts_count, 0);
    }

    #[tokio::test]
    async fn delete_removes_file_and_mtime() {
        let pool = migrated_pool().await;
        let prepared = PreparedFile {
            stored_key: StoredKey::from("0:a.md".to_string()),
            chunks: vec![sample_chunk("0:a.md", "hello world")],
            embeddings: vec![vec![1.0, 0.0]],
            mtime_ms: 1000,
        };
        flush_prepared_files(&pool, vec![FlushItem::Upsert(prepared)], 2).await.unwrap();
        flush_prepared_files(
            &pool,
            vec![FlushItem::Delete(StoredKey::from("0:a.md".to_string()))],
            2,
        )
        .await
        .unwrap();

        let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files").fetch_one(&pool).await.unwrap();
        assert_eq!(files, 0);
        let mtimes = load_mtimes(&pool).await.unwrap();
        assert!(mtimes.is_empty());
    }

    #[tokio::test]
    async fn meta_round_trips() {
        let pool = migrated_pool().await;
        let meta = SiloMeta {
            model: "bge-small".to_string(),
            dimensions: 384,
            created_at: chrono::Utc::now(),
            version: crate::models::CURRENT_SCHEMA_VERSION,
            config_snapshot: serde_json::json!({"directories": ["/a"]}),
        };
        write_meta(&pool, &meta).await.unwrap();
        let loaded = read_meta(&pool).await.unwrap().unwrap();
        assert_eq!(loaded.model, "bge-small");
        assert_eq!(loaded.dimensions, 384);
    }
}
