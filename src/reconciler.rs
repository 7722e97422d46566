//! Reconciler: brings a silo's database into agreement with disk.
//!
//! Walks the silo's root directories, diffs against the persisted mtime
//! map, and flushes adds/updates/removes in batches of 50 inside one
//! transaction each, with cooperative cancellation and a yield after every
//! flush so concurrent query traffic isn't starved. See SPEC_FULL.md §4.E.
//!
//! Grounded on the teacher's `connector_fs::scan_filesystem` (walkdir +
//! glob-style basename filtering) for the disk walk and `ingest::run_sync`
//! (checkpoint diff, non-fatal per-item failure) for the catch-up loop
//! shape, generalized from a single linear sync to mtime-based add/update/
//! remove reconciliation.

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chunk::{self, PreparedFile};
use crate::embedding::EmbeddingProvider;
use crate::models::StoredKey;
use crate::storage::{self, FlushItem};

const BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcilePhase {
    Scanning,
    Indexing,
    Removing,
    Done,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ReconcileProgress {
    pub phase: ReconcilePhase,
    pub current: usize,
    pub total: usize,
    pub current_file: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

struct DiskEntry {
    dir_index: usize,
    rel_path: PathBuf,
    absolute_path: PathBuf,
    mtime_ms: i64,
}

/// Matches a basename against an ignore pattern: exact, `prefix*`,
/// `*suffix`, or `*contains*`, case-insensitively (SPEC_FULL.md §4.F).
fn matches_pattern(basename: &str, pattern: &str) -> bool {
    let basename = basename.to_lowercase();
    let pattern = pattern.to_lowercase();

    if let Some(inner) = pattern.strip_prefix('*').and_then(|p| p.strip_suffix('*')) {
        if !inner.is_empty() {
            return basename.contains(inner);
        }
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return basename.ends_with(suffix);
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return basename.starts_with(prefix);
    }
    basename == pattern
}

pub fn is_ignored(basename: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| matches_pattern(basename, p))
}

pub fn extension_allowed(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Walks every root directory, honoring folder/file ignore patterns and
/// the extension whitelist, returning the full stored-key → disk-state map.
fn walk_directories(
    directories: &[PathBuf],
    extensions: &[String],
    ignore: &[String],
    ignore_files: &[String],
) -> HashMap<StoredKey, DiskEntry> {
    let mut disk = HashMap::new();

    for (dir_index, root) in directories.iter().enumerate() {
        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !is_ignored(&name, ignore)
        });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if is_ignored(&name, ignore_files) {
                continue;
            }
            if !extension_allowed(entry.path(), extensions) {
                continue;
            }
            let Ok(rel_path) = entry.path().strip_prefix(root) else {
                continue;
            };
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let mtime_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);

            let rel_path = rel_path.to_path_buf();
            let stored_key = StoredKey::new(dir_index, &rel_path);
            disk.insert(
                stored_key,
                DiskEntry {
                    dir_index,
                    rel_path,
                    absolute_path: entry.path().to_path_buf(),
                    mtime_ms,
                },
            );
        }
    }

    disk
}

/// Brings `pool` into agreement with the contents of `directories`.
/// `should_stop` is polled before each file is prepared; `on_progress`
/// receives a progress update after each batch flush.
#[allow(clippy::too_many_arguments)]
#[tracing::instrument(skip_all)]
pub async fn reconcile(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingProvider,
    directories: &[PathBuf],
    extensions: &[String],
    ignore: &[String],
    ignore_files: &[String],
    max_chunk_tokens: usize,
    dims: usize,
    should_stop: &dyn Fn() -> bool,
    mut on_progress: impl FnMut(ReconcileProgress),
) -> Result<ReconcileSummary> {
    on_progress(ReconcileProgress {
        phase: ReconcilePhase::Scanning,
        current: 0,
        total: 0,
        current_file: None,
    });

    let disk = walk_directories(directories, extensions, ignore, ignore_files);
    let stored_mtimes = storage::load_mtimes(pool).await?;

    let mut to_index: Vec<&StoredKey> = Vec::new();
    let mut added = 0usize;
    let mut updated = 0usize;
    for (key, entry) in &disk {
        match stored_mtimes.get(key) {
            None => {
                added += 1;
                to_index.push(key);
            }
            Some(stored_ms) if (*stored_ms - entry.mtime_ms as f64).abs() > 0.5 => {
                updated += 1;
                to_index.push(key);
            }
            _ => {}
        }
    }

    let to_remove: Vec<StoredKey> = stored_mtimes
        .keys()
        .filter(|key| !disk.contains_key(*key))
        .cloned()
        .collect();

    let total = disk.len() + to_remove.len();
    let mut current = disk.len() - to_index.len();

    on_progress(ReconcileProgress {
        phase: ReconcilePhase::Indexing,
        current,
        total,
        current_file: None,
    });

    let mut batch: Vec<PreparedFile> = Vec::with_capacity(BATCH_SIZE);
    for key in &to_index {
        if should_stop() {
            flush_batch(pool, &mut batch, dims).await?;
            return Ok(ReconcileSummary {
                added,
                updated,
                removed: 0,
            });
        }

        let entry = &disk[*key];
        match chunk::prepare_file(embedder, entry.dir_index, &entry.rel_path, &entry.absolute_path, max_chunk_tokens).await {
            Ok(prepared) => batch.push(prepared),
            Err(e) => {
                tracing::warn!(file = %entry.absolute_path.display(), error = %e, "failed to prepare file, skipping");
                continue;
            }
        }

        if batch.len() >= BATCH_SIZE {
            let flushed = batch.len();
            let last_file = batch.last().map(|p| p.stored_key.as_str().to_string());
            flush_batch(pool, &mut batch, dims).await?;
            current += flushed;
            tokio::task::yield_now().await;
            on_progress(ReconcileProgress {
                phase: ReconcilePhase::Indexing,
                current,
                total,
                current_file: last_file,
            });
        }
    }

    if !batch.is_empty() {
        let flushed = batch.len();
        let last_file = batch.last().map(|p| p.stored_key.as_str().to_string());
        flush_batch(pool, &mut batch, dims).await?;
        current += flushed;
        on_progress(ReconcileProgress {
            phase: ReconcilePhase::Indexing,
            current,
            total,
            current_file: last_file,
        });
    }

    if !to_remove.is_empty() {
        on_progress(ReconcileProgress {
            phase: ReconcilePhase::Removing,
            current,
            total,
            current_file: None,
        });
        let items = to_remove.iter().cloned().map(FlushItem::Delete).collect();
        storage::flush_prepared_files(pool, items, dims).await?;
        current += to_remove.len();
    }

    on_progress(ReconcileProgress {
        phase: ReconcilePhase::Done,
        current,
        total,
        current_file: None,
    });

    Ok(ReconcileSummary {
        added,
        updated,
        removed: to_remove.len(),
    })
}

async fn flush_batch(pool: &SqlitePool, batch: &mut Vec<PreparedFile>, dims: usize) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let items = std::mem::take(batch).into_iter().map(FlushItem::Upsert).collect();
    storage::flush_prepared_files(pool, items, dims).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmbeddingError;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        fn model_name(&self) -> &str {
            "stub"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn never_stop() -> bool {
        false
    }

    #[test]
    fn ignore_patterns_match_all_four_forms() {
        assert!(is_ignored("node_modules", &["node_modules".to_string()]));
        assert!(is_ignored("temp123", &["temp*".to_string()]));
        assert!(is_ignored("build.cache", &["*cache".to_string()]));
        assert!(is_ignored("my-temp-dir", &["*temp*".to_string()]));
        assert!(!is_ignored("src", &["node_modules".to_string()]));
    }

    #[test]
    fn extension_whitelist_is_case_insensitive() {
        let extensions = vec!["md".to_string(), "rs".to_string()];
        assert!(extension_allowed(Path::new("a/b.MD"), &extensions));
        assert!(!extension_allowed(Path::new("a/b.txt"), &extensions));
    }

    #[tokio::test]
    async fn reconcile_indexes_new_files_and_reports_totals() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Hello\nworld").unwrap();
        std::fs::write(dir.path().join("b.md"), "# Other\ntext").unwrap();

        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::migrate(&pool).await.unwrap();

        let embedder = StubEmbedder;
        let directories = vec![dir.path().to_path_buf()];
        let extensions = vec!["md".to_string()];
        let mut events = Vec::new();

        let summary = reconcile(
            &pool,
            &embedder,
            &directories,
            &extensions,
            &[],
            &[],
            200,
            2,
            &never_stop,
            |p| events.push(p.phase),
        )
        .await
        .unwrap();

        assert_eq!(summary.added, 2);
        assert_eq!(summary.updated, 0);
        assert_eq!(storage::file_count(&pool).await.unwrap(), 2);
        assert!(events.contains(&ReconcilePhase::Done));
    }

    #[tokio::test]
    async fn reconcile_removes_files_deleted_from_disk() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("a.md");
        std::fs::write(&file_path, "# Hello\nworld").unwrap();

        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::migrate(&pool).await.unwrap();
        let embedder = StubEmbedder;
        let directories = vec![dir.path().to_path_buf()];
        let extensions = vec!["md".to_string()];

        reconcile(&pool, &embedder, &directories, &extensions, &[], &[], 200, 2, &never_stop, |_| {})
            .await
            .unwrap();
        assert_eq!(storage::file_count(&pool).await.unwrap(), 1);

        std::fs::remove_file(&file_path).unwrap();
        let summary = reconcile(&pool, &embedder, &directories, &extensions, &[], &[], 200, 2, &never_stop, |_| {})
            .await
            .unwrap();

        assert_eq!(summary.removed, 1);
        assert_eq!(storage::file_count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reconcile_is_a_no_op_when_nothing_changed() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Hello\nworld").unwrap();

        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::migrate(&pool).await.unwrap();
        let embedder = StubEmbedder;
        let directories = vec![dir.path().to_path_buf()];
        let extensions = vec!["md".to_string()];

        reconcile(&pool, &embedder, &directories, &extensions, &[], &[], 200, 2, &never_stop, |_| {})
            .await
            .unwrap();
        let summary = reconcile(&pool, &embedder, &directories, &extensions, &[], &[], 200, 2, &never_stop, |_| {})
            .await
            .unwrap();

        assert_eq!(summary.added, 0);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.removed, 0);
    }
}
