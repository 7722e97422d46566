//! Silo lifecycle, the process-wide indexing token, and the activity feed.
//!
//! Grounded on the teacher's `embedding` isolate registry (`OnceLock` +
//! `Mutex` holding a process-wide table, SPEC_FULL.md §4.A) for the shape
//! of a shared, lazily-populated singleton, generalized here from "one
//! entry per model" to "one entry per silo" plus a single FIFO-waited
//! mutex shared by every entry (SPEC_FULL.md §4.G).

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::config::{Config, SiloConfig};
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::migrate;
use crate::models::{ActivityEvent, ActivityEventType, SiloMeta, SiloState};
use crate::reconciler::{self, ReconcileProgress, ReconcileSummary};
use crate::watcher::{self, SiloWatcher};

const ACTIVITY_FEED_CAPACITY: usize = 200;
const MAX_CHUNK_TOKENS: usize = 400;

/// Point-in-time status returned to callers (§4.G `get_status`).
#[derive(Debug, Clone)]
pub struct SiloStatus {
    pub name: String,
    pub state: SiloState,
    pub file_count: i64,
    pub chunk_count: i64,
    pub db_size_bytes: u64,
    pub last_update: Option<chrono::DateTime<chrono::Utc>>,
    pub watcher_running: bool,
    pub error_message: Option<String>,
    pub reconcile_progress: Option<ReconcileProgress>,
    pub model_mismatch: bool,
    pub resolved_db_path: PathBuf,
    pub resolved_model: String,
}

struct SiloRuntime {
    name: String,
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
    directories: Vec<PathBuf>,
    extensions: Vec<String>,
    ignore: Vec<String>,
    ignore_files: Vec<String>,
    db_path: PathBuf,
    resolved_model: String,
    state: RwLock<SiloState>,
    error_message: RwLock<Option<String>>,
    reconcile_progress: RwLock<Option<ReconcileProgress>>,
    should_stop: Arc<std::sync::atomic::AtomicBool>,
    watcher_handle: Mutex<Option<Arc<Mutex<SiloWatcher>>>>,
    ticker_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    drain_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Owns every configured silo plus the global indexing token and the
/// cross-silo activity feed. One instance per process.
pub struct SiloManager {
    silos: RwLock<HashMap<String, Arc<SiloRuntime>>>,
    indexing_token: Arc<Mutex<()>>,
    indexing_waiters: Mutex<VecDeque<String>>,
    activity_feed: Mutex<VecDeque<ActivityEvent>>,
    activity_tx: tokio::sync::broadcast::Sender<ActivityEvent>,
    user_data_dir: PathBuf,
}

impl SiloManager {
    /// Builds a manager from the parsed configuration but does not open
    /// any database or start any watcher; call [`Self::start_all`] next.
    pub fn new(user_data_dir: PathBuf) -> Self {
        let (activity_tx, _rx) = tokio::sync::broadcast::channel(256);
        SiloManager {
            silos: RwLock::new(HashMap::new()),
            indexing_token: Arc::new(Mutex::new(())),
            indexing_waiters: Mutex::new(VecDeque::new()),
            activity_feed: Mutex::new(VecDeque::with_capacity(ACTIVITY_FEED_CAPACITY)),
            activity_tx,
            user_data_dir,
        }
    }

    pub fn subscribe_activity(&self) -> tokio::sync::broadcast::Receiver<ActivityEvent> {
        self.activity_tx.subscribe()
    }

    pub async fn recent_activity(&self, limit: usize) -> Vec<ActivityEvent> {
        let feed = self.activity_feed.lock().await;
        feed.iter().rev().take(limit).cloned().collect()
    }

    /// Opens every non-sleeping silo's database, migrates it, reconciles
    /// it once, and starts its watcher. Sleeping silos are registered but
    /// left `stopped` until [`Self::start_silo`] is called explicitly.
    pub async fn start_all(self: &Arc<Self>, config: &Config) -> Result<()> {
        for (name, silo_config) in &config.silos {
            self.register(name, silo_config, config).await?;
            if !silo_config.sleeping {
                self.start_silo(name).await?;
            }
        }
        Ok(())
    }

    async fn register(&self, name: &str, silo_config: &SiloConfig, config: &Config) -> Result<()> {
        let db_path = silo_config.resolved_db_path(&self.user_data_dir);
        let resolved_model = silo_config.effective_model(&config.embeddings).to_string();

        let pool = db::connect(&db_path).await.with_context(|| format!("opening database for silo '{name}'"))?;
        migrate::migrate(&pool).await?;

        let mut embed_cfg = config.embeddings.clone();
        embed_cfg.model = resolved_model.clone();
        let embedder: Arc<dyn EmbeddingProvider> =
            embedding::create_provider(&embed_cfg).unwrap_or_else(|_| Arc::new(embedding::DisabledProvider));

        let model_mismatch = match crate::storage::read_meta(&pool).await? {
            Some(meta) => meta.model != resolved_model,
            None => {
                let meta = SiloMeta {
                    model: resolved_model.clone(),
                    dimensions: embedder.dims(),
                    created_at: chrono::Utc::now(),
                    version: crate::models::CURRENT_SCHEMA_VERSION,
                    config_snapshot: serde_json::json!({
                        "directories": silo_config.directories,
                        "extensions": silo_config.effective_extensions(&config.defaults),
                    }),
                };
                crate::storage::write_meta(&pool, &meta).await?;
                false
            }
        };

        let runtime = Arc::new(SiloRuntime {
            name: name.to_string(),
            pool,
            embedder,
            directories: silo_config.directories.clone(),
            extensions: silo_config.effective_extensions(&config.defaults).to_vec(),
            ignore: silo_config.effective_ignore(&config.defaults).to_vec(),
            ignore_files: silo_config.effective_ignore_files(&config.defaults).to_vec(),
            db_path,
            resolved_model,
            state: RwLock::new(SiloState::Stopped),
            error_message: RwLock::new(if model_mismatch {
                Some("configured model differs from the database's recorded model".to_string())
            } else {
                None
            }),
            reconcile_progress: RwLock::new(None),
            should_stop: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            watcher_handle: Mutex::new(None),
            ticker_task: Mutex::new(None),
            drain_task: Mutex::new(None),
        });

        self.silos.write().await.insert(name.to_string(), runtime);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Arc<SiloRuntime>> {
        self.silos.read().await.get(name).cloned().ok_or_else(|| anyhow!("no such silo: {name}"))
    }

    /// Starts (or restarts) a silo: runs one reconciliation pass under the
    /// global indexing token, then launches its filesystem watcher.
    pub async fn start_silo(self: &Arc<Self>, name: &str) -> Result<()> {
        let runtime = self.get(name).await?;
        runtime.should_stop.store(false, std::sync::atomic::Ordering::SeqCst);

        self.reconcile_silo(&runtime).await?;
        self.spawn_watcher(runtime.clone()).await?;

        *runtime.state.write().await = SiloState::Ready;
        Ok(())
    }

    async fn reconcile_silo(self: &Arc<Self>, runtime: &Arc<SiloRuntime>) -> Result<()> {
        self.with_indexing_token(&runtime.name, || async {
            *runtime.state.write().await = SiloState::Scanning;
            let should_stop_flag = runtime.should_stop.clone();
            let should_stop = move || should_stop_flag.load(std::sync::atomic::Ordering::SeqCst);
            let progress_slot = &runtime.reconcile_progress;

            let summary = reconciler::reconcile(
                &runtime.pool,
                runtime.embedder.as_ref(),
                &runtime.directories,
                &runtime.extensions,
                &runtime.ignore,
                &runtime.ignore_files,
                MAX_CHUNK_TOKENS,
                runtime.embedder.dims(),
                &should_stop,
                |progress| {
                    let mut slot = progress_slot.try_write();
                    if let Ok(ref mut slot) = slot {
                        **slot = Some(progress.clone());
                    }
                },
            )
            .await;

            *runtime.reconcile_progress.write().await = None;

            match summary {
                Ok(summary) => {
                    *runtime.state.write().await = SiloState::Ready;
                    self.emit_reconcile_activity(runtime, &summary).await;
                    Ok(())
                }
                Err(e) => {
                    *runtime.state.write().await = SiloState::Error;
                    *runtime.error_message.write().await = Some(e.to_string());
                    Err(e)
                }
            }
        })
        .await
    }

    async fn emit_reconcile_activity(&self, runtime: &SiloRuntime, summary: &ReconcileSummary) {
        if summary.added > 0 || summary.updated > 0 {
            self.push_activity(ActivityEvent {
                id: uuid::Uuid::new_v4(),
                timestamp: chrono::Utc::now(),
                silo_name: runtime.name.clone(),
                file_path: String::new(),
                event_type: ActivityEventType::Reindexed,
                chunk_count: Some((summary.added + summary.updated) as i64),
                duration_ms: None,
                error_message: None,
            })
            .await;
        }
        if summary.removed > 0 {
            self.push_activity(ActivityEvent {
                id: uuid::Uuid::new_v4(),
                timestamp: chrono::Utc::now(),
                silo_name: runtime.name.clone(),
                file_path: String::new(),
                event_type: ActivityEventType::Deleted,
                chunk_count: Some(summary.removed as i64),
                duration_ms: None,
                error_message: None,
            })
            .await;
        }
    }

    /// Acquires the process-wide indexing token, tracking `name` as a
    /// `waiting` silo while contended, then runs `body`.
    async fn with_indexing_token<F, Fut, T>(self: &Arc<Self>, name: &str, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let contended = self.indexing_token.try_lock().is_err();
        if contended {
            self.indexing_waiters.lock().await.push_back(name.to_string());
            if let Ok(runtime) = self.get(name).await {
                *runtime.state.write().await = SiloState::Waiting;
            }
        }

        let _permit = self.indexing_token.lock().await;
        self.indexing_waiters.lock().await.retain(|n| n != name);

        body().await
    }

    async fn spawn_watcher(self: &Arc<Self>, runtime: Arc<SiloRuntime>) -> Result<()> {
        let (request_tx, request_rx) = mpsc::channel(4);
        let silo_watcher = SiloWatcher::new(
            runtime.directories.clone(),
            runtime.extensions.clone(),
            runtime.ignore.clone(),
            runtime.ignore_files.clone(),
            2000,
            request_tx,
        )
        .with_context(|| format!("starting watcher for silo '{}'", runtime.name))?;

        let handle = Arc::new(Mutex::new(silo_watcher));
        *runtime.watcher_handle.lock().await = Some(handle.clone());

        let ticker_handle = handle.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(watcher::DEBOUNCE_POLL_INTERVAL);
            loop {
                interval.tick().await;
                ticker_handle.lock().await.tick();
            }
        });
        *runtime.ticker_task.lock().await = Some(ticker);

        let manager = self.clone();
        let runtime_for_drain = runtime.clone();
        let task = tokio::spawn(async move {
            manager.drain_loop(runtime_for_drain, handle, request_rx).await;
        });
        *runtime.drain_task.lock().await = Some(task);

        Ok(())
    }

    /// Grants drain slots to a single silo's watcher as requests arrive,
    /// re-requesting internally if new items queue up mid-drain.
    async fn drain_loop(
        self: Arc<Self>,
        runtime: Arc<SiloRuntime>,
        handle: Arc<Mutex<SiloWatcher>>,
        mut request_rx: mpsc::Receiver<()>,
    ) {
        while request_rx.recv().await.is_some() {
            loop {
                let drained = {
                    let mut watcher = handle.lock().await;
                    watcher.drain()
                };
                if drained.is_empty() {
                    break;
                }

                let name = runtime.name.clone();
                let runtime = runtime.clone();
                let result = self
                    .with_indexing_token(&name, || async {
                        *runtime.state.write().await = SiloState::Indexing;
                        let applied = watcher::apply_drained(
                            &runtime.pool,
                            runtime.embedder.as_ref(),
                            drained,
                            MAX_CHUNK_TOKENS,
                            runtime.embedder.dims(),
                        )
                        .await?;
                        *runtime.state.write().await = SiloState::Ready;
                        Ok(applied)
                    })
                    .await;

                match result {
                    Ok(applied) => {
                        for (key, op) in applied {
                            let event_type = match op {
                                watcher::Operation::Upsert => ActivityEventType::Indexed,
                                watcher::Operation::Delete => ActivityEventType::Deleted,
                            };
                            self.push_activity(ActivityEvent {
                                id: uuid::Uuid::new_v4(),
                                timestamp: chrono::Utc::now(),
                                silo_name: runtime.name.clone(),
                                file_path: key.as_str().to_string(),
                                event_type,
                                chunk_count: None,
                                duration_ms: None,
                                error_message: None,
                            })
                            .await;
                        }
                    }
                    Err(e) => {
                        *runtime.state.write().await = SiloState::Error;
                        *runtime.error_message.write().await = Some(e.to_string());
                    }
                }

                let still_pending = handle.lock().await.has_pending();
                if !still_pending {
                    break;
                }
            }
        }
    }

    async fn push_activity(&self, event: ActivityEvent) {
        let mut feed = self.activity_feed.lock().await;
        if feed.len() >= ACTIVITY_FEED_CAPACITY {
            feed.pop_front();
        }
        feed.push_back(event.clone());
        let _ = self.activity_tx.send(event);
    }

    /// Stops a silo: signals cooperative cancellation, stops accepting
    /// new watcher events, and waits for any in-flight batch to settle.
    pub async fn stop_silo(&self, name: &str) -> Result<()> {
        let runtime = self.get(name).await?;
        runtime.should_stop.store(true, std::sync::atomic::Ordering::SeqCst);

        if let Some(task) = runtime.drain_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = runtime.ticker_task.lock().await.take() {
            task.abort();
        }
        *runtime.watcher_handle.lock().await = None;
        *runtime.state.write().await = SiloState::Stopped;
        Ok(())
    }

    /// Stops a silo and removes its database file from disk.
    pub async fn delete_silo(&self, name: &str) -> Result<()> {
        self.stop_silo(name).await?;
        let runtime = self.silos.write().await.remove(name).ok_or_else(|| anyhow!("no such silo: {name}"))?;
        runtime.pool.close().await;
        let _ = std::fs::remove_file(&runtime.db_path);
        let _ = std::fs::remove_file(runtime.db_path.with_extension("sqlite-wal"));
        let _ = std::fs::remove_file(runtime.db_path.with_extension("sqlite-shm"));
        Ok(())
    }

    /// Stops a silo, wipes every row from its database, and reconciles it
    /// from scratch, re-embedding every file. Unlike [`Self::delete_silo`]
    /// the silo stays registered under `name` and its watcher is restarted
    /// on success.
    pub async fn rebuild_silo(self: &Arc<Self>, name: &str) -> Result<()> {
        self.stop_silo(name).await?;
        let runtime = self.get(name).await?;
        crate::storage::clear_all(&runtime.pool).await?;
        let meta = SiloMeta {
            model: runtime.resolved_model.clone(),
            dimensions: runtime.embedder.dims(),
            created_at: chrono::Utc::now(),
            version: crate::models::CURRENT_SCHEMA_VERSION,
            config_snapshot: serde_json::json!({
                "directories": runtime.directories,
                "extensions": runtime.extensions,
            }),
        };
        crate::storage::write_meta(&runtime.pool, &meta).await?;
        *runtime.error_message.write().await = None;
        self.start_silo(name).await
    }

    pub async fn status(&self, name: &str) -> Result<SiloStatus> {
        let runtime = self.get(name).await?;
        let file_count = crate::storage::file_count(&runtime.pool).await?;
        let chunk_count = crate::storage::chunk_count(&runtime.pool).await?;
        let db_size_bytes = std::fs::metadata(&runtime.db_path).map(|m| m.len()).unwrap_or(0);
        let meta = crate::storage::read_meta(&runtime.pool).await?;

        Ok(SiloStatus {
            name: runtime.name.clone(),
            state: *runtime.state.read().await,
            file_count,
            chunk_count,
            db_size_bytes,
            last_update: meta.as_ref().map(|m| m.created_at),
            watcher_running: runtime.watcher_handle.lock().await.is_some(),
            error_message: runtime.error_message.read().await.clone(),
            reconcile_progress: runtime.reconcile_progress.read().await.clone(),
            model_mismatch: meta.as_ref().is_some_and(|m| m.model != runtime.resolved_model),
            resolved_db_path: runtime.db_path.clone(),
            resolved_model: runtime.resolved_model.clone(),
        })
    }

    pub async fn silo_names(&self) -> Vec<String> {
        self.silos.read().await.keys().cloned().collect()
    }

    pub async fn pool(&self, name: &str) -> Result<SqlitePool> {
        Ok(self.get(name).await?.pool.clone())
    }

    pub async fn embedder(&self, name: &str) -> Result<Arc<dyn EmbeddingProvider>> {
        Ok(self.get(name).await?.embedder.clone())
    }
}

impl std::fmt::Debug for SiloManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiloManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingsConfig, SiloDefaults};

    fn test_config(dir: &std::path::Path) -> Config {
        let mut silos = HashMap::new();
        silos.insert(
            "docs".to_string(),
            SiloConfig {
                directories: vec![dir.to_path_buf()],
                db_path: dir.join("docs.sqlite"),
                extensions: Some(vec!["md".to_string()]),
                ignore: Some(vec![]),
                ignore_files: Some(vec![]),
                model: None,
                sleeping: false,
                description: None,
                color: None,
                icon: None,
            },
        );
        Config {
            server: Default::default(),
            embeddings: EmbeddingsConfig {
                model: "disabled".to_string(),
                ollama_url: None,
            },
            defaults: SiloDefaults::default(),
            silos,
        }
    }

    #[tokio::test]
    async fn start_all_registers_and_reconciles_silos() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Title\n\nbody text").unwrap();
        let config = test_config(dir.path());

        let manager = Arc::new(SiloManager::new(dir.path().to_path_buf()));
        manager.start_all(&config).await.unwrap();

        let status = manager.status("docs").await.unwrap();
        assert_eq!(status.file_count, 1);
        assert!(status.chunk_count >= 1);

        manager.stop_silo("docs").await.unwrap();
        let status = manager.status("docs").await.unwrap();
        assert_eq!(status.state, SiloState::Stopped);
    }

    #[tokio::test]
    async fn unknown_silo_name_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SiloManager::new(dir.path().to_path_buf());
        assert!(manager.status("missing").await.is_err());
    }
}
