//! Filesystem watcher with per-path debounce and a drain-on-grant queue.
//!
//! The watcher never drains its own queue: it only requests a scheduling
//! slot (via `request_tx`) whenever the queue goes from empty to
//! non-empty. The silo manager owns the other end of that channel and
//! calls [`SiloWatcher::drain`] when it grants the slot, keeping the two
//! modules decoupled rather than holding references to each other. See
//! SPEC_FULL.md §4.F.
//!
//! Grounded on the teacher's embedding isolate (actor task reached over an
//! `mpsc` channel) for the channel-decoupling idiom, and on the corpus's
//! `notify`-backed watcher (sync callback forwarding into an async
//! channel, per-path pending-change debounce map) for the event loop shape.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::chunk;
use crate::embedding::EmbeddingProvider;
use crate::models::StoredKey;
use crate::reconciler;
use crate::storage::{self, FlushItem};

/// Suggested polling cadence for callers invoking [`SiloWatcher::tick`].
pub const DEBOUNCE_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upsert,
    Delete,
}

#[derive(Debug, Clone)]
pub struct QueuedChange {
    pub dir_index: usize,
    pub rel_path: PathBuf,
    pub absolute_path: PathBuf,
    pub stored_key: StoredKey,
    pub operation: Operation,
}

struct PendingEvent {
    last_seen: Instant,
    operation: Operation,
    dir_index: usize,
    rel_path: PathBuf,
}

/// Owns the platform watch handle, the per-path debounce map, and the
/// drain-on-grant FIFO queue for one silo's directories.
pub struct SiloWatcher {
    _inner: RecommendedWatcher,
    event_rx: mpsc::Receiver<notify::Result<Event>>,
    directories: Vec<PathBuf>,
    extensions: Vec<String>,
    ignore: Vec<String>,
    ignore_files: Vec<String>,
    debounce: Duration,
    pending: HashMap<PathBuf, PendingEvent>,
    queue_order: VecDeque<StoredKey>,
    queue_items: HashMap<StoredKey, QueuedChange>,
    request_tx: mpsc::Sender<()>,
}

impl SiloWatcher {
    /// Starts watching every directory recursively. `request_tx` is the
    /// manager's side of the drain-request channel: a send means "I have
    /// items queued, please grant me a drain slot".
    pub fn new(
        directories: Vec<PathBuf>,
        extensions: Vec<String>,
        ignore: Vec<String>,
        ignore_files: Vec<String>,
        debounce_ms: u64,
        request_tx: mpsc::Sender<()>,
    ) -> Result<Self, notify::Error> {
        let (event_tx, event_rx) = mpsc::channel(256);

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.blocking_send(res);
            },
            notify::Config::default(),
        )?;

        for dir in &directories {
            watcher.watch(dir, RecursiveMode::Recursive)?;
        }

        Ok(SiloWatcher {
            _inner: watcher,
            event_rx,
            directories,
            extensions,
            ignore,
            ignore_files,
            debounce: Duration::from_millis(debounce_ms),
            pending: HashMap::new(),
            queue_order: VecDeque::new(),
            queue_items: HashMap::new(),
            request_tx,
        })
    }

    /// The event loop: consumes notify events into the debounce map and
    /// periodically promotes settled paths into the drain queue. Runs
    /// Drains whatever notify events are already buffered without
    /// blocking, then promotes any settled paths into the drain queue.
    /// Called periodically by the owner holding this watcher behind a
    /// shared lock, so the same instance can be both fed by notify and
    /// drained by the scheduler without a consuming event loop.
    pub fn tick(&mut self) {
        loop {
            match self.event_rx.try_recv() {
                Ok(Ok(event)) => self.handle_event(event),
                Ok(Err(e)) => tracing::warn!(error = %e, "watcher backend error"),
                Err(_) => break,
            }
        }
        self.promote_settled();
    }

    fn root_for_path(&self, path: &Path) -> Option<(usize, PathBuf)> {
        for (idx, root) in self.directories.iter().enumerate() {
            if let Ok(rel) = path.strip_prefix(root) {
                return Some((idx, rel.to_path_buf()));
            }
        }
        None
    }

    fn is_relevant(&self, rel_path: &Path, absolute_path: &Path) -> bool {
        if let Some(parent) = rel_path.parent() {
            for component in parent.components() {
                if let std::path::Component::Normal(os) = component {
                    if reconciler::is_ignored(&os.to_string_lossy(), &self.ignore) {
                        return false;
                    }
                }
            }
        }
        let file_name = rel_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if reconciler::is_ignored(&file_name, &self.ignore_files) {
            return false;
        }
        reconciler::extension_allowed(absolute_path, &self.extensions)
    }

    fn record(&mut self, path: &Path, operation: Operation) {
        let Some((dir_index, rel_path)) = self.root_for_path(path) else {
            return;
        };
        if !self.is_relevant(&rel_path, path) {
            return;
        }
        self.pending.insert(
            path.to_path_buf(),
            PendingEvent {
                last_seen: Instant::now(),
                operation,
                dir_index,
                rel_path,
            },
        );
    }

    fn handle_event(&mut self, event: Event) {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                for path in &event.paths {
                    self.record(path, Operation::Upsert);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
                self.record(&event.paths[0], Operation::Delete);
                self.record(&event.paths[1], Operation::Upsert);
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in &event.paths {
                    self.record(path, Operation::Delete);
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                for path in &event.paths {
                    self.record(path, Operation::Upsert);
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    self.record(path, Operation::Delete);
                }
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other | EventKind::Modify(_) => {}
        }
    }

    /// Moves every path whose debounce timer has elapsed into the drain
    /// queue (last-write-wins per stored key), then requests a drain slot
    /// if the queue went from empty to non-empty.
    fn promote_settled(&mut self) {
        let now = Instant::now();
        let settled: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, pending)| now.duration_since(pending.last_seen) >= self.debounce)
            .map(|(path, _)| path.clone())
            .collect();

        if settled.is_empty() {
            return;
        }

        let was_empty = self.queue_order.is_empty();

        for path in settled {
            let Some(pending) = self.pending.remove(&path) else { continue };
            let stored_key = StoredKey::new(pending.dir_index, &pending.rel_path);

            if self.queue_items.remove(&stored_key).is_some() {
                self.queue_order.retain(|k| k != &stored_key);
            }
            self.queue_order.push_back(stored_key.clone());
            self.queue_items.insert(
                stored_key.clone(),
                QueuedChange {
                    dir_index: pending.dir_index,
                    rel_path: pending.rel_path,
                    absolute_path: path,
                    stored_key,
                    operation: pending.operation,
                },
            );
        }

        if was_empty && !self.queue_order.is_empty() {
            let _ = self.request_tx.try_send(());
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.queue_order.is_empty()
    }

    /// Drains the entire queue in FIFO order. Call only once a drain slot
    /// has been granted; after draining, check [`Self::has_pending`] since
    /// new items may have arrived while this batch was being processed.
    pub fn drain(&mut self) -> Vec<QueuedChange> {
        self.queue_order
            .drain(..)
            .filter_map(|key| self.queue_items.remove(&key))
            .collect()
    }
}

/// Applies one drained batch: prepares each upsert, collects deletes, and
/// flushes the whole batch in one transaction. Returns the stored keys
/// that were actually applied, for activity-event emission by the caller.
pub async fn apply_drained(
    pool: &sqlx::SqlitePool,
    embedder: &dyn EmbeddingProvider,
    changes: Vec<QueuedChange>,
    max_chunk_tokens: usize,
    dims: usize,
) -> anyhow::Result<Vec<(StoredKey, Operation)>> {
    let mut items = Vec::with_capacity(changes.len());
    let mut applied = Vec::with_capacity(changes.len());

    for change in changes {
        match change.operation {
            Operation::Delete => {
                items.push(FlushItem::Delete(change.stored_key.clone()));
                applied.push((change.stored_key, Operation::Delete));
            }
            Operation::Upsert => {
                match chunk::prepare_file(embedder, change.dir_index, &change.rel_path, &change.absolute_path, max_chunk_tokens).await {
                    Ok(prepared) => {
                        applied.push((change.stored_key.clone(), Operation::Upsert));
                        items.push(FlushItem::Upsert(prepared));
                    }
                    Err(e) => {
                        tracing::warn!(file = %change.absolute_path.display(), error = %e, "failed to prepare watched file, skipping");
                    }
                }
            }
        }
    }

    storage::flush_prepared_files(pool, items, dims).await?;
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher_for(dir: &Path, request_tx: mpsc::Sender<()>) -> SiloWatcher {
        SiloWatcher::new(
            vec![dir.to_path_buf()],
            vec!["md".to_string()],
            vec!["node_modules".to_string()],
            vec![],
            50,
            request_tx,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn settled_event_is_queued_and_requests_a_slot() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let mut watcher = watcher_for(dir.path(), tx);

        let file = dir.path().join("notes.md");
        watcher.record(&file, Operation::Upsert);
        assert!(!watcher.has_pending());

        tokio::time::sleep(Duration::from_millis(80)).await;
        watcher.promote_settled();

        assert!(watcher.has_pending());
        assert!(rx.try_recv().is_ok());

        let drained = watcher.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].operation, Operation::Upsert);
        assert!(!watcher.has_pending());
    }

    #[tokio::test]
    async fn repeated_events_reset_the_debounce_timer() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let mut watcher = watcher_for(dir.path(), tx);
        let file = dir.path().join("notes.md");

        watcher.record(&file, Operation::Upsert);
        tokio::time::sleep(Duration::from_millis(30)).await;
        watcher.record(&file, Operation::Upsert);
        watcher.promote_settled();

        assert!(!watcher.has_pending(), "timer should have reset on the second event");
    }

    #[tokio::test]
    async fn ignored_directory_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let mut watcher = watcher_for(dir.path(), tx);

        let file = dir.path().join("node_modules").join("pkg.md");
        watcher.record(&file, Operation::Upsert);
        assert!(watcher.pending.is_empty());
    }

    #[tokio::test]
    async fn last_write_wins_dedup_keeps_one_entry_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let mut watcher = watcher_for(dir.path(), tx);
        let file = dir.path().join("notes.md");

        watcher.record(&file, Operation::Upsert);
        tokio::time::sleep(Duration::from_millis(80)).await;
        watcher.promote_settled();

        watcher.record(&file, Operation::Delete);
        tokio::time::sleep(Duration::from_millis(80)).await;
        watcher.promote_settled();

        let drained = watcher.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].operation, Operation::Delete);
    }
}
