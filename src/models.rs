//! Core data types shared across the indexing pipeline, storage layer, and
//! query engine: stored keys, chunks, search results, and activity events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A portable file identifier of the form `"<dirIndex>:<relPath>"`, where
/// `dirIndex` is the zero-based index into a silo's configured root
/// directories. Stored keys are stable across machines as long as the
/// directory list is remapped in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoredKey(String);

impl StoredKey {
    pub fn new(dir_index: usize, rel_path: &Path) -> Self {
        let rel = rel_path.to_string_lossy().replace('\\', "/");
        StoredKey(format!("{}:{}", dir_index, rel))
    }

    /// Parses a stored key back into its directory index and relative path.
    /// Returns `None` for the legacy absolute-path form, which callers
    /// should detect separately via [`Self::looks_legacy`].
    pub fn parse(&self) -> Option<(usize, &str)> {
        let (idx, rel) = self.0.split_once(':')?;
        let idx: usize = idx.parse().ok()?;
        Some((idx, rel))
    }

    /// True if this string predates the stored-key convention: a bare
    /// absolute path written by an older database.
    pub fn looks_legacy(raw: &str) -> bool {
        Path::new(raw).is_absolute()
    }

    /// Resolves to an absolute path given the silo's current directory list.
    pub fn to_absolute(&self, roots: &[PathBuf]) -> Option<PathBuf> {
        let (idx, rel) = self.parse()?;
        roots.get(idx).map(|root| root.join(rel))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoredKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StoredKey {
    fn from(s: String) -> Self {
        StoredKey(s)
    }
}

/// The atomic stored unit: one span of text from one file, with enough
/// context (section path, line span, tags) to rank and explain a match.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Row identifier, shared across the chunk table, vector index, and all
    /// FTS indices for this chunk. `None` until assigned by storage.
    pub id: Option<i64>,
    pub file_path: StoredKey,
    pub chunk_index: i64,
    pub section_path: Vec<String>,
    pub text: String,
    pub start_line: i64,
    pub end_line: i64,
    pub metadata: serde_json::Value,
    pub content_hash: String,
    pub heading_depth: i32,
    pub tags_text: String,
}

impl Chunk {
    pub fn content_hash_of(text: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// One row per indexed file, feeding the file-path trigram index.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub stored_key: StoredKey,
    pub basename: String,
}

/// `{model, dimensions, createdAt, version}` plus a configuration snapshot,
/// persisted in a silo's `meta` table for portable reconnection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiloMeta {
    pub model: String,
    pub dimensions: usize,
    pub created_at: DateTime<Utc>,
    pub version: i32,
    pub config_snapshot: serde_json::Value,
}

pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Why a file matched a query: which signal families contributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Semantic,
    Keyword,
    Both,
}

/// Normalized per-signal weights for the query engine. Defaults match
/// SPEC_FULL §4.D's `{0.35, 0.25, 0.15, 0.15, 0.10}` balanced preset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SearchWeights {
    pub semantic: f64,
    pub bm25: f64,
    pub trigram: f64,
    pub filepath: f64,
    pub tags: f64,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self::balanced()
    }
}

impl SearchWeights {
    pub const fn balanced() -> Self {
        SearchWeights {
            semantic: 0.35,
            bm25: 0.25,
            trigram: 0.15,
            filepath: 0.15,
            tags: 0.10,
        }
    }

    pub const fn semantic_preset() -> Self {
        SearchWeights {
            semantic: 0.70,
            bm25: 0.15,
            trigram: 0.05,
            filepath: 0.05,
            tags: 0.05,
        }
    }

    pub const fn keyword_preset() -> Self {
        SearchWeights {
            semantic: 0.10,
            bm25: 0.45,
            trigram: 0.25,
            filepath: 0.15,
            tags: 0.05,
        }
    }

    pub const fn code_preset() -> Self {
        SearchWeights {
            semantic: 0.30,
            bm25: 0.15,
            trigram: 0.35,
            filepath: 0.15,
            tags: 0.05,
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "balanced" => Some(Self::balanced()),
            "semantic" => Some(Self::semantic_preset()),
            "keyword" => Some(Self::keyword_preset()),
            "code" => Some(Self::code_preset()),
            _ => None,
        }
    }
}

/// One signal's contribution to a chunk's fused score: its rank within that
/// signal (1-based), the raw underlying score, and its weighted RRF term.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SignalContribution {
    pub rank: Option<i64>,
    pub raw_score: Option<f64>,
    pub contribution: f64,
}

/// Fixed record of all five signals' contributions to one chunk's RRF score.
/// A closed record, not a dynamic map, per SPEC_FULL §9.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScoreBreakdown {
    pub semantic: SignalContribution,
    pub bm25: SignalContribution,
    pub trigram: SignalContribution,
    pub filepath: SignalContribution,
    pub tags: SignalContribution,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.semantic.contribution
            + self.bm25.contribution
            + self.trigram.contribution
            + self.filepath.contribution
            + self.tags.contribution
    }
}

/// Per-chunk evidence surfaced to clients alongside a file-level result.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkEvidence {
    pub chunk_id: i64,
    pub section_path: Vec<String>,
    pub text: String,
    pub start_line: i64,
    pub end_line: i64,
    pub score: f64,
    pub match_type: MatchType,
    pub cosine_similarity: Option<f32>,
}

/// A ranked file-level search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub file_path: String,
    pub silo_name: String,
    pub score: f64,
    pub rrf: f64,
    pub match_type: MatchType,
    pub best_cosine: Option<f32>,
    pub chunks: Vec<ChunkEvidence>,
    pub breakdown: ScoreBreakdown,
    pub weights_used: SearchWeights,
}

/// Per-silo lifecycle state (SPEC_FULL §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiloState {
    Ready,
    Scanning,
    Indexing,
    Waiting,
    Stopped,
    Error,
}

/// A typed activity event emitted by a silo during indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityEventType {
    Indexed,
    Reindexed,
    Deleted,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    pub silo_name: String,
    pub file_path: String,
    pub event_type: ActivityEventType,
    pub chunk_count: Option<i64>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_key_round_trips_through_parse() {
        let key = StoredKey::new(1, Path::new("notes/architecture.md"));
        assert_eq!(key.as_str(), "1:notes/architecture.md");
        let (idx, rel) = key.parse().unwrap();
        assert_eq!(idx, 1);
        assert_eq!(rel, "notes/architecture.md");
    }

    #[test]
    fn stored_key_resolves_to_absolute_path() {
        let key = StoredKey::new(0, Path::new("a/b.md"));
        let roots = vec![PathBuf::from("/silo/root")];
        assert_eq!(
            key.to_absolute(&roots),
            Some(PathBuf::from("/silo/root/a/b.md"))
        );
    }

    #[test]
    fn legacy_absolute_path_is_detected() {
        assert!(StoredKey::looks_legacy("/home/user/notes.md"));
        assert!(!StoredKey::looks_legacy("0:notes.md"));
    }

    #[test]
    fn named_presets_exist_for_all_four_names() {
        for name in ["balanced", "semantic", "keyword", "code"] {
            assert!(SearchWeights::by_name(name).is_some());
        }
        assert!(SearchWeights::by_name("bogus").is_none());
    }
}
