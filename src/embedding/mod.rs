//! Embedding provider abstraction and implementations.
//!
//! - **[`registry`]** — the static table of bundled models.
//! - **[`LocalIsolateProvider`]** — runs a bundled model in a single
//!   actor task reached over an `mpsc` channel, since the underlying
//!   inference runtime has global mutable state unsafe under concurrent
//!   loads (SPEC_FULL.md §4.A).
//! - **[`HttpProvider`]** — posts to an externally served embedding
//!   endpoint (`/api/embed`, probed via `/api/tags`).
//! - **[`DisabledProvider`]** — returns errors; used when a silo has
//!   embeddings turned off.
//!
//! Also provides vector utilities for the storage layer's BLOB column:
//! [`vec_to_blob`], [`blob_to_vec`], [`cosine_similarity`].

pub mod http;
pub mod registry;

use crate::config::EmbeddingsConfig;
use crate::error::EmbeddingError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::{mpsc, oneshot};

pub use http::{check_connection, HttpProvider};
pub use registry::{lookup_model, ModelSpec};

/// Implemented by every embedding backend. `embed_texts` does the actual
/// work; `embed_query` is a convenience wrapper with a default impl since
/// most providers don't need a distinct code path for a single query text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embeds a single query string. The default forwards to
    /// [`Self::embed_texts`] unchanged; providers whose model distinguishes
    /// a query prefix from a document prefix (SPEC_FULL.md §4.A) override
    /// this to apply theirs.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut results = self.embed_texts(&[text.to_string()]).await?;
        results.pop().ok_or(EmbeddingError::ShapeMismatch {
            expected: 1,
            got: 0,
        })
    }
}

/// A no-op provider for silos configured without embeddings; keyword
/// signals still work, semantic search simply contributes nothing.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }
}

// ============ Local isolate provider ============

/// Which of the model's two prefixes (SPEC_FULL.md §4.A) to prepend before
/// tokenization. Bundled BGE models ship empty prefixes for both, but the
/// registry contract requires the distinction for models that do use them.
#[derive(Clone, Copy)]
enum PrefixKind {
    Query,
    Document,
}

enum IsolateRequest {
    Embed {
        texts: Vec<String>,
        prefix: PrefixKind,
        respond_to: oneshot::Sender<Result<Vec<Vec<f32>>, EmbeddingError>>,
    },
}

/// Process-wide map of model key → running isolate's request channel.
/// Multiple [`LocalIsolateProvider`] handles for the same model share one
/// entry; the isolate task exits when every sender is dropped.
static ISOLATES: OnceLock<Mutex<HashMap<String, mpsc::Sender<IsolateRequest>>>> = OnceLock::new();

fn isolates() -> &'static Mutex<HashMap<String, mpsc::Sender<IsolateRequest>>> {
    ISOLATES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A cheap, cloneable handle to a bundled model's actor task.
#[derive(Clone)]
pub struct LocalIsolateProvider {
    model_key: String,
    dims: usize,
    sender: mpsc::Sender<IsolateRequest>,
}

impl LocalIsolateProvider {
    /// Returns a handle to the isolate for `model_key`, spawning it if no
    /// isolate for that model is currently running.
    pub fn spawn_or_attach(model_key: &str) -> Result<Self, EmbeddingError> {
        let spec = lookup_model(model_key).ok_or_else(|| {
            EmbeddingError::ModelLoad(model_key.to_string(), "unknown model key".to_string())
        })?;

        let mut guard = isolates().lock().expect("isolate map poisoned");
        if let Some(sender) = guard.get(model_key) {
            if !sender.is_closed() {
                return Ok(LocalIsolateProvider {
                    model_key: model_key.to_string(),
                    dims: spec.dimensions,
                    sender: sender.clone(),
                });
            }
        }

        let (tx, rx) = mpsc::channel(32);
        guard.insert(model_key.to_string(), tx.clone());
        drop(guard);

        tokio::spawn(run_isolate(spec.clone(), rx));

        Ok(LocalIsolateProvider {
            model_key: model_key.to_string(),
            dims: spec.dimensions,
            sender: tx,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalIsolateProvider {
    fn model_name(&self) -> &str {
        &self.model_key
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.request(texts, PrefixKind::Document).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut results = self.request(&[text.to_string()], PrefixKind::Query).await?;
        results.pop().ok_or(EmbeddingError::ShapeMismatch {
            expected: 1,
            got: 0,
        })
    }
}

impl LocalIsolateProvider {
    async fn request(&self, texts: &[String], prefix: PrefixKind) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(IsolateRequest::Embed {
                texts: texts.to_vec(),
                prefix,
                respond_to,
            })
            .await
            .map_err(|_| EmbeddingError::IsolateGone)?;
        rx.await.map_err(|_| EmbeddingError::IsolateGone)?
    }
}

/// The model handle an isolate keeps loaded for its whole lifetime. Under
/// the fastembed backend this is the actual ONNX session; the tract
/// fallback and the no-backend build carry nothing since they have no
/// loaded state to reuse.
#[cfg(feature = "local-embeddings-fastembed")]
type LoadedModel = fastembed::TextEmbedding;
#[cfg(not(feature = "local-embeddings-fastembed"))]
type LoadedModel = ();

/// The actor loop: loads the model once, then owns it for as long as
/// requests arrive, reusing it across every `embed`/`embedBatch` call
/// instead of reloading weights per request. Exits (dropping the model)
/// once every sender clone is gone and the channel closes, or once a
/// blocking inference task panics and takes the model with it.
async fn run_isolate(spec: ModelSpec, mut rx: mpsc::Receiver<IsolateRequest>) {
    let load_spec = spec.clone();
    let loaded = match tokio::task::spawn_blocking(move || load_model(&load_spec)).await {
        Ok(Ok(model)) => model,
        Ok(Err(e)) => {
            drain_with_load_error(&mut rx, &spec, e.to_string()).await;
            isolates().lock().expect("isolate map poisoned").remove(spec.key);
            return;
        }
        Err(e) => {
            drain_with_load_error(&mut rx, &spec, format!("isolate load task panicked: {e}")).await;
            isolates().lock().expect("isolate map poisoned").remove(spec.key);
            return;
        }
    };

    let mut model = Some(loaded);
    while let Some(request) = rx.recv().await {
        let IsolateRequest::Embed { texts, prefix, respond_to } = request;
        let Some(loaded) = model.take() else {
            let _ = respond_to.send(Err(EmbeddingError::IsolateGone));
            break;
        };

        let spec_for_inference = spec.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut loaded = loaded;
            let result = run_inference(&mut loaded, &spec_for_inference, texts, prefix);
            (result, loaded)
        })
        .await;

        match outcome {
            Ok((result, loaded)) => {
                model = Some(loaded);
                let _ = respond_to.send(result);
            }
            Err(e) => {
                let _ = respond_to.send(Err(EmbeddingError::ModelLoad(
                    spec.key.to_string(),
                    format!("isolate task panicked: {e}"),
                )));
                break;
            }
        }
    }
    isolates().lock().expect("isolate map poisoned").remove(spec.key);
}

/// Responds to every request already queued (and any still arriving
/// before the channel is dropped by the caller) with the model's load
/// failure, since there is no model to serve them with.
async fn drain_with_load_error(rx: &mut mpsc::Receiver<IsolateRequest>, spec: &ModelSpec, message: String) {
    while let Some(IsolateRequest::Embed { respond_to, .. }) = rx.recv().await {
        let _ = respond_to.send(Err(EmbeddingError::ModelLoad(spec.key.to_string(), message.clone())));
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn load_model(spec: &ModelSpec) -> Result<LoadedModel, EmbeddingError> {
    fastembed::TextEmbedding::try_new(
        fastembed::InitOptions::new(spec.fastembed_model()).with_show_download_progress(false),
    )
    .map_err(|e| EmbeddingError::ModelLoad(spec.key.to_string(), e.to_string()))
}

#[cfg(all(feature = "local-embeddings-tract", not(feature = "local-embeddings-fastembed")))]
fn load_model(_spec: &ModelSpec) -> Result<LoadedModel, EmbeddingError> {
    Ok(())
}

#[cfg(not(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract")))]
fn load_model(_spec: &ModelSpec) -> Result<LoadedModel, EmbeddingError> {
    Ok(())
}

#[cfg(feature = "local-embeddings-fastembed")]
fn run_inference(
    model: &mut LoadedModel,
    spec: &ModelSpec,
    texts: Vec<String>,
    prefix: PrefixKind,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let prefix_str = match prefix {
        PrefixKind::Query => spec.query_prefix,
        PrefixKind::Document => spec.document_prefix,
    };
    let prefixed: Vec<String> = texts.into_iter().map(|t| format!("{prefix_str}{t}")).collect();

    let embeddings = model
        .embed(prefixed, None)
        .map_err(|e| EmbeddingError::ModelLoad(spec.key.to_string(), e.to_string()))?;

    Ok(embeddings.into_iter().map(normalize).collect())
}

#[cfg(all(feature = "local-embeddings-tract", not(feature = "local-embeddings-fastembed")))]
fn run_inference(
    _model: &mut LoadedModel,
    spec: &ModelSpec,
    _texts: Vec<String>,
    _prefix: PrefixKind,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    Err(EmbeddingError::ModelLoad(
        spec.key.to_string(),
        "tract backend does not yet implement local inference for this model".to_string(),
    ))
}

#[cfg(not(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract")))]
fn run_inference(
    _model: &mut LoadedModel,
    spec: &ModelSpec,
    _texts: Vec<String>,
    _prefix: PrefixKind,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    Err(EmbeddingError::ModelLoad(
        spec.key.to_string(),
        "crate built without a local-embeddings-* feature".to_string(),
    ))
}

pub(crate) fn normalize(v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return v;
    }
    v.into_iter().map(|x| x / norm).collect()
}

/// Resolves a model key to a provider, falling back to the bundled small
/// default with a warning for unknown/legacy aliases (SPEC_FULL.md §9).
pub fn create_local_provider(model_key: &str) -> Result<LocalIsolateProvider, EmbeddingError> {
    if lookup_model(model_key).is_some() {
        return LocalIsolateProvider::spawn_or_attach(model_key);
    }
    tracing::warn!(
        requested = model_key,
        fallback = registry::DEFAULT_MODEL_KEY,
        "unknown embedding model key, falling back to bundled default"
    );
    LocalIsolateProvider::spawn_or_attach(registry::DEFAULT_MODEL_KEY)
}

/// Resolves a silo's `EmbeddingsConfig` to a provider: the HTTP alternative
/// when `ollama_url` is set, otherwise a bundled local isolate keyed by
/// `model` (with legacy-alias fallback, see [`create_local_provider`]).
pub fn create_provider(cfg: &EmbeddingsConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match &cfg.ollama_url {
        Some(url) => Ok(Arc::new(HttpProvider::new(&cfg.model, url)?)),
        None => Ok(Arc::new(create_local_provider(&cfg.model)?)),
    }
}

/// Encode a float vector as little-endian `f32` bytes for the `vec_chunks`
/// BLOB column.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Reverses [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. Returns `0.0` for empty or
/// mismatched-length vectors. Since the embedding service L2-normalizes
/// its output, this equals the dot product for any two stored vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_vectors_is_minus_one() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[tokio::test]
    async fn disabled_provider_errors_on_embed() {
        let provider = DisabledProvider;
        let err = provider.embed_texts(&["hi".to_string()]).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Disabled));
    }
}
