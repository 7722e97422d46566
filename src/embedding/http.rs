//! HTTP embedding provider for an externally served model (SPEC_FULL.md
//! §4.A "HTTP alternative", modeled on the teacher's `OllamaProvider`).
//!
//! Posts `{model, input[]}` to `<url>/api/embed`, expects
//! `{embeddings: number[][]}`. Dimensions are learned from the first
//! response rather than configured up front.

use crate::error::EmbeddingError;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{normalize, EmbeddingProvider};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An embedding provider backed by an externally served HTTP endpoint
/// (e.g. Ollama). Unlike [`super::LocalIsolateProvider`] this makes no
/// claim about process-wide serialization: the server on the other end of
/// the connection owns its own concurrency.
pub struct HttpProvider {
    model: String,
    url: String,
    client: reqwest::Client,
    dims: AtomicUsize,
}

impl HttpProvider {
    pub fn new(model: &str, url: &str) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EmbeddingError::ServerUnreachable(url.to_string(), e.to_string()))?;
        Ok(HttpProvider {
            model: model.to_string(),
            url: url.trim_end_matches('/').to_string(),
            client,
            dims: AtomicUsize::new(0),
        })
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for HttpProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims.load(Ordering::Relaxed)
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({ "model": self.model, "input": texts });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::ServerUnreachable(self.url.clone(), e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ServerUnreachable(
                self.url.clone(),
                format!("HTTP {status}: {text}"),
            ));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::ServerUnreachable(self.url.clone(), e.to_string()))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(EmbeddingError::ShapeMismatch {
                expected: texts.len(),
                got: parsed.embeddings.len(),
            });
        }

        if let Some(first) = parsed.embeddings.first() {
            self.dims.store(first.len(), Ordering::Relaxed);
        }

        // Stored vectors must be L2-normalized so the storage layer's dot
        // product equals cosine similarity, matching the local provider.
        Ok(parsed.embeddings.into_iter().map(normalize).collect())
    }
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

/// Probes `<url>/api/tags` with a short timeout and returns the server's
/// advertised model names, or `None` on any failure (per §6: "Failures
/// return `null` rather than throwing").
pub async fn check_connection(url: &str) -> Option<Vec<String>> {
    let client = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .ok()?;

    let response = client
        .get(format!("{}/api/tags", url.trim_end_matches('/')))
        .send()
        .await
        .ok()?;

    if !response.status().is_success() {
        return None;
    }

    let parsed: TagsResponse = response.json().await.ok()?;
    Some(parsed.models.into_iter().map(|m| m.name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connection_check_to_unreachable_host_returns_none() {
        let result = check_connection("http://127.0.0.1:1").await;
        assert!(result.is_none());
    }

    #[test]
    fn provider_starts_with_zero_dims_until_first_response() {
        let provider = HttpProvider::new("nomic-embed-text", "http://localhost:11434").unwrap();
        assert_eq!(provider.dims(), 0);
        assert_eq!(provider.model_name(), "nomic-embed-text");
    }
}
