//! The static table of bundled embedding models (SPEC_FULL.md §4.A). A
//! `const` array plus a `OnceLock`-backed lookup map — new models ship
//! with a crate release, never added at runtime.

use std::collections::HashMap;
use std::sync::OnceLock;

/// One entry in the bundled model registry.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub key: &'static str,
    pub display_name: &'static str,
    pub upstream_id: &'static str,
    pub dimensions: usize,
    pub max_context_tokens: usize,
    pub chunk_budget_tokens: usize,
    pub query_prefix: &'static str,
    pub document_prefix: &'static str,
    pub bundled: bool,
    pub quantization: &'static str,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl ModelSpec {
    pub fn fastembed_model(&self) -> fastembed::EmbeddingModel {
        match self.key {
            "bge-small" => fastembed::EmbeddingModel::BGESmallENV15,
            "bge-base" => fastembed::EmbeddingModel::BGEBaseENV15,
            _ => fastembed::EmbeddingModel::BGESmallENV15,
        }
    }
}

pub const DEFAULT_MODEL_KEY: &str = "bge-small";

const REGISTRY: &[ModelSpec] = &[
    ModelSpec {
        key: "bge-small",
        display_name: "BGE Small (EN v1.5)",
        upstream_id: "BAAI/bge-small-en-v1.5",
        dimensions: 384,
        max_context_tokens: 512,
        chunk_budget_tokens: 384,
        query_prefix: "",
        document_prefix: "",
        bundled: true,
        quantization: "int8",
    },
    ModelSpec {
        key: "bge-base",
        display_name: "BGE Base (EN v1.5)",
        upstream_id: "BAAI/bge-base-en-v1.5",
        dimensions: 768,
        max_context_tokens: 512,
        chunk_budget_tokens: 384,
        query_prefix: "",
        document_prefix: "",
        bundled: true,
        quantization: "int8",
    },
];

static INDEX: OnceLock<HashMap<&'static str, &'static ModelSpec>> = OnceLock::new();

fn index() -> &'static HashMap<&'static str, &'static ModelSpec> {
    INDEX.get_or_init(|| REGISTRY.iter().map(|m| (m.key, m)).collect())
}

pub fn all_models() -> &'static [ModelSpec] {
    REGISTRY
}

pub fn lookup_model(key: &str) -> Option<&'static ModelSpec> {
    index().get(key).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_one_small_and_one_large_bundled_model() {
        let models = all_models();
        assert_eq!(models.len(), 2);
        assert!(models.iter().any(|m| m.dimensions == 384));
        assert!(models.iter().any(|m| m.dimensions == 768));
        assert!(models.iter().all(|m| m.bundled));
    }

    #[test]
    fn default_model_key_resolves() {
        assert!(lookup_model(DEFAULT_MODEL_KEY).is_some());
    }

    #[test]
    fn unknown_key_does_not_resolve() {
        assert!(lookup_model("nonexistent-model").is_none());
    }
}
