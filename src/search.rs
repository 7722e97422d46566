//! Query engine: five retrieval signals fused by Reciprocal Rank Fusion,
//! aggregated to file level, and calibrated across silos.
//!
//! - **Semantic** — brute-force cosine scan over `vec_chunks`.
//! - **BM25** — `chunks_fts` (chunk text).
//! - **Trigram** — `chunks_trigram` (chunk text substrings).
//! - **File path** — `files_fts` trigram match, expanded to chunks.
//! - **Tags** — `chunks_meta_fts` (tags/aliases/titles).
//!
//! Grounded on the teacher's `search::search_documents` (candidate fetch →
//! normalize → merge → aggregate-by-document shape), replacing its
//! min-max blend with RRF and its single keyword/vector pair with five
//! signals. See SPEC_FULL.md §4.D.

use anyhow::Result;
use sqlx::SqlitePool;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::embedding::EmbeddingProvider;
use crate::models::{ChunkEvidence, MatchType, ScoreBreakdown, SearchResult, SearchWeights, SignalContribution};
use crate::storage;

const RRF_K: f64 = 60.0;
const SIGNAL_FANOUT: usize = 5;

/// One silo's identity and handles, as the query engine needs them. Built
/// by the silo manager from its live pool/provider pair.
pub struct SiloSearchContext<'a> {
    pub name: &'a str,
    pub pool: &'a SqlitePool,
    pub embedder: &'a dyn EmbeddingProvider,
}

/// Runs `query` against every context, fuses per-silo results, calibrates
/// across silos when there is more than one, and returns the top
/// `max_results` files.
pub async fn search(
    contexts: &[SiloSearchContext<'_>],
    query: &str,
    weights: SearchWeights,
    max_results: usize,
) -> Result<Vec<SearchResult>> {
    let mut all_results = Vec::new();

    for ctx in contexts {
        let mut results = search_silo(ctx, query, &weights, max_results).await?;
        let calibration = if contexts.len() > 1 {
            // A silo with no vector-matched files has nothing to compute a
            // mean cosine over; per spec §4.D/§9 this silo is effectively
            // excluded from a multi-silo merge rather than defaulting to
            // full weight.
            mean_best_cosine(&results).unwrap_or(0.0) as f64
        } else {
            1.0
        };
        for result in &mut results {
            result.score = result.rrf * calibration;
        }
        all_results.extend(results);
    }

    all_results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    all_results.truncate(max_results);
    Ok(all_results)
}

fn mean_best_cosine(results: &[SearchResult]) -> Option<f32> {
    let cosines: Vec<f32> = results.iter().filter_map(|r| r.best_cosine).collect();
    if cosines.is_empty() {
        return None;
    }
    Some(cosines.iter().sum::<f32>() / cosines.len() as f32)
}

#[tracing::instrument(skip(ctx, weights), fields(silo = ctx.name))]
async fn search_silo(
    ctx: &SiloSearchContext<'_>,
    query: &str,
    weights: &SearchWeights,
    max_results: usize,
) -> Result<Vec<SearchResult>> {
    let signal_limit = (max_results * SIGNAL_FANOUT).max(SIGNAL_FANOUT);
    let trimmed = query.trim();

    let query_vec = if trimmed.is_empty() {
        // Edge case: empty query text still embeds (the zero-length
        // string is a valid, if degenerate, input) and takes the
        // vector-only path — every keyword signal below is skipped.
        ctx.embedder.embed_query(trimmed).await.ok()
    } else {
        match ctx.embedder.embed_query(trimmed).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(silo = ctx.name, error = %e, "embedding unavailable, semantic signal dropped");
                None
            }
        }
    };

    let bm25_query = sanitize_bm25(trimmed);
    let trigram_query = sanitize_trigram(trimmed);

    let run_keyword_signals = !trimmed.is_empty();

    let vector_hits = match &query_vec {
        Some(v) => storage::vector_signal(ctx.pool, v, signal_limit).await?,
        None => Vec::new(),
    };

    let bm25_hits = if run_keyword_signals && !bm25_query.is_empty() {
        storage::bm25_signal(ctx.pool, &bm25_query, signal_limit).await?
    } else {
        Vec::new()
    };

    let trigram_hits = if run_keyword_signals && !trigram_query.is_empty() {
        storage::trigram_signal(ctx.pool, &trigram_query, signal_limit).await?
    } else {
        Vec::new()
    };

    let filepath_hits = if run_keyword_signals && !trigram_query.is_empty() {
        storage::filepath_signal(ctx.pool, &trigram_query, signal_limit).await?
    } else {
        Vec::new()
    };

    let tags_hits = if run_keyword_signals && !bm25_query.is_empty() {
        storage::tags_signal(ctx.pool, &bm25_query, signal_limit).await?
    } else {
        Vec::new()
    };

    let semantic_ranks = rank_by_id(&vector_hits);
    let bm25_ranks = rank_by_id(&bm25_hits);
    let trigram_ranks = rank_by_id(&trigram_hits);
    let filepath_ranks = rank_by_id(&filepath_hits);
    let tags_ranks = rank_by_id(&tags_hits);

    let mut candidate_ids: Vec<i64> = Vec::new();
    for ids in [&semantic_ranks, &bm25_ranks, &trigram_ranks, &filepath_ranks, &tags_ranks] {
        for id in ids.keys() {
            if !candidate_ids.contains(id) {
                candidate_ids.push(*id);
            }
        }
    }

    if candidate_ids.is_empty() {
        return Ok(Vec::new());
    }

    let chunks = storage::load_chunks_by_ids(ctx.pool, &candidate_ids).await?;
    let penalty_rank = (signal_limit + 1) as i64;

    let mut breakdowns: HashMap<i64, ScoreBreakdown> = HashMap::new();
    for chunk in &chunks {
        let id = chunk.id.expect("chunks loaded from storage always carry an id");
        let boost = heading_boost(chunk.heading_depth);

        let semantic = contribution(&semantic_ranks, id, penalty_rank, weights.semantic, 1.0);
        let bm25 = contribution(&bm25_ranks, id, penalty_rank, weights.bm25, boost);
        let trigram = contribution(&trigram_ranks, id, penalty_rank, weights.trigram, boost);
        let filepath = contribution(&filepath_ranks, id, penalty_rank, weights.filepath, 1.0);
        let tags = contribution(&tags_ranks, id, penalty_rank, weights.tags, 1.0);

        breakdowns.insert(
            id,
            ScoreBreakdown {
                semantic,
                bm25,
                trigram,
                filepath,
                tags,
            },
        );
    }

    let mut scored: Vec<(i64, f64)> = breakdowns.iter().map(|(id, b)| (*id, b.total())).collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(signal_limit);

    let kept_ids: Vec<i64> = scored.iter().map(|(id, _)| *id).collect();
    let kept_chunks = storage::load_chunks_by_ids(ctx.pool, &kept_ids).await?;
    let rrf_by_id: HashMap<i64, f64> = scored.into_iter().collect();

    Ok(aggregate_by_file(ctx.name, kept_chunks, &breakdowns, &rrf_by_id, *weights))
}

/// Assigns each hit its 1-based rank within its signal, keeping only the
/// best rank if a signal somehow returns the same id twice.
fn rank_by_id(hits: &[storage::SignalHit]) -> HashMap<i64, (i64, f64)> {
    let mut ranks = HashMap::new();
    for (idx, hit) in hits.iter().enumerate() {
        ranks.entry(hit.chunk_id).or_insert(((idx + 1) as i64, hit.raw_score));
    }
    ranks
}

fn contribution(
    ranks: &HashMap<i64, (i64, f64)>,
    chunk_id: i64,
    penalty_rank: i64,
    weight: f64,
    boost: f64,
) -> SignalContribution {
    match ranks.get(&chunk_id) {
        Some((rank, raw_score)) => SignalContribution {
            rank: Some(*rank),
            raw_score: Some(*raw_score),
            contribution: boost * weight / (RRF_K + *rank as f64),
        },
        None => SignalContribution {
            rank: None,
            raw_score: None,
            contribution: boost * weight / (RRF_K + penalty_rank as f64),
        },
    }
}

fn heading_boost(depth: i32) -> f64 {
    if depth <= 0 {
        1.0
    } else {
        1.0 + 0.1 * (7 - depth) as f64
    }
}

fn aggregate_by_file(
    silo_name: &str,
    chunks: Vec<crate::models::Chunk>,
    breakdowns: &HashMap<i64, ScoreBreakdown>,
    rrf_by_id: &HashMap<i64, f64>,
    weights: SearchWeights,
) -> Vec<SearchResult> {
    let mut by_file: HashMap<String, Vec<ChunkEvidence>> = HashMap::new();
    let mut file_breakdown: HashMap<String, ScoreBreakdown> = HashMap::new();

    for chunk in chunks {
        let id = chunk.id.expect("chunk loaded from storage always carries an id");
        let Some(breakdown) = breakdowns.get(&id) else { continue };
        let Some(rrf) = rrf_by_id.get(&id).copied() else { continue };

        let match_type = match (breakdown.semantic.rank.is_some(), has_keyword_signal(breakdown)) {
            (true, true) => MatchType::Both,
            (true, false) => MatchType::Semantic,
            (false, _) => MatchType::Keyword,
        };

        let evidence = ChunkEvidence {
            chunk_id: id,
            section_path: chunk.section_path,
            text: chunk.text,
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            score: rrf,
            match_type,
            cosine_similarity: breakdown.semantic.raw_score.map(|s| s as f32),
        };

        let file_path = chunk.file_path.as_str().to_string();
        let entry = by_file.entry(file_path.clone()).or_default();
        entry.push(evidence);

        file_breakdown
            .entry(file_path)
            .and_modify(|existing| {
                if rrf > existing.total() {
                    *existing = *breakdown;
                }
            })
            .or_insert(*breakdown);
    }

    let mut results: Vec<SearchResult> = by_file
        .into_iter()
        .map(|(file_path, mut chunk_evidence)| {
            chunk_evidence.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
            chunk_evidence.truncate(5);

            let breakdown = file_breakdown.remove(&file_path).unwrap_or_default();
            let rrf = breakdown.total();
            let best_cosine = chunk_evidence.iter().filter_map(|c| c.cosine_similarity).fold(None, |acc, v| {
                Some(acc.map_or(v, |a: f32| a.max(v)))
            });

            let match_type = match (breakdown.semantic.rank.is_some(), has_keyword_signal(&breakdown)) {
                (true, true) => MatchType::Both,
                (true, false) => MatchType::Semantic,
                (false, _) => MatchType::Keyword,
            };

            SearchResult {
                file_path,
                silo_name: silo_name.to_string(),
                score: rrf,
                rrf,
                match_type,
                best_cosine,
                chunks: chunk_evidence,
                breakdown,
                weights_used: weights,
            }
        })
        .collect();

    results.sort_by(|a, b| b.rrf.partial_cmp(&a.rrf).unwrap_or(Ordering::Equal));
    results
}

fn has_keyword_signal(breakdown: &ScoreBreakdown) -> bool {
    breakdown.bm25.rank.is_some()
        || breakdown.trigram.rank.is_some()
        || breakdown.filepath.rank.is_some()
        || breakdown.tags.rank.is_some()
}

/// BM25 form: whitespace-split terms, `"` doubled, each term double-quoted.
fn sanitize_bm25(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Same as [`sanitize_bm25`] but drops terms under three characters, since
/// SQLite's `trigram` tokenizer cannot match them at all.
fn sanitize_trigram(query: &str) -> String {
    query
        .split_whitespace()
        .filter(|term| term.chars().count() >= 3)
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::PreparedFile;
    use crate::error::EmbeddingError;
    use crate::models::{Chunk, StoredKey};
    use crate::storage::FlushItem;
    use async_trait::async_trait;

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
            Ok(texts
                .iter()
                .map(|t| if t.contains("alpha") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect())
        }
    }

    fn sample_chunk(file_path: &str, text: &str, heading_depth: i32) -> Chunk {
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
            heading_depth,
            tags_text: String::new(),
        }
    }

    async fn seeded_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::migrate(&pool).await.unwrap();

        let alpha = PreparedFile {
            stored_key: StoredKey::from("0:alpha.md".to_string()),
            chunks: vec![sample_chunk("0:alpha.md", "alpha notes about rust ownership", 1)],
            embeddings: vec![vec![1.0, 0.0]],
            mtime_ms: 1,
        };
        let beta = PreparedFile {
            stored_key: StoredKey::from("0:beta.md".to_string()),
            chunks: vec![sample_chunk("0:beta.md", "beta notes about golang channels", 0)],
            embeddings: vec![vec![0.0, 1.0]],
            mtime_ms: 2,
        };
        storage::flush_prepared_files(&pool, vec![FlushItem::Upsert(alpha), FlushItem::Upsert(beta)], 2)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn semantic_signal_prefers_matching_vector() {
        let pool = seeded_pool().await;
        let embedder = StubEmbedder;
        let ctx = SiloSearchContext {
            name: "docs",
            pool: &pool,
            embedder: &embedder,
        };
        let results = search(&[ctx], "alpha", SearchWeights::balanced(), 10).await.unwrap();
        assert_eq!(results[0].file_path, "0:alpha.md");
    }

    #[tokio::test]
    async fn bm25_signal_finds_exact_term_match() {
        let pool = seeded_pool().await;
        let embedder = StubEmbedder;
        let ctx = SiloSearchContext {
            name: "docs",
            pool: &pool,
            embedder: &embedder,
        };
        let results = search(&[ctx], "golang", SearchWeights::balanced(), 10).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].file_path, "0:beta.md");
    }

    #[tokio::test]
    async fn empty_query_takes_vector_only_path() {
        let pool = seeded_pool().await;
        let embedder = StubEmbedder;
        let ctx = SiloSearchContext {
            name: "docs",
            pool: &pool,
            embedder: &embedder,
        };
        let results = search(&[ctx], "", SearchWeights::balanced(), 10).await.unwrap();
        for result in &results {
            assert!(result.breakdown.bm25.rank.is_none());
            assert!(result.breakdown.trigram.rank.is_none());
        }
    }

    #[tokio::test]
    async fn cross_silo_calibration_reorders_by_mean_cosine() {
        // S6: silo X's best file has a higher raw rrf than silo Y's, but a
        // much lower mean cosine; calibration must favor Y.
        let pool_x = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::migrate(&pool_x).await.unwrap();
        let x1 = PreparedFile {
            stored_key: StoredKey::from("0:x1.md".to_string()),
            chunks: vec![sample_chunk("0:x1.md", "alpha content about rust", 0)],
            embeddings: vec![vec![0.9, 0.1]],
            mtime_ms: 1,
        };
        storage::flush_prepared_files(&pool_x, vec![FlushItem::Upsert(x1)], 1).await.unwrap();

        let pool_y = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::migrate(&pool_y).await.unwrap();
        let y1 = PreparedFile {
            stored_key: StoredKey::from("0:y1.md".to_string()),
            chunks: vec![sample_chunk("0:y1.md", "alpha content about rust too", 0)],
            embeddings: vec![vec![1.0, 0.0]],
            mtime_ms: 1,
        };
        storage::flush_prepared_files(&pool_y, vec![FlushItem::Upsert(y1)], 1).await.unwrap();

        let embedder = StubEmbedder;
        let ctx_x = SiloSearchContext {
            name: "x",
            pool: &pool_x,
            embedder: &embedder,
        };
        let ctx_y = SiloSearchContext {
            name: "y",
            pool: &pool_y,
            embedder: &embedder,
        };

        let results = search(&[ctx_x, ctx_y], "alpha", SearchWeights::balanced(), 10).await.unwrap();
        assert_eq!(results.len(), 2);
        // Both silos have a single vector-matched file, so each one's mean
        // best cosine equals that file's own cosine similarity; the higher
        // cosine silo (y) must outrank x after calibration even though raw
        // rrf is identical for a single top hit in each silo.
        assert_eq!(results[0].silo_name, "y");
        assert_eq!(results[1].silo_name, "x");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn keyword_only_silo_is_excluded_by_zero_mean_cosine() {
        // Per §9 Open Questions: a silo whose embedding fails entirely
        // (here a `DisabledProvider`) has no vector-matched chunk at all,
        // so its mean cosine is 0 and it is effectively dropped out of a
        // multi-silo merge even though it still has a strong keyword hit.
        let pool_kw = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::migrate(&pool_kw).await.unwrap();
        let kw1 = PreparedFile {
            stored_key: StoredKey::from("0:kw1.md".to_string()),
            chunks: vec![sample_chunk("0:kw1.md", "xylophone specialword", 0)],
            embeddings: vec![vec![1.0, 0.0]],
            mtime_ms: 1,
        };
        storage::flush_prepared_files(&pool_kw, vec![FlushItem::Upsert(kw1)], 1).await.unwrap();

        let pool_sem = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::migrate(&pool_sem).await.unwrap();
        let sem1 = PreparedFile {
            stored_key: StoredKey::from("0:sem1.md".to_string()),
            chunks: vec![sample_chunk("0:sem1.md", "xylophone unrelated words here", 0)],
            embeddings: vec![vec![0.0, 1.0]],
            mtime_ms: 1,
        };
        storage::flush_prepared_files(&pool_sem, vec![FlushItem::Upsert(sem1)], 1).await.unwrap();

        let disabled = crate::embedding::DisabledProvider;
        let semantic_embedder = StubEmbedder;
        let ctx_kw = SiloSearchContext {
            name: "kw",
            pool: &pool_kw,
            embedder: &disabled,
        };
        let ctx_sem = SiloSearchContext {
            name: "sem",
            pool: &pool_sem,
            embedder: &semantic_embedder,
        };

        let results = search(&[ctx_kw, ctx_sem], "xylophone", SearchWeights::balanced(), 10).await.unwrap();
        let kw_result = results.iter().find(|r| r.silo_name == "kw").unwrap();
        assert_eq!(kw_result.score, 0.0);
    }

    #[test]
    fn sanitize_bm25_quotes_each_term() {
        assert_eq!(sanitize_bm25("rust ownership"), "\"rust\" \"ownership\"");
    }

    #[test]
    fn sanitize_trigram_drops_short_terms() {
        assert_eq!(sanitize_trigram("a rust is ownership"), "\"rust\" \"ownership\"");
    }

    #[test]
    fn heading_boost_matches_spec_table() {
        assert_eq!(heading_boost(0), 1.0);
        assert!((heading_boost(1) - 1.6).abs() < 1e-9);
        assert!((heading_boost(6) - 1.1).abs() < 1e-9);
    }
}
