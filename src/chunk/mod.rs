//! Extractors and chunkers: turn file bytes into a sequence of [`Chunk`]s
//! with section paths, line spans, and tags. See SPEC_FULL.md §4.B.
//!
//! Files are routed by extension to one of three processor pairs
//! (markdown, code, plaintext). All three share the same oversize-split
//! fallback cascade defined in this module.

mod code;
mod markdown;
mod plaintext;

use crate::embedding::EmbeddingProvider;
use crate::error::ChunkError;
use crate::models::{Chunk, StoredKey};
use std::path::Path;

/// A chunk before it has been assigned a stored key or embedding. The
/// pipeline (`prepare_file`), not the chunker, owns both.
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    pub chunk_index: i64,
    pub section_path: Vec<String>,
    pub text: String,
    pub start_line: i64,
    pub end_line: i64,
    pub metadata: serde_json::Value,
    pub heading_depth: i32,
    pub tags_text: String,
}

impl ChunkDraft {
    fn finalize(self, file_path: StoredKey) -> Chunk {
        Chunk {
            id: None,
            content_hash: Chunk::content_hash_of(&self.text),
            file_path,
            chunk_index: self.chunk_index,
            section_path: self.section_path,
            text: self.text,
            start_line: self.start_line,
            end_line: self.end_line,
            metadata: self.metadata,
            heading_depth: self.heading_depth,
            tags_text: self.tags_text,
        }
    }
}

/// The output of running one file through the pipeline, ready to hand to
/// storage. Carries no database identifiers; this step does no I/O beyond
/// reading the source file and calling the embedder.
pub struct PreparedFile {
    pub stored_key: StoredKey,
    pub chunks: Vec<Chunk>,
    pub embeddings: Vec<Vec<f32>>,
    pub mtime_ms: i64,
}

/// Reads `absolute_path`, chunks it, and embeds every chunk in one batch.
pub async fn prepare_file(
    embedder: &dyn EmbeddingProvider,
    dir_index: usize,
    rel_path: &Path,
    absolute_path: &Path,
    max_chunk_tokens: usize,
) -> Result<PreparedFile, ChunkError> {
    let bytes = std::fs::read(absolute_path)?;
    let text = String::from_utf8_lossy(&bytes).into_owned();

    let mtime_ms = std::fs::metadata(absolute_path)?
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    let file_stem = rel_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| rel_path.to_string_lossy().into_owned());

    let drafts = dispatch(rel_path, &text, &file_stem, max_chunk_tokens);
    let stored_key = StoredKey::new(dir_index, rel_path);

    let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
    let embeddings = if texts.is_empty() {
        Vec::new()
    } else {
        embedder.embed_texts(&texts).await?
    };

    let chunks = drafts
        .into_iter()
        .map(|d| d.finalize(stored_key.clone()))
        .collect();

    Ok(PreparedFile {
        stored_key,
        chunks,
        embeddings,
        mtime_ms,
    })
}

fn dispatch(rel_path: &Path, text: &str, file_stem: &str, max_chunk_tokens: usize) -> Vec<ChunkDraft> {
    let ext = rel_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "md" | "mdx" => markdown::chunk(text, file_stem, max_chunk_tokens),
        "rs" | "js" | "ts" | "go" | "java" | "c" | "h" | "cpp" => {
            code::chunk_braces(text, file_stem, max_chunk_tokens)
        }
        "py" | "rb" => code::chunk_indented(text, file_stem, max_chunk_tokens),
        _ => plaintext::chunk(text, file_stem, max_chunk_tokens),
    }
}

/// Ceiling of character count / 4. Deliberately not model-accurate; see
/// SPEC_FULL.md §9 Open Questions.
pub(crate) fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// Splits `text` at the largest natural boundary that brings every piece
/// under `max_tokens`: paragraphs, then sentences, then lines, then a hard
/// character cut, recursing into whichever pieces are still oversized.
pub(crate) fn oversize_split(text: &str, max_tokens: usize) -> Vec<String> {
    if estimate_tokens(text) <= max_tokens || text.is_empty() {
        return vec![text.to_string()];
    }

    let paragraphs = split_keep_sep(text, "\n\n");
    let pieces = if paragraphs.len() > 1 {
        paragraphs
    } else {
        let sentences = split_sentences(text);
        if sentences.len() > 1 {
            sentences
        } else {
            let lines = split_keep_sep(text, "\n");
            if lines.len() > 1 {
                lines
            } else {
                hard_split(text, max_tokens * 4)
            }
        }
    };

    let mut out = Vec::new();
    for piece in pieces {
        if estimate_tokens(&piece) > max_tokens && piece != text {
            out.extend(oversize_split(&piece, max_tokens));
        } else {
            out.push(piece);
        }
    }
    greedy_merge(out, max_tokens)
}

/// Same as [`oversize_split`] but also returns each piece's 1-based
/// inclusive line span, computed by walking newline counts in order.
pub(crate) fn oversize_split_with_spans(
    text: &str,
    start_line: i64,
    max_tokens: usize,
) -> Vec<(String, i64, i64)> {
    let mut out = Vec::new();
    let mut line = start_line;
    for piece in oversize_split(text, max_tokens) {
        let newlines = piece.matches('\n').count() as i64;
        let ends_with_newline = piece.ends_with('\n');
        let end_line = line + newlines - if ends_with_newline { 1 } else { 0 };
        let end_line = end_line.max(line);
        out.push((piece, line, end_line));
        line += newlines;
    }
    out
}

fn split_keep_sep(text: &str, sep: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(idx) = rest.find(sep) {
        let end = idx + sep.len();
        out.push(rest[..end].to_string());
        rest = &rest[end..];
    }
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}

fn split_sentences(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'.' || b == b'!' || b == b'?' {
            let mut j = i + 1;
            if j < bytes.len() && bytes[j].is_ascii_whitespace() {
                while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                    j += 1;
                }
                out.push(text[start..j].to_string());
                start = j;
                i = j;
                continue;
            }
        }
        i += 1;
    }
    if start < text.len() {
        out.push(text[start..].to_string());
    }
    out
}

fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}

fn greedy_merge(pieces: Vec<String>, max_tokens: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for piece in pieces {
        if let Some(last) = out.last_mut() {
            if estimate_tokens(last) + estimate_tokens(&piece) <= max_tokens {
                last.push_str(&piece);
                continue;
            }
        }
        out.push(piece);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_text_is_not_split() {
        let pieces = oversize_split("hello world", 100);
        assert_eq!(pieces, vec!["hello world".to_string()]);
    }

    #[test]
    fn oversized_text_splits_on_paragraphs_and_merges_back_up() {
        let text = "a".repeat(20) + "\n\n" + &"b".repeat(20);
        let pieces = oversize_split(&text, 6);
        assert!(pieces.len() >= 2);
        for piece in &pieces {
            assert!(estimate_tokens(piece) <= 6 || piece.chars().count() <= 24);
        }
    }

    #[test]
    fn hard_split_never_panics_on_unicode() {
        let text = "日".repeat(40);
        let pieces = oversize_split(&text, 2);
        assert!(pieces.iter().all(|p| !p.is_empty()));
    }

    #[test]
    fn line_spans_track_consumed_newlines() {
        let text = "line one\nline two\nline three";
        let spans = oversize_split_with_spans(text, 1, 100);
        assert_eq!(spans, vec![(text.to_string(), 1, 1)]);
    }
}
