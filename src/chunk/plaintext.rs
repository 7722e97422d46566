//! Fallback chunker for unrecognized text: the whole file is one chunk,
//! subject to the shared oversize-split cascade.

use super::{oversize_split_with_spans, ChunkDraft};

pub fn chunk(text: &str, file_stem: &str, max_chunk_tokens: usize) -> Vec<ChunkDraft> {
    let path = vec![file_stem.to_string()];
    oversize_split_with_spans(text, 1, max_chunk_tokens)
        .into_iter()
        .filter(|(piece, _, _)| !piece.trim().is_empty())
        .enumerate()
        .map(|(i, (piece, start, end))| ChunkDraft {
            chunk_index: i as i64,
            section_path: path.clone(),
            text: piece,
            start_line: start,
            end_line: end,
            metadata: serde_json::Value::Null,
            heading_depth: 0,
            tags_text: String::new(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let drafts = chunk("just one short line", "notes", 1000);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].section_path, vec!["notes".to_string()]);
    }

    #[test]
    fn oversized_text_still_splits() {
        let text = "word ".repeat(500);
        let drafts = chunk(&text, "notes", 20);
        assert!(drafts.len() > 1);
    }

    #[test]
    fn empty_file_produces_zero_chunks() {
        assert!(chunk("", "notes", 1000).is_empty());
    }

    #[test]
    fn oversize_single_line_with_no_whitespace_hard_splits_under_budget() {
        let text = "x".repeat(4000);
        let drafts = chunk(&text, "blob", 100);
        assert!(drafts.len() > 1);
        for d in &drafts {
            assert!(d.text.chars().count() <= 100 * 4 + 1);
        }
    }
}
