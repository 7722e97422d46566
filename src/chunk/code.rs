//! Table-driven code chunking: one chunk per top-level declaration (scope
//! chain as its section path), falling back to the shared oversize-split
//! cascade for declarations that exceed the token budget.
//!
//! This tracks brace or indentation scope by pattern matching on a small
//! keyword table rather than parsing a real per-language grammar; see
//! SPEC_FULL.md §4.B and §9 for why that's the right tradeoff here.

use super::{oversize_split_with_spans, ChunkDraft};

const DECL_KEYWORDS: &[&str] = &[
    "fn ", "pub fn ", "async fn ", "function ", "class ", "impl ", "struct ", "interface ",
    "enum ", "trait ", "def ", "module ", "public ", "private ", "protected ", "void ", "export ",
];

fn looks_like_declaration(line: &str) -> bool {
    let trimmed = line.trim_start();
    DECL_KEYWORDS.iter().any(|kw| trimmed.starts_with(kw))
}

fn declaration_label(line: &str) -> String {
    let trimmed = line.trim().trim_end_matches('{').trim_end_matches(':').trim();
    if trimmed.chars().count() > 80 {
        trimmed.chars().take(80).collect()
    } else {
        trimmed.to_string()
    }
}

fn net_brace_delta(line: &str) -> i32 {
    line.chars().filter(|&c| c == '{').count() as i32 - line.chars().filter(|&c| c == '}').count() as i32
}

/// Per-language chunker for brace-delimited languages: `.rs`, `.js`, `.ts`,
/// `.go`, `.java`, `.c`, `.h`, `.cpp`.
pub fn chunk_braces(text: &str, file_stem: &str, max_chunk_tokens: usize) -> Vec<ChunkDraft> {
    let mut drafts = Vec::new();
    let mut chunk_index = 0i64;
    let mut depth = 0i32;
    let mut buffer = String::new();
    let mut buffer_start = 1i64;
    let mut label: Option<String> = None;
    let mut line_no = 1i64;

    for raw_line in text.lines() {
        let depth_before = depth;
        if depth_before == 0 && buffer.is_empty() {
            buffer_start = line_no;
        }
        if depth_before == 0 && label.is_none() && raw_line.contains('{') && looks_like_declaration(raw_line) {
            label = Some(declaration_label(raw_line));
        }

        buffer.push_str(raw_line);
        buffer.push('\n');
        depth = (depth + net_brace_delta(raw_line)).max(0);

        if depth_before > 0 && depth == 0 {
            flush(&mut drafts, &mut chunk_index, file_stem, &label, &buffer, buffer_start, max_chunk_tokens);
            buffer.clear();
            label = None;
        }
        line_no += 1;
    }
    flush(&mut drafts, &mut chunk_index, file_stem, &label, &buffer, buffer_start, max_chunk_tokens);
    drafts
}

/// Per-language chunker for indentation-delimited languages: `.py`, `.rb`.
/// A top-level declaration ends when a subsequent non-blank line returns to
/// column zero.
pub fn chunk_indented(text: &str, file_stem: &str, max_chunk_tokens: usize) -> Vec<ChunkDraft> {
    let mut drafts = Vec::new();
    let mut chunk_index = 0i64;
    let mut buffer = String::new();
    let mut buffer_start = 1i64;
    let mut label: Option<String> = None;
    let mut inside_block = false;
    let mut line_no = 1i64;

    for raw_line in text.lines() {
        let is_blank = raw_line.trim().is_empty();
        let is_top_level = !is_blank && !raw_line.starts_with(' ') && !raw_line.starts_with('\t');

        if is_top_level && inside_block {
            flush(&mut drafts, &mut chunk_index, file_stem, &label, &buffer, buffer_start, max_chunk_tokens);
            buffer.clear();
            label = None;
            inside_block = false;
        }
        if buffer.is_empty() {
            buffer_start = line_no;
        }
        if is_top_level && looks_like_declaration(raw_line) {
            label = Some(declaration_label(raw_line));
            inside_block = true;
        }

        buffer.push_str(raw_line);
        buffer.push('\n');
        line_no += 1;
    }
    flush(&mut drafts, &mut chunk_index, file_stem, &label, &buffer, buffer_start, max_chunk_tokens);
    drafts
}

fn flush(
    drafts: &mut Vec<ChunkDraft>,
    chunk_index: &mut i64,
    file_stem: &str,
    label: &Option<String>,
    buffer: &str,
    start_line: i64,
    max_chunk_tokens: usize,
) {
    if buffer.trim().is_empty() {
        return;
    }
    let path = match label {
        Some(l) => vec![file_stem.to_string(), l.clone()],
        None => vec![file_stem.to_string()],
    };
    for (piece, start, end) in oversize_split_with_spans(buffer, start_line, max_chunk_tokens) {
        if piece.trim().is_empty() {
            continue;
        }
        drafts.push(ChunkDraft {
            chunk_index: *chunk_index,
            section_path: path.clone(),
            text: piece,
            start_line: start,
            end_line: end,
            metadata: serde_json::Value::Null,
            heading_depth: 0,
            tags_text: String::new(),
        });
        *chunk_index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_function_becomes_its_own_chunk() {
        let src = "use std::fmt;\n\nfn greet() {\n    println!(\"hi\");\n}\n\nfn farewell() {\n    println!(\"bye\");\n}\n";
        let drafts = chunk_braces(src, "lib", 1000);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].section_path, vec!["lib".to_string(), "fn greet()".to_string()]);
        assert_eq!(drafts[1].section_path, vec!["lib".to_string(), "fn farewell()".to_string()]);
    }

    #[test]
    fn nested_braces_stay_within_the_enclosing_declaration() {
        let src = "impl Foo {\n    fn bar(&self) {\n        if true {\n            do_thing();\n        }\n    }\n}\n";
        let drafts = chunk_braces(src, "foo", 1000);
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].text.contains("do_thing"));
    }

    #[test]
    fn python_declarations_split_on_dedent() {
        let src = "import os\n\ndef first():\n    return 1\n\ndef second():\n    return 2\n";
        let drafts = chunk_indented(src, "mod", 1000);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].section_path, vec!["mod".to_string(), "def first():".to_string()]);
    }
}
