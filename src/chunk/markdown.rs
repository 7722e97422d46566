//! Heading-aware chunking for markdown and markdown-like text.
//!
//! Strips YAML frontmatter, then splits on ATX headings while tracking a
//! heading stack so each section carries its full ancestor trail. Fenced
//! code blocks never produce heading splits.

use super::{oversize_split_with_spans, ChunkDraft};

struct Section {
    path: Vec<String>,
    heading_depth: i32,
    text: String,
    start_line: i64,
}

pub fn chunk(text: &str, file_stem: &str, max_chunk_tokens: usize) -> Vec<ChunkDraft> {
    let (frontmatter, body, body_start_line) = strip_frontmatter(text);
    let metadata = frontmatter_metadata(frontmatter.as_deref());
    let tags_text = frontmatter
        .as_deref()
        .map(extract_tags)
        .unwrap_or_default();

    let mut drafts = Vec::new();
    let mut chunk_index = 0i64;
    for section in split_by_headings(&body, body_start_line, file_stem) {
        for (piece, start, end) in
            oversize_split_with_spans(&section.text, section.start_line, max_chunk_tokens)
        {
            if piece.trim().is_empty() {
                continue;
            }
            drafts.push(ChunkDraft {
                chunk_index,
                section_path: section.path.clone(),
                text: piece,
                start_line: start,
                end_line: end,
                metadata: metadata.clone(),
                heading_depth: section.heading_depth,
                tags_text: tags_text.clone(),
            });
            chunk_index += 1;
        }
    }
    drafts
}

/// Returns `(frontmatter, body, body_start_line)`. `body_start_line` is the
/// 1-based line the body's first line occupies in the original file.
fn strip_frontmatter(text: &str) -> (Option<String>, String, i64) {
    let Some(rest) = text.strip_prefix("---\n") else {
        return (None, text.to_string(), 1);
    };
    let Some(rel_end) = rest.find("\n---") else {
        return (None, text.to_string(), 1);
    };

    let frontmatter = rest[..rel_end].to_string();
    let mut body_start = 4 + rel_end + 4; // skip "---\n" + frontmatter + "\n---"
    if let Some(stripped) = text[body_start..].strip_prefix('\n') {
        body_start = text.len() - stripped.len();
    }

    let consumed_lines = text[..body_start].matches('\n').count() as i64;
    (Some(frontmatter), text[body_start..].to_string(), consumed_lines + 1)
}

fn split_by_headings(body: &str, start_line: i64, file_stem: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<(i32, String)> = Vec::new();
    let mut buffer = String::new();
    let mut buffer_start = start_line;
    let mut buffer_path = vec![file_stem.to_string()];
    let mut buffer_depth = 0i32;
    let mut in_fence = false;
    let mut line_no = start_line;

    for raw_line in body.lines() {
        let trimmed = raw_line.trim_start();
        let fence_toggle = trimmed.starts_with("```") || trimmed.starts_with("~~~");
        if fence_toggle {
            in_fence = !in_fence;
        }

        let heading = if !in_fence && !fence_toggle {
            parse_heading(trimmed)
        } else {
            None
        };

        if let Some((depth, title)) = heading {
            if !buffer.is_empty() {
                sections.push(Section {
                    path: buffer_path.clone(),
                    heading_depth: buffer_depth,
                    text: std::mem::take(&mut buffer),
                    start_line: buffer_start,
                });
            }
            while stack.last().is_some_and(|(d, _)| *d >= depth) {
                stack.pop();
            }
            stack.push((depth, title));
            buffer_path = stack.iter().map(|(_, t)| t.clone()).collect();
            buffer_depth = depth;
            buffer_start = line_no;
        }

        buffer.push_str(raw_line);
        buffer.push('\n');
        line_no += 1;
    }

    if !buffer.is_empty() {
        sections.push(Section {
            path: buffer_path,
            heading_depth: buffer_depth,
            text: buffer,
            start_line: buffer_start,
        });
    }

    sections
}

fn parse_heading(line: &str) -> Option<(i32, String)> {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((hashes as i32, rest.trim().to_string()))
}

/// Parses the frontmatter's top-level `key: value` scalar lines into a JSON
/// object, e.g. `title: X` → `{"title": "X"}`. Block/flow list values (like
/// `tags:`, read separately by [`extract_tags`]) and nested lines are
/// skipped; no general YAML parsing is attempted.
fn frontmatter_metadata(frontmatter: Option<&str>) -> serde_json::Value {
    let Some(raw) = frontmatter else {
        return serde_json::Value::Null;
    };

    let mut map = serde_json::Map::new();
    for line in raw.lines() {
        if line.starts_with(' ') || line.starts_with('\t') || line.starts_with('-') {
            continue;
        }
        let trimmed = line.trim();
        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() || value.starts_with('[') {
            continue;
        }
        map.insert(key.to_string(), serde_json::Value::String(unquote(value)));
    }

    if map.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::Value::Object(map)
    }
}

/// A deliberately naive YAML `tags:` reader: a flow list (`tags: [a, b]`), a
/// scalar (`tags: solo`), or a block list (`tags:` followed by `- item`
/// lines). No general YAML parsing is attempted.
fn extract_tags(frontmatter: &str) -> String {
    let mut tags = Vec::new();
    let mut in_block = false;
    for line in frontmatter.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("tags:") {
            let rest = rest.trim();
            in_block = false;
            if rest.starts_with('[') {
                tags.extend(
                    rest.trim_matches(|c| c == '[' || c == ']')
                        .split(',')
                        .map(|s| unquote(s.trim()))
                        .filter(|s| !s.is_empty()),
                );
            } else if rest.is_empty() {
                in_block = true;
            } else {
                tags.push(unquote(rest));
            }
        } else if in_block {
            if let Some(item) = trimmed.strip_prefix("- ") {
                tags.push(unquote(item));
            } else if !trimmed.is_empty() {
                in_block = false;
            }
        }
    }
    tags.join(" ")
}

fn unquote(s: &str) -> String {
    s.trim_matches('"').trim_matches('\'').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_before_first_heading_uses_filename_as_section_path() {
        let drafts = chunk("intro text\n\n# First\nbody", "readme", 1000);
        assert_eq!(drafts[0].section_path, vec!["readme".to_string()]);
        assert_eq!(drafts[1].section_path, vec!["First".to_string()]);
        assert_eq!(drafts[1].heading_depth, 1);
    }

    #[test]
    fn nested_headings_build_an_ancestor_trail() {
        let drafts = chunk("# A\ntext a\n## B\ntext b\n### C\ntext c", "doc", 1000);
        let by_path: Vec<Vec<String>> = drafts.iter().map(|d| d.section_path.clone()).collect();
        assert_eq!(by_path[2], vec!["A".to_string(), "B".to_string(), "C".to_string()]);
    }

    #[test]
    fn sibling_heading_pops_deeper_ancestors() {
        let drafts = chunk("# A\n## B\ntext\n## C\ntext", "doc", 1000);
        let c_section = drafts.iter().find(|d| d.text.trim() == "text" && d.section_path.last().unwrap() == "C");
        assert_eq!(
            c_section.unwrap().section_path,
            vec!["A".to_string(), "C".to_string()]
        );
    }

    #[test]
    fn fenced_code_block_hash_is_not_a_heading() {
        let drafts = chunk("# Real\n```\n# not a heading\n```\nafter", "doc", 1000);
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].text.contains("# not a heading"));
    }

    #[test]
    fn frontmatter_is_stripped_and_tags_extracted() {
        let text = "---\ntitle: Doc\ntags: [a, b]\n---\n# Heading\nbody";
        let drafts = chunk(text, "doc", 1000);
        assert_eq!(drafts[0].tags_text, "a b");
        assert!(!drafts[0].text.contains("title: Doc"));
        assert_eq!(drafts[0].metadata, serde_json::json!({"title": "Doc"}));
    }

    #[test]
    fn file_with_only_frontmatter_produces_zero_chunks() {
        let drafts = chunk("---\ntitle: Doc\n---\n", "doc", 1000);
        assert!(drafts.is_empty());
    }
}
