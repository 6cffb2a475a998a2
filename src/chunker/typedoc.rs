//! TypeDoc API reference chunking strategy.
//!
//! TypeDoc exports lead with a class/interface `h1`, then boilerplate
//! sections ("Content", "Table of contents", "Hierarchy") before the real
//! members. API documents are partitioned into members at `h2`/`h3`,
//! undersized members are dropped, and adjacent members are regrouped under
//! the class header so every chunk is self-describing.

use crate::loader::Document;

use super::{header_line, markdown, split_by_headers, RawChunk, Splitter};

/// TypeDoc boilerplate sections that precede the member listing.
const SKIP_SECTIONS: [&str; 3] = ["Content", "Table of contents", "Hierarchy"];

/// Reserved for the `\n\n---\n\n` joint between class header and members.
const HEADER_SLACK: usize = 10;

pub fn chunk(split: &Splitter, doc: &Document) -> Vec<RawChunk> {
    if doc.content.len() <= split.chunk_size {
        let chunk_type = match doc.meta.category.as_str() {
            "api" => "api_members",
            "demo" => "demo",
            _ => "docs",
        };
        return vec![RawChunk::new(doc.content.clone(), Vec::new(), chunk_type)];
    }

    match doc.meta.category.as_str() {
        "api" => chunk_api(split, &doc.content),
        "demo" => chunk_demo(split, &doc.content),
        _ => markdown::chunk_content(split, &doc.content),
    }
}

fn chunk_api(split: &Splitter, content: &str) -> Vec<RawChunk> {
    let class_header = first_header_of_level(content, 1);

    // The member region starts at the first h2 that is not boilerplate.
    let start = match member_region_start(content) {
        Some(offset) => offset,
        None => {
            // No recognizable member layout; fall back to protected
            // size-bounded splitting.
            return split
                .split_protected(content)
                .into_iter()
                .map(|piece| RawChunk::new(piece, Vec::new(), "api_members"))
                .collect();
        }
    };

    let section_path: Vec<String> = class_header
        .as_ref()
        .map(|(_, text)| vec![text.clone()])
        .unwrap_or_default();

    let members: Vec<String> = split_by_headers(&content[start..], 2, 3)
        .into_iter()
        .filter(|m| m.trim().len() >= split.min_chunk_size)
        .collect();
    if members.is_empty() {
        return split
            .split_protected(content)
            .into_iter()
            .map(|piece| RawChunk::new(piece, section_path.clone(), "api_members"))
            .collect();
    }

    let header_len = class_header.as_ref().map(|(line, _)| line.len()).unwrap_or(0);
    let budget = split
        .chunk_size
        .saturating_sub(header_len + HEADER_SLACK)
        .max(1);

    let mut chunks = Vec::new();
    let mut group: Vec<String> = Vec::new();
    let mut group_size = 0usize;
    for member in members {
        if group_size + member.len() > budget && !group.is_empty() {
            chunks.push(emit_group(&class_header, &group, &section_path));
            group.clear();
            group_size = 0;
        }
        group_size += member.len();
        group.push(member);
    }
    if !group.is_empty() {
        chunks.push(emit_group(&class_header, &group, &section_path));
    }
    chunks
}

fn emit_group(
    class_header: &Option<(String, String)>,
    group: &[String],
    section_path: &[String],
) -> RawChunk {
    let joined = group.join("\n\n");
    let content = match class_header {
        Some((line, _)) => format!("{line}\n\n---\n\n{joined}"),
        None => joined,
    };
    RawChunk::new(content, section_path.to_vec(), "api_members")
}

/// Demo documents: size-bounded split with the document title re-prepended
/// to every continuation chunk.
pub(crate) fn chunk_demo(split: &Splitter, content: &str) -> Vec<RawChunk> {
    let title_line = first_header_of_level(content, 1).map(|(line, _)| line);
    split
        .split_protected(content)
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            let body = match &title_line {
                Some(title) if i > 0 && !piece.starts_with(title.as_str()) => {
                    format!("{title}\n\n{piece}")
                }
                _ => piece,
            };
            RawChunk::new(body, Vec::new(), "demo")
        })
        .collect()
}

/// First header line of exactly `level` outside code fences:
/// `(full line, header text)`.
fn first_header_of_level(content: &str, level: usize) -> Option<(String, String)> {
    let mut in_fence = false;
    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some((l, text)) = header_line(line) {
            if l == level {
                return Some((line.to_string(), text.to_string()));
            }
        }
    }
    None
}

/// Byte offset of the first `h2` whose text is not TypeDoc boilerplate.
fn member_region_start(content: &str) -> Option<usize> {
    let mut offset = 0;
    let mut in_fence = false;
    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        } else if !in_fence {
            if let Some((2, text)) = header_line(line) {
                if !SKIP_SECTIONS.contains(&text) {
                    return Some(offset);
                }
            }
        }
        offset += line.len() + 1;
    }
    None
}
