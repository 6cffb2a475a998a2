//! Document chunking.
//!
//! Three strategies share one set of splitting primitives:
//!
//! | Strategy | Selected for | Module |
//! |----------|--------------|--------|
//! | `markdown` | general Markdown docs | [`markdown`] |
//! | `typedoc` | TypeDoc-exported JS/TS API references | [`typedoc`] |
//! | `javadoc` | JavaDoc-exported Java API references | [`javadoc`] |
//!
//! The primitives guarantee that no chunk straddles a fenced code block:
//! a fence either travels whole or, when oversize, is exploded into
//! smaller blocks that each re-wrap the original fence markers.
//!
//! Strategies produce raw pieces; [`Chunker::chunk_document`] then discards
//! whitespace-only and undersized pieces, assigns dense indices, and
//! back-fills `total_chunks` and the document outline onto every chunk.

pub mod javadoc;
pub mod markdown;
pub mod typedoc;

use serde::Serialize;

use crate::config::ChunkerKind;
use crate::loader::{DocMeta, Document};

/// An ordered slice of a document, ready for embedding.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// `{doc_id}_chunk{N}` with N dense from 0.
    pub id: String,
    pub doc_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub meta: ChunkMeta,
}

/// Chunk metadata: inherited document fields plus structural context.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkMeta {
    pub relative_path: String,
    pub file_name: String,
    pub category: String,
    pub path_hierarchy: Vec<String>,
    /// Breadcrumb of enclosing headers, outermost first.
    pub section_path: Vec<String>,
    pub chunk_type: String,
    /// Indented header outline of the whole parent document.
    pub doc_toc: String,
    /// Back-filled after the document finishes chunking.
    pub total_chunks: usize,
}

/// A strategy's output before index assignment and filtering.
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub content: String,
    pub section_path: Vec<String>,
    pub chunk_type: &'static str,
}

impl RawChunk {
    pub fn new(content: String, section_path: Vec<String>, chunk_type: &'static str) -> Self {
        Self {
            content,
            section_path,
            chunk_type,
        }
    }
}

/// Size bounds shared by every splitting primitive.
#[derive(Debug, Clone, Copy)]
pub struct Splitter {
    pub chunk_size: usize,
    pub min_chunk_size: usize,
}

/// Strategy selector plus size bounds; one per product.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    pub kind: ChunkerKind,
    pub split: Splitter,
}

impl Chunker {
    pub fn new(kind: ChunkerKind, chunk_size: usize, min_chunk_size: usize) -> Self {
        Self {
            kind,
            split: Splitter {
                chunk_size,
                min_chunk_size,
            },
        }
    }

    pub fn chunk_document(&self, doc: &Document) -> Vec<Chunk> {
        let raws = match self.kind {
            ChunkerKind::Markdown => markdown::chunk(&self.split, doc),
            ChunkerKind::Typedoc => typedoc::chunk(&self.split, doc),
            ChunkerKind::Javadoc => javadoc::chunk(&self.split, doc),
        };
        finalize(&self.split, doc, raws)
    }

    pub fn chunk_documents(&self, docs: &[Document]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for doc in docs {
            chunks.extend(self.chunk_document(doc));
        }
        tracing::info!(
            docs = docs.len(),
            chunks = chunks.len(),
            "chunking complete"
        );
        chunks
    }
}

/// Filters, indexes, and back-fills a strategy's raw output.
fn finalize(split: &Splitter, doc: &Document, raws: Vec<RawChunk>) -> Vec<Chunk> {
    let nonempty: Vec<RawChunk> = raws
        .into_iter()
        .filter(|r| !r.content.trim().is_empty())
        .collect();

    let kept: Vec<RawChunk> = if nonempty.len() <= 1 {
        nonempty
    } else {
        let sized: Vec<RawChunk> = nonempty
            .iter()
            .filter(|r| r.content.trim().len() >= split.min_chunk_size)
            .cloned()
            .collect();
        if sized.is_empty() {
            // Every piece is undersized; keep the first so the document
            // stays retrievable.
            vec![nonempty.into_iter().next().unwrap()]
        } else {
            sized
        }
    };

    let doc_toc = extract_toc(&doc.content);
    let total = kept.len();
    kept.into_iter()
        .enumerate()
        .map(|(i, raw)| Chunk {
            id: format!("{}_chunk{}", doc.id, i),
            doc_id: doc.id.clone(),
            chunk_index: i,
            content: raw.content.trim().to_string(),
            meta: chunk_meta(&doc.meta, raw.section_path, raw.chunk_type, &doc_toc, total),
        })
        .collect()
}

fn chunk_meta(
    doc: &DocMeta,
    section_path: Vec<String>,
    chunk_type: &str,
    doc_toc: &str,
    total_chunks: usize,
) -> ChunkMeta {
    ChunkMeta {
        relative_path: doc.relative_path.clone(),
        file_name: doc.file_name.clone(),
        category: doc.category.clone(),
        path_hierarchy: doc.path_hierarchy.clone(),
        section_path,
        chunk_type: chunk_type.to_string(),
        doc_toc: doc_toc.to_string(),
        total_chunks,
    }
}

// ── Shared splitting primitives ──────────────────────────────────────

/// Parses an ATX header line outside a code fence: `(level, text)`.
pub fn header_line(line: &str) -> Option<(usize, &str)> {
    let hashes = line.len() - line.trim_start_matches('#').len();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = &line[hashes..];
    rest.strip_prefix(' ').map(|text| (hashes, text.trim()))
}

fn is_fence_line(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// Splits at ATX headers whose level falls within `min_level..=max_level`,
/// keeping the header line as the first line of the following section.
/// Headers inside fenced code blocks do not split.
pub fn split_by_headers(content: &str, min_level: usize, max_level: usize) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    for line in content.lines() {
        if is_fence_line(line) {
            in_fence = !in_fence;
        }
        let splits_here = !in_fence
            && header_line(line)
                .map(|(level, _)| (min_level..=max_level).contains(&level))
                .unwrap_or(false);
        if splits_here && !current.trim().is_empty() {
            sections.push(current.trim().to_string());
            current = String::new();
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current.trim().to_string());
    }

    if sections.is_empty() {
        vec![content.to_string()]
    } else {
        sections
    }
}

/// Emits the document's indented header outline: two spaces of indent per
/// level beyond the first. Stored on every chunk of the document.
pub fn extract_toc(content: &str) -> String {
    let mut lines = Vec::new();
    let mut in_fence = false;
    for line in content.lines() {
        if is_fence_line(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some((level, text)) = header_line(line) {
            lines.push(format!("{}{}", "  ".repeat(level - 1), text));
        }
    }
    lines.join("\n")
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Finds the last occurrence of `sep` strictly inside `text[..max_pos]`.
/// A `.` separator is only accepted when followed by whitespace or the end
/// of the text, so dots inside URLs and qualified names never break.
fn rfind_separator(text: &str, max_pos: usize, sep: &str) -> Option<usize> {
    let window = &text[..max_pos];
    if sep == "." {
        window
            .match_indices('.')
            .filter(|(i, _)| match text[i + 1..].chars().next() {
                None => true,
                Some(c) => c.is_whitespace(),
            })
            .map(|(i, _)| i)
            .next_back()
    } else {
        window.rfind(sep)
    }
}

impl Splitter {
    /// Best break position within the first `budget` bytes of `text`,
    /// searching separators in priority order. A candidate is accepted only
    /// past half the budget; otherwise the budget boundary is a hard cut.
    fn find_break_point(&self, text: &str, budget: usize) -> usize {
        let max_pos = floor_char_boundary(text, budget.min(text.len()));
        let half = budget / 2;
        for sep in ["\n\n", "\n", "。", "."] {
            if let Some(pos) = rfind_separator(text, max_pos, sep) {
                if pos > half {
                    return pos + sep.len();
                }
            }
        }
        if max_pos == 0 {
            // Budget smaller than the first character; advance by one char
            // so the caller always makes progress.
            text.chars().next().map(|c| c.len_utf8()).unwrap_or(1)
        } else {
            max_pos
        }
    }

    /// Size-bounded splitting that never cuts inside a fenced code block.
    ///
    /// Code segments are kept whole when they fit within 1.5× the chunk
    /// size alongside the accumulated text; blocks larger than 3× are
    /// exploded by [`Splitter::split_code_block`]. Plain text is cut at the
    /// best break point.
    pub fn split_protected(&self, text: &str) -> Vec<String> {
        if text.len() <= self.chunk_size {
            return vec![text.to_string()];
        }

        let mut chunks: Vec<String> = Vec::new();
        let mut acc = String::new();

        for (segment, is_code) in fence_segments(text) {
            if is_code {
                if segment.len() > self.chunk_size * 3 {
                    flush(&mut chunks, &mut acc);
                    for piece in self.split_code_block(segment) {
                        self.take_code(&mut chunks, &mut acc, &piece);
                    }
                } else {
                    self.take_code(&mut chunks, &mut acc, segment);
                }
            } else {
                self.take_text(&mut chunks, &mut acc, segment);
            }
        }

        if !acc.trim().is_empty() && acc.trim().len() >= self.min_chunk_size {
            chunks.push(acc.trim().to_string());
        }

        if chunks.is_empty() {
            vec![text.to_string()]
        } else {
            chunks
        }
    }

    fn take_code(&self, chunks: &mut Vec<String>, acc: &mut String, segment: &str) {
        if acc.is_empty() {
            acc.push_str(segment);
        } else if acc.len() + segment.len() <= self.chunk_size * 3 / 2 {
            acc.push_str(segment);
        } else {
            flush(chunks, acc);
            acc.push_str(segment);
        }
    }

    fn take_text(&self, chunks: &mut Vec<String>, acc: &mut String, segment: &str) {
        if acc.len() + segment.len() <= self.chunk_size {
            acc.push_str(segment);
            return;
        }
        let mut remaining = segment;
        while !remaining.is_empty() {
            let space_left = self.chunk_size.saturating_sub(acc.len());
            if space_left == 0 {
                flush(chunks, acc);
                continue;
            }
            if remaining.len() <= space_left {
                acc.push_str(remaining);
                break;
            }
            let cut = self.find_break_point(remaining, space_left);
            acc.push_str(&remaining[..cut]);
            flush(chunks, acc);
            remaining = &remaining[cut..];
        }
    }

    /// Explodes an oversize fenced block, preserving the fence. Splits by
    /// blank lines first, then by single lines; a single line longer than
    /// the budget is hard-sliced (base64 blobs and the like). Every emitted
    /// piece re-wraps the original opening fence.
    pub fn split_code_block(&self, block: &str) -> Vec<String> {
        let trimmed = block.trim();
        let mut lines: Vec<&str> = trimmed.lines().collect();
        let open = if lines.first().map(|l| l.trim_start().starts_with("```")) == Some(true) {
            lines.remove(0)
        } else {
            "```"
        };
        if lines.last().map(|l| l.trim() == "```") == Some(true) {
            lines.pop();
        }
        let body = lines.join("\n");

        let overhead = open.len() + 5; // newline + closing fence + newline
        let budget = self.chunk_size.saturating_sub(overhead).max(1);

        let mut sep = "\n\n";
        let mut parts: Vec<&str> = body.split("\n\n").collect();
        if parts.len() == 1 {
            sep = "\n";
            parts = body.lines().collect();
        }

        // Hard-slice any single part that alone exceeds the budget.
        let mut sized: Vec<String> = Vec::new();
        for part in parts {
            if part.len() <= budget {
                sized.push(part.to_string());
            } else {
                let mut rest = part;
                while !rest.is_empty() {
                    let mut cut = floor_char_boundary(rest, budget.min(rest.len()));
                    if cut == 0 {
                        cut = rest.chars().next().map(|c| c.len_utf8()).unwrap_or(1);
                    }
                    sized.push(rest[..cut].to_string());
                    rest = &rest[cut..];
                }
            }
        }

        let mut groups: Vec<String> = Vec::new();
        let mut group = String::new();
        for part in sized {
            let needed = if group.is_empty() {
                part.len()
            } else {
                group.len() + sep.len() + part.len()
            };
            if needed > budget && !group.is_empty() {
                groups.push(std::mem::take(&mut group));
            }
            if !group.is_empty() {
                group.push_str(sep);
            }
            group.push_str(&part);
        }
        if !group.is_empty() {
            groups.push(group);
        }

        groups
            .into_iter()
            .map(|g| format!("{open}\n{g}\n```"))
            .collect()
    }
}

fn flush(chunks: &mut Vec<String>, acc: &mut String) {
    if !acc.trim().is_empty() {
        chunks.push(acc.trim().to_string());
    }
    acc.clear();
}

/// Partitions text into alternating plain and fenced-code segments.
/// An unterminated fence at the end of the text is treated as plain text.
fn fence_segments(text: &str) -> Vec<(&str, bool)> {
    let mut segments: Vec<(&str, bool)> = Vec::new();
    let mut pos = 0;

    while let Some(start_rel) = text[pos..].find("```") {
        let start = pos + start_rel;
        let after_open = match text[start + 3..].find('\n') {
            Some(nl) => start + 3 + nl + 1,
            None => break,
        };
        let end = match text[after_open..].find("```") {
            Some(close_rel) => {
                let close = after_open + close_rel + 3;
                // Extend through the rest of the closing fence line.
                match text[close..].find('\n') {
                    Some(nl) => close + nl,
                    None => text.len(),
                }
            }
            None => break,
        };
        if start > pos {
            segments.push((&text[pos..start], false));
        }
        segments.push((&text[start..end], true));
        pos = end;
    }
    if pos < text.len() {
        segments.push((&text[pos..], false));
    }
    segments
}
