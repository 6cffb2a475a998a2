//! General Markdown chunking strategy.
//!
//! Small documents travel whole. Larger ones are split at `h2` first; any
//! section still over the size budget is split again at `h3` and then
//! size-bounded with code protection. Continuation pieces get the section's
//! header line re-prepended so no chunk loses its context, and every chunk
//! records its `[h2, h3]` breadcrumb.

use crate::loader::Document;

use super::{header_line, split_by_headers, RawChunk, Splitter};

const CHUNK_TYPE: &str = "docs";

pub fn chunk(split: &Splitter, doc: &Document) -> Vec<RawChunk> {
    chunk_content(split, &doc.content)
}

/// Strategy body, shared with the TypeDoc and JavaDoc chunkers for their
/// `doc`-category documents.
pub(crate) fn chunk_content(split: &Splitter, content: &str) -> Vec<RawChunk> {
    if content.len() <= split.chunk_size {
        return vec![RawChunk::new(content.to_string(), Vec::new(), CHUNK_TYPE)];
    }

    let mut chunks = Vec::new();
    for h2_section in split_by_headers(content, 2, 2) {
        let h2 = leading_header(&h2_section, 2);

        if h2_section.len() <= split.chunk_size {
            chunks.push(RawChunk::new(
                h2_section,
                breadcrumb(&h2, &None),
                CHUNK_TYPE,
            ));
            continue;
        }

        for h3_section in split_by_headers(&h2_section, 3, 3) {
            let h3 = leading_header(&h3_section, 3);
            let header_line_text = h3_section
                .lines()
                .next()
                .filter(|first| header_line(first).is_some())
                .map(|first| first.to_string());

            for (i, piece) in split.split_protected(&h3_section).into_iter().enumerate() {
                let content = match (&header_line_text, i) {
                    // Re-prepend the section header so continuation chunks
                    // keep their context.
                    (Some(header), i) if i > 0 && !piece.starts_with(header.as_str()) => {
                        format!("{header}\n\n{piece}")
                    }
                    _ => piece,
                };
                chunks.push(RawChunk::new(content, breadcrumb(&h2, &h3), CHUNK_TYPE));
            }
        }
    }
    chunks
}

/// Header text of the section's first line when it matches the level.
fn leading_header(section: &str, level: usize) -> Option<String> {
    section
        .lines()
        .next()
        .and_then(header_line)
        .filter(|(l, _)| *l == level)
        .map(|(_, text)| text.to_string())
}

fn breadcrumb(h2: &Option<String>, h3: &Option<String>) -> Vec<String> {
    [h2.clone(), h3.clone()].into_iter().flatten().collect()
}
