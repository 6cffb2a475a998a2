//! JavaDoc API reference chunking strategy.
//!
//! JavaDoc exports open with the class description, then `## Method
//! Summary` / `## Field Summary` tables, then a `## Method Details` body.
//! API documents go through the method scan regardless of size: they are
//! split into individual methods at `### methodName` markers and regrouped
//! under the class header region. Exports that do not match this layout
//! fall back to protected size-bounded splitting.

use std::sync::OnceLock;

use regex::Regex;

use crate::loader::Document;

use super::{header_line, markdown, typedoc, RawChunk, Splitter};

/// How far into the file the summary marker is expected.
const SUMMARY_SCAN_LINES: usize = 30;

/// Header region size assumed when no summary marker is found in range.
const FALLBACK_HEADER_LINES: usize = 15;

/// The layout is only trusted when it yields at least this many methods.
const MIN_METHODS: usize = 3;

fn method_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"^\s*\+?\s*###\s+\w+").unwrap())
}

pub fn chunk(split: &Splitter, doc: &Document) -> Vec<RawChunk> {
    match doc.meta.category.as_str() {
        // Even a class that fits the size budget is split by methods, so
        // every api chunk carries the header context and breadcrumb.
        "api" => chunk_api(split, &doc.content),
        "demo" => typedoc::chunk_demo(split, &doc.content),
        _ => markdown::chunk_content(split, &doc.content),
    }
}

fn chunk_api(split: &Splitter, content: &str) -> Vec<RawChunk> {
    let lines: Vec<&str> = content.lines().collect();

    // Header region: everything before the summary tables.
    let mut header_end = 0usize;
    for (i, line) in lines.iter().enumerate() {
        if line.contains("## Method Summary") || line.contains("## Field Summary") {
            header_end = i;
            break;
        }
        if i > SUMMARY_SCAN_LINES {
            header_end = FALLBACK_HEADER_LINES;
            break;
        }
    }
    let header = lines[..header_end.min(lines.len())].join("\n").trim().to_string();

    let details_start = lines
        .iter()
        .position(|line| line.contains("## Method Details") || line.contains("## Method Detail"));
    let details_start = match details_start {
        Some(i) => i,
        None => return chunk_by_size(split, content, &section_of(&header)),
    };

    // One method per `### name` marker (sometimes bulleted as `+ ###`).
    let marker = method_marker();
    let mut methods: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for &line in &lines[details_start..] {
        if marker.is_match(line) {
            if !current.is_empty() {
                methods.push(current.join("\n").trim().to_string());
            }
            current = vec![line];
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        methods.push(current.join("\n").trim().to_string());
    }

    if methods.len() < MIN_METHODS {
        return chunk_by_size(split, content, &section_of(&header));
    }

    let section_path = section_of(&header);
    let mut chunks = Vec::new();
    let mut group: Vec<String> = Vec::new();
    let mut group_size = 0usize;
    for method in methods {
        if group_size + method.len() > split.chunk_size && !group.is_empty() {
            chunks.push(emit_group(&header, &group, &section_path));
            group.clear();
            group_size = 0;
        }
        group_size += method.len();
        group.push(method);
    }
    if !group.is_empty() {
        chunks.push(emit_group(&header, &group, &section_path));
    }
    chunks
}

fn emit_group(header: &str, group: &[String], section_path: &[String]) -> RawChunk {
    let joined = group.join("\n\n");
    let content = if header.is_empty() {
        joined
    } else {
        format!("{header}\n\n---\n\n{joined}")
    };
    RawChunk::new(content, section_path.to_vec(), "api_methods")
}

fn chunk_by_size(split: &Splitter, content: &str, section_path: &[String]) -> Vec<RawChunk> {
    split
        .split_protected(content)
        .into_iter()
        .map(|piece| RawChunk::new(piece, section_path.to_vec(), "api_methods"))
        .collect()
}

/// Breadcrumb from the header region's first h1, when present.
fn section_of(header: &str) -> Vec<String> {
    header
        .lines()
        .find_map(|line| match header_line(line) {
            Some((1, text)) => Some(vec![text.to_string()]),
            _ => None,
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use crate::config::ChunkerKind;
    use crate::loader::{DocMeta, Document};

    use super::super::Chunker;

    fn api_doc(content: &str) -> Document {
        Document {
            id: "apis_Range".to_string(),
            content: content.to_string(),
            meta: DocMeta {
                relative_path: "apis/Range.java".to_string(),
                file_name: "Range".to_string(),
                category: "api".to_string(),
                path_hierarchy: vec!["apis".to_string()],
            },
        }
    }

    fn javadoc_export(method_count: usize, method_len: usize) -> String {
        let mut out = String::from(
            "# Range\n\ncom.example.spread\n\nRepresents a cell range.\n\n## Method Summary\n\n| method | description |\n\n## Method Details\n",
        );
        for i in 0..method_count {
            let body = "j".repeat(method_len);
            out.push_str(&format!("\n### method{i}\n\n{body}\n"));
        }
        out
    }

    #[test]
    fn twelve_methods_of_1500_chars_make_six_chunks_at_3000() {
        let content = javadoc_export(12, 1450);
        let chunker = Chunker::new(ChunkerKind::Javadoc, 3000, 100);
        let chunks = chunker.chunk_document(&api_doc(&content));

        assert_eq!(chunks.len(), 6);
        for chunk in &chunks {
            assert!(chunk.content.starts_with("# Range"));
            assert!(chunk.content.contains("\n\n---\n\n"));
            assert_eq!(chunk.meta.chunk_type, "api_methods");
            assert_eq!(chunk.meta.section_path, vec!["Range"]);
            assert_eq!(chunk.meta.total_chunks, 6);
        }
    }

    #[test]
    fn small_api_doc_still_gets_method_grouping() {
        // The whole export fits the size budget; the method scan must run
        // anyway so the chunk carries the class header and breadcrumb.
        let content = javadoc_export(4, 200);
        assert!(content.len() <= 3000);

        let chunker = Chunker::new(ChunkerKind::Javadoc, 3000, 100);
        let chunks = chunker.chunk_document(&api_doc(&content));

        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert!(chunk.content.starts_with("# Range"));
        assert!(chunk.content.contains("\n\n---\n\n"));
        for i in 0..4 {
            assert!(chunk.content.contains(&format!("### method{i}")));
        }
        assert_eq!(chunk.meta.chunk_type, "api_methods");
        assert_eq!(chunk.meta.section_path, vec!["Range"]);
        // The summary table stays in the header region, not the body.
        assert!(!chunk.content.contains("| method | description |"));
    }

    #[test]
    fn small_demo_and_doc_categories_stay_whole() {
        let demo = Document {
            id: "demos_quick".to_string(),
            content: "# Quick demo\n\nTen lines of setup.".to_string(),
            meta: DocMeta {
                relative_path: "demos/quick.md".to_string(),
                file_name: "quick".to_string(),
                category: "demo".to_string(),
                path_hierarchy: vec!["demos".to_string()],
            },
        };
        let chunker = Chunker::new(ChunkerKind::Javadoc, 3000, 10);
        let chunks = chunker.chunk_document(&demo);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].meta.chunk_type, "demo");
        assert_eq!(chunks[0].content, demo.content);
    }

    #[test]
    fn bulleted_method_markers_split_too() {
        let content = format!(
            "# Range\n\n## Method Summary\n\nx\n\n## Method Details\n\n+ ### alpha\n\n{}\n\n+ ### beta\n\n{}\n\n+ ### gamma\n\n{}\n",
            "a".repeat(400),
            "b".repeat(400),
            "c".repeat(400)
        );
        let chunker = Chunker::new(ChunkerKind::Javadoc, 500, 50);
        let chunks = chunker.chunk_document(&api_doc(&content));
        assert!(chunks.len() >= 3);
        let all: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert!(all.contains("### alpha"));
        assert!(all.contains("### gamma"));
    }

    #[test]
    fn too_few_methods_fall_back_to_size_splitting() {
        let content = format!(
            "# Range\n\n## Method Summary\n\nx\n\n## Method Details\n\n### only\n\n{}\n",
            "z".repeat(2000)
        );
        let chunker = Chunker::new(ChunkerKind::Javadoc, 600, 50);
        let chunks = chunker.chunk_document(&api_doc(&content));
        assert!(chunks.len() > 1);
        // Fallback chunks are plain slices, not header-prefixed groups.
        assert!(chunks.iter().all(|c| !c.content.contains("\n\n---\n\n")));
    }

    #[test]
    fn missing_details_section_falls_back() {
        let content = format!("# Range\n\nprose only\n\n{}", "w".repeat(2000));
        let chunker = Chunker::new(ChunkerKind::Javadoc, 600, 50);
        let chunks = chunker.chunk_document(&api_doc(&content));
        assert!(!chunks.is_empty());
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }

    #[test]
    fn code_fences_survive_method_grouping() {
        let code = format!("```java\n{}\n```", "range.setValue(0, 0, 1);\n".repeat(8));
        let mut content = String::from("# Range\n\n## Method Summary\n\nx\n\n## Method Details\n");
        for i in 0..4 {
            content.push_str(&format!("\n### m{i}\n\nUsage:\n\n{code}\n"));
        }
        let chunker = Chunker::new(ChunkerKind::Javadoc, 700, 50);
        let chunks = chunker.chunk_document(&api_doc(&content));
        for chunk in &chunks {
            assert_eq!(chunk.content.matches("```").count() % 2, 0);
        }
    }
}
