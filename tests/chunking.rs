//! End-to-end chunking scenarios: loader → sanitizer → chunker, checked
//! against the invariants the index depends on (code-fence integrity,
//! dense chunk indices, back-filled totals).

use std::fs;
use std::path::Path;

use docs_mcp::chunker::{Chunk, Chunker};
use docs_mcp::config::ChunkerKind;
use docs_mcp::loader::DocumentLoader;
use tempfile::TempDir;

fn write(dir: &Path, rel: &str, body: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

/// Four documents: one plain, one with an oversized code block, one with
/// 5-level nested spans, one demo.
fn build_corpus(dir: &Path) {
    write(
        dir,
        "docs/intro.md",
        &format!(
            "# Introduction\n\n## Getting started\n{}\n\n## Concepts\n{}",
            "Install the package and open a workbook. ".repeat(30),
            "A workbook contains worksheets. ".repeat(30)
        ),
    );

    let big_block = format!("```javascript\n{}\n```", "sheet.setValue(r, c, 1);\n".repeat(30));
    write(
        dir,
        "docs/code.md",
        &format!(
            "# Code samples\n\n## Setting values\nUse the API like this:\n\n{big_block}\n\nDone.",
        ),
    );

    write(
        dir,
        "docs/spans.md",
        "# Styled\n\n<span style=\"a\"><span><span><span><span>Deeply nested text</span></span></span></span></span> tail.",
    );

    write(
        dir,
        "demos/basic.md",
        "# Basic demo\n\nCreate a spreadsheet in ten lines.",
    );
}

fn chunk_corpus(dir: &Path, chunk_size: usize) -> Vec<Chunk> {
    let loader = DocumentLoader::new(dir).unwrap();
    let documents = loader.load_all(&["docs".to_string(), "demos".to_string()]);
    assert_eq!(documents.len(), 4);
    let chunker = Chunker::new(ChunkerKind::Markdown, chunk_size, 10);
    chunker.chunk_documents(&documents)
}

#[test]
fn corpus_indexes_with_sanitized_content_and_intact_code() {
    let tmp = TempDir::new().unwrap();
    build_corpus(tmp.path());
    let chunks = chunk_corpus(tmp.path(), 600);

    // Sanitizer collapsed the nested spans.
    let spans = chunks
        .iter()
        .find(|c| c.doc_id == "docs_spans")
        .expect("spans doc chunked");
    assert!(spans.content.contains("Deeply nested text tail."));
    assert!(!spans.content.contains("<span"));

    // The protected block came through as one piece in one chunk.
    let code_chunks: Vec<&Chunk> = chunks.iter().filter(|c| c.doc_id == "docs_code").collect();
    let block = format!("```javascript\n{}\n```", "sheet.setValue(r, c, 1);\n".repeat(30));
    // The sanitizer normalizes whitespace outside fences only, so the
    // block must appear verbatim in exactly one chunk.
    let holders: Vec<_> = code_chunks
        .iter()
        .filter(|c| c.content.contains(block.trim()))
        .collect();
    assert_eq!(holders.len(), 1, "code block split or duplicated");
}

#[test]
fn total_chunks_matches_emitted_count_per_document() {
    let tmp = TempDir::new().unwrap();
    build_corpus(tmp.path());
    let chunks = chunk_corpus(tmp.path(), 600);

    let mut by_doc: std::collections::BTreeMap<&str, Vec<&Chunk>> = Default::default();
    for chunk in &chunks {
        by_doc.entry(chunk.doc_id.as_str()).or_default().push(chunk);
    }

    for (doc_id, doc_chunks) in by_doc {
        let total = doc_chunks.len();
        let mut indices: Vec<usize> = doc_chunks.iter().map(|c| c.chunk_index).collect();
        indices.sort_unstable();
        assert_eq!(
            indices,
            (0..total).collect::<Vec<_>>(),
            "indices not dense for {doc_id}"
        );
        for chunk in doc_chunks {
            assert_eq!(chunk.meta.total_chunks, total, "stale total for {doc_id}");
            assert_eq!(chunk.id, format!("{doc_id}_chunk{}", chunk.chunk_index));
        }
    }
}

#[test]
fn no_fence_is_ever_split_across_chunks() {
    let tmp = TempDir::new().unwrap();

    // A worst case: alternating prose and fences around the budget size.
    let mut body = String::from("# Torture\n");
    for i in 0..6 {
        body.push_str(&format!(
            "\n## Section {i}\n{}\n```rust\nlet v{} = compute({});\nassert!(v{} > 0);\n```\n",
            "prose sentence here. ".repeat(12),
            i,
            i,
            i
        ));
    }
    write(tmp.path(), "docs/torture.md", &body);

    for kind in [ChunkerKind::Markdown, ChunkerKind::Typedoc, ChunkerKind::Javadoc] {
        let loader = DocumentLoader::new(tmp.path()).unwrap();
        let documents = loader.load_all(&["docs".to_string()]);
        let chunker = Chunker::new(kind, 300, 10);
        for chunk in chunker.chunk_documents(&documents) {
            assert_eq!(
                chunk.content.matches("```").count() % 2,
                0,
                "{kind:?} split a fence: {:?}",
                chunk.content
            );
        }
    }
}

#[test]
fn every_fenced_block_appears_identically_in_the_source() {
    let tmp = TempDir::new().unwrap();
    build_corpus(tmp.path());
    let loader = DocumentLoader::new(tmp.path()).unwrap();
    let documents = loader.load_all(&["docs".to_string(), "demos".to_string()]);
    let chunker = Chunker::new(ChunkerKind::Markdown, 600, 10);

    for doc in &documents {
        for chunk in chunker.chunk_document(doc) {
            // Every fence substring in a chunk must be a verbatim substring
            // of its source document.
            let mut rest = chunk.content.as_str();
            while let Some(start) = rest.find("```") {
                let after = &rest[start + 3..];
                let Some(end) = after.find("```") else { break };
                let fenced = &rest[start..start + 3 + end + 3];
                assert!(
                    doc.content.contains(fenced),
                    "fence not found in source: {fenced:?}"
                );
                rest = &rest[start + 3 + end + 3..];
            }
        }
    }
}

#[test]
fn doc_toc_reflects_the_whole_document_on_every_chunk() {
    let tmp = TempDir::new().unwrap();
    build_corpus(tmp.path());
    let chunks = chunk_corpus(tmp.path(), 600);

    for chunk in chunks.iter().filter(|c| c.doc_id == "docs_intro") {
        assert_eq!(
            chunk.meta.doc_toc,
            "Introduction\n  Getting started\n  Concepts"
        );
    }
}

#[test]
fn categories_flow_from_path_to_chunk_metadata() {
    let tmp = TempDir::new().unwrap();
    build_corpus(tmp.path());
    let chunks = chunk_corpus(tmp.path(), 600);

    let demo = chunks.iter().find(|c| c.doc_id == "demos_basic").unwrap();
    assert_eq!(demo.meta.category, "demo");
    assert_eq!(demo.meta.path_hierarchy, vec!["demos"]);

    let doc = chunks.iter().find(|c| c.doc_id == "docs_intro").unwrap();
    assert_eq!(doc.meta.category, "doc");
    assert_eq!(doc.meta.relative_path, "docs/intro.md");
}
