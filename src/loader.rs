//! Document loading and HTML cleanup.
//!
//! Recursively reads Markdown (and exported Java doc) files under a base
//! directory, strips the HTML residue left by doc exporters, and derives
//! structural metadata from the file path:
//!
//! ```text
//! raw_data/spreadjs-en/
//! ├── apis/      category = "api"
//! ├── docs/      category = "doc"
//! └── demos/     category = "demo"
//! ```
//!
//! Fenced code blocks are stashed before any cleanup regex runs and
//! restored afterwards, so sample code is never rewritten.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use walkdir::WalkDir;

const EXTENSIONS: &[&str] = &["md", "java"];

/// Nested `<span>` levels collapsed by repeated passes.
const SPAN_PASSES: usize = 5;

/// An immutable source unit, read once per run.
#[derive(Debug, Clone)]
pub struct Document {
    /// Path-derived identifier: separators collapsed to underscores,
    /// extension stripped.
    pub id: String,
    pub content: String,
    pub meta: DocMeta,
}

/// Metadata inherited by every chunk of the document.
#[derive(Debug, Clone, Serialize)]
pub struct DocMeta {
    pub relative_path: String,
    pub file_name: String,
    pub category: String,
    pub path_hierarchy: Vec<String>,
}

fn category_for(top_dir: &str) -> String {
    match top_dir {
        "apis" => "api".to_string(),
        "docs" => "doc".to_string(),
        "demos" => "demo".to_string(),
        other => other.to_string(),
    }
}

pub struct DocumentLoader {
    base_dir: PathBuf,
}

impl DocumentLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        if !base_dir.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("document directory not found: {}", base_dir.display()),
            ));
        }
        Ok(Self { base_dir })
    }

    /// Loads every document under the listed subdirectories. Missing
    /// subdirectories are skipped silently; unreadable files are skipped
    /// with a warning.
    pub fn load_all(&self, subdirs: &[String]) -> Vec<Document> {
        let mut documents = Vec::new();
        for subdir in subdirs {
            let dir = self.base_dir.join(subdir);
            if !dir.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&dir)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let ext = entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("");
                if !EXTENSIONS.contains(&ext) {
                    continue;
                }
                if let Some(doc) = self.load_file(entry.path()) {
                    documents.push(doc);
                }
            }
        }
        tracing::info!(count = documents.len(), base = %self.base_dir.display(), "documents loaded");
        documents
    }

    pub fn load_file(&self, path: &Path) -> Option<Document> {
        let raw = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                return None;
            }
        };
        if raw.trim().is_empty() {
            return None;
        }

        let content = sanitize_html(&raw);
        let rel = path.strip_prefix(&self.base_dir).unwrap_or(path);
        let relative_path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();

        let file_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let category = parts
            .first()
            .map(|top| category_for(&top.to_lowercase()))
            .unwrap_or_else(|| "doc".to_string());
        let path_hierarchy = parts[..parts.len().saturating_sub(1)].to_vec();

        Some(Document {
            id: doc_id_from_path(&relative_path),
            content,
            meta: DocMeta {
                relative_path,
                file_name,
                category,
                path_hierarchy,
            },
        })
    }
}

/// Collapses a relative path into a document identifier:
/// `apis/Workbook.md` → `apis_Workbook`.
pub fn doc_id_from_path(relative_path: &str) -> String {
    let mut id = relative_path.replace(['\\', '/'], "_");
    for ext in EXTENSIONS {
        if let Some(stripped) = id.strip_suffix(&format!(".{ext}")) {
            id = stripped.to_string();
            break;
        }
    }
    id
}

struct Cleaners {
    fence: Regex,
    span_pair: Regex,
    span_empty: Regex,
    span_open: Regex,
    br: Regex,
    ccp_props: Regex,
    style_attr: Regex,
    class_attr: Regex,
    newlines: Regex,
    spaces: Regex,
}

fn cleaners() -> &'static Cleaners {
    static CLEANERS: OnceLock<Cleaners> = OnceLock::new();
    CLEANERS.get_or_init(|| Cleaners {
        fence: Regex::new(r"```[\s\S]*?```").unwrap(),
        span_pair: Regex::new(r"<span[^>]*>([^<]*)</span>").unwrap(),
        span_empty: Regex::new(r"<span[^>]*>\s*</span>").unwrap(),
        span_open: Regex::new(r"<span[^>]*>").unwrap(),
        br: Regex::new(r"<br\s*/?>").unwrap(),
        ccp_props: Regex::new(r#"\s*data-ccp-props="[^"]*""#).unwrap(),
        style_attr: Regex::new(r#"\s*style="[^"]*""#).unwrap(),
        class_attr: Regex::new(r#"\s*class="[^"]*""#).unwrap(),
        newlines: Regex::new(r"\n{3,}").unwrap(),
        spaces: Regex::new(r" {2,}").unwrap(),
    })
}

/// Strips HTML residue from exporter-generated Markdown while keeping
/// fenced code blocks byte-identical.
pub fn sanitize_html(content: &str) -> String {
    let c = cleaners();

    // Stash code blocks behind placeholders so no cleanup touches them.
    let mut stash: Vec<String> = Vec::new();
    let mut text = c
        .fence
        .replace_all(content, |caps: &regex::Captures| {
            stash.push(caps[0].to_string());
            format!("\u{1A}CODE{}\u{1A}", stash.len() - 1)
        })
        .into_owned();

    // Unwrap spans, innermost first; bounded passes cover realistic nesting.
    for _ in 0..SPAN_PASSES {
        let next = c.span_pair.replace_all(&text, "$1").into_owned();
        if next == text {
            break;
        }
        text = next;
    }
    text = c.span_empty.replace_all(&text, "").into_owned();
    text = c.span_open.replace_all(&text, "").into_owned();
    text = text.replace("</span>", "");

    text = c.br.replace_all(&text, "\n").into_owned();
    text = c.ccp_props.replace_all(&text, "").into_owned();
    text = c.style_attr.replace_all(&text, "").into_owned();
    text = c.class_attr.replace_all(&text, "").into_owned();

    text = c.newlines.replace_all(&text, "\n\n").into_owned();
    text = c.spaces.replace_all(&text, " ").into_owned();

    for (i, block) in stash.iter().enumerate() {
        text = text.replace(&format!("\u{1A}CODE{i}\u{1A}"), block);
    }

    text.trim().to_string()
}
