//! Hybrid retrieval with cross-language degradation.
//!
//! Query flow: detect the query language, embed it, then pick the fusion
//! mode. Queries in the corpus language use server-side RRF over dense +
//! BM25 prefetch; queries in any other language fall back to dense-only
//! (lexical matching is useless across languages). Candidates are
//! optionally reranked by a cross-encoder; rerank failure is absorbed with
//! a warning and the fusion ordering stands.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::config::ProductConfig;
use crate::embedder::Embedder;
use crate::error::SearchError;
use crate::store::{payload_match, VectorStore};

/// Hard cap on chunks returned for a single document.
const DOC_CHUNK_CAP: usize = 100;

/// Preview length in characters.
const PREVIEW_CHARS: usize = 200;

/// How the candidate list was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    Rrf,
    DenseOnly,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub rank: usize,
    pub doc_id: String,
    pub chunk_id: String,
    pub score: f32,
    pub content: String,
    pub content_preview: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub search_time_ms: f64,
    pub rerank_used: bool,
    pub fusion_mode: FusionMode,
    pub detected_lang: String,
    pub doc_language: String,
}

/// One chunk of a reassembled document.
#[derive(Debug, Clone, Serialize)]
pub struct DocChunk {
    pub chunk_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub metadata: Value,
}

/// Normalizes ISO 639-3 detector output onto the corpus language codes.
pub fn normalize_lang_code(code: &str) -> Option<&'static str> {
    match code {
        "zho" | "cmn" | "lzh" => Some("zh"),
        "eng" => Some("en"),
        "jpn" => Some("ja"),
        _ => None,
    }
}

/// Selects the fusion mode from the detected query language and the
/// collection's declared corpus language.
pub fn choose_fusion(detected: &str, doc_language: &str) -> FusionMode {
    if detected == doc_language {
        FusionMode::Rrf
    } else {
        FusionMode::DenseOnly
    }
}

/// Per-product search engine. Holds shared clients behind `Arc`, so a
/// searcher is cheap to share across sessions.
pub struct Searcher {
    embedder: Arc<Embedder>,
    store: Arc<VectorStore>,
    config: Arc<ProductConfig>,
    min_detect_len: usize,
    rrf_k: u32,
}

impl Searcher {
    pub fn new(
        embedder: Arc<Embedder>,
        store: Arc<VectorStore>,
        config: Arc<ProductConfig>,
        min_detect_len: usize,
        rrf_k: u32,
    ) -> Self {
        Self {
            embedder,
            store,
            config,
            min_detect_len,
            rrf_k,
        }
    }

    pub fn config(&self) -> &Arc<ProductConfig> {
        &self.config
    }

    /// Detected query language, normalized to the corpus codes. Queries
    /// shorter than the detection minimum, and queries the detector cannot
    /// classify, fall back to the corpus language.
    pub fn detect_language(&self, query: &str) -> String {
        if query.chars().count() >= self.min_detect_len {
            if let Some(info) = whatlang::detect(query) {
                if let Some(code) = normalize_lang_code(info.lang().code()) {
                    return code.to_string();
                }
            }
        }
        self.config.doc_language.clone()
    }

    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        use_rerank: bool,
    ) -> Result<SearchResponse, SearchError> {
        let started = Instant::now();
        let params = &self.config.search;
        let limit = limit.unwrap_or(params.rerank_top_k);

        let detected_lang = self.detect_language(query);
        let fusion_mode = choose_fusion(&detected_lang, &self.config.doc_language);

        let dense = self
            .embedder
            .embed_query(query)
            .await
            .map_err(SearchError::Embedding)?;

        let candidates = match fusion_mode {
            FusionMode::Rrf => self
                .store
                .query_hybrid(
                    &self.config.collection,
                    &dense,
                    query,
                    params.prefetch_limit,
                    self.rrf_k,
                )
                .await
                .map_err(SearchError::Store)?,
            FusionMode::DenseOnly => self
                .store
                .query_dense(
                    &self.config.collection,
                    &dense,
                    params.prefetch_limit,
                    Some(params.dense_score_threshold),
                )
                .await
                .map_err(SearchError::Store)?,
        };

        // Candidate order and scores, possibly rewritten by the reranker.
        let mut ranked: Vec<(usize, f32)> = candidates
            .iter()
            .enumerate()
            .map(|(i, p)| (i, p.score))
            .collect();

        if use_rerank && self.embedder.has_reranker() && !candidates.is_empty() {
            let documents: Vec<&str> = candidates
                .iter()
                .map(|p| p.payload["content"].as_str().unwrap_or(""))
                .collect();
            match self
                .embedder
                .rerank(query, &documents, params.rerank_top_k)
                .await
            {
                Ok(reranked) => ranked = reranked,
                Err(e) => {
                    // Best-effort stage: keep the fusion ordering.
                    tracing::warn!(error = %e, "rerank failed, returning fusion order");
                }
            }
        }

        ranked.truncate(limit);

        let results: Vec<SearchResult> = ranked
            .into_iter()
            .filter_map(|(index, score)| candidates.get(index).map(|p| (p, score)))
            .enumerate()
            .map(|(rank, (point, score))| {
                let content = point.payload["content"].as_str().unwrap_or("").to_string();
                SearchResult {
                    rank: rank + 1,
                    doc_id: point.payload["doc_id"].as_str().unwrap_or("").to_string(),
                    chunk_id: point.payload["chunk_id"].as_str().unwrap_or("").to_string(),
                    score,
                    content_preview: preview(&content),
                    content,
                    metadata: point.payload.get("metadata").cloned().unwrap_or(Value::Null),
                }
            })
            .collect();

        Ok(SearchResponse {
            query: query.to_string(),
            results,
            search_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            rerank_used: use_rerank,
            fusion_mode,
            detected_lang,
            doc_language: self.config.doc_language.clone(),
        })
    }

    /// All chunks of one document, in `chunk_index` order.
    pub async fn get_doc_chunks(&self, doc_id: &str) -> Result<Vec<DocChunk>, SearchError> {
        let points = self
            .store
            .scroll(
                &self.config.collection,
                payload_match("doc_id", doc_id),
                DOC_CHUNK_CAP,
            )
            .await
            .map_err(SearchError::Store)?;

        let mut chunks: Vec<DocChunk> = points
            .into_iter()
            .map(|p| DocChunk {
                chunk_id: p.payload["chunk_id"].as_str().unwrap_or("").to_string(),
                chunk_index: p.payload["chunk_index"].as_u64().unwrap_or(0) as usize,
                content: p.payload["content"].as_str().unwrap_or("").to_string(),
                metadata: p.payload.get("metadata").cloned().unwrap_or(Value::Null),
            })
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }
}

/// First 200 characters on a char boundary, `...`-suffixed when truncated.
fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((byte, _)) => format!("{}...", &content[..byte]),
        None => content.to_string(),
    }
}
