//! Voyage AI embedding and rerank client.
//!
//! Wraps the external embedding API with the behavior the indexer and
//! searcher rely on:
//!
//! - **Token estimation** — CJK characters at 1.5 chars/token, everything
//!   else at 2.5. An approximation used only for batching and rate-limit
//!   accounting; it does not track provider tokenization.
//! - **Dynamic batching** — a batch closes when its estimated tokens would
//!   exceed 60,000 (half the provider's 120k ceiling, slack for estimate
//!   drift) or when it reaches the configured input ceiling. Oversize
//!   single inputs go alone.
//! - **Rate-limit integration** — `check_and_record` before every network
//!   call; a [`RateLimitError`] escapes to the caller undecoded.
//! - **Retry** — up to 3 attempts for 429/5xx/network failures with
//!   exponential backoff (1 s base); other failures escape immediately.
//! - **Dimension check** — any returned vector whose length differs from
//!   the model's declared dimension is fatal.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ApiError, EmbedError};
use crate::ratelimit::RateLimiter;

const VOYAGE_BASE_URL: &str = "https://api.voyageai.com/v1";

/// Half of the provider's 120k-token request ceiling.
const BATCH_TOKEN_BUDGET: u64 = 60_000;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Estimated token count for rate-limit accounting and batch planning.
pub fn estimate_tokens(text: &str) -> u64 {
    let mut cjk = 0usize;
    let mut other = 0usize;
    for c in text.chars() {
        if is_cjk(c) {
            cjk += 1;
        } else {
            other += 1;
        }
    }
    (cjk as f64 / 1.5 + other as f64 / 2.5).ceil() as u64
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3000}'..='\u{303F}'   // CJK punctuation
        | '\u{3040}'..='\u{30FF}' // Hiragana + Katakana
        | '\u{3400}'..='\u{4DBF}' // CJK extension A
        | '\u{4E00}'..='\u{9FFF}' // CJK unified ideographs
        | '\u{AC00}'..='\u{D7AF}' // Hangul syllables
        | '\u{F900}'..='\u{FAFF}' // CJK compatibility ideographs
        | '\u{FF00}'..='\u{FFEF}' // fullwidth forms
    )
}

/// Groups input indices into batches respecting the token budget and the
/// input-count ceiling. Order is preserved; every index appears exactly once.
pub fn plan_batches(texts: &[String], max_inputs: usize) -> Vec<Vec<usize>> {
    let mut batches = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_tokens = 0u64;

    for (i, text) in texts.iter().enumerate() {
        let cost = estimate_tokens(text);
        let over_budget = current_tokens + cost > BATCH_TOKEN_BUDGET;
        let full = current.len() >= max_inputs;
        if (over_budget || full) && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current.push(i);
        current_tokens += cost;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct RerankEntry {
    index: usize,
    relevance_score: f32,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    #[serde(alias = "results")]
    data: Vec<RerankEntry>,
}

/// Shared client for Voyage embeddings and reranking. Safe for concurrent
/// use: the HTTP client is cloneable and the rate limiter is internally
/// synchronized.
pub struct Embedder {
    http: reqwest::Client,
    api_key: String,
    embed_model: String,
    rerank_model: Option<String>,
    dimension: usize,
    limiter: Arc<RateLimiter>,
    max_batch_inputs: usize,
}

impl Embedder {
    pub fn new(
        api_key: String,
        embed_model: String,
        rerank_model: Option<String>,
        limiter: Arc<RateLimiter>,
        max_batch_inputs: usize,
    ) -> Self {
        let dimension = model_dimension(&embed_model);
        Self {
            http: reqwest::Client::new(),
            api_key,
            embed_model,
            rerank_model,
            dimension,
            limiter,
            max_batch_inputs: max_batch_inputs.max(1),
        }
    }

    /// Declared output dimension of the configured embedding model.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn has_reranker(&self) -> bool {
        self.rerank_model.is_some()
    }

    /// Embeds document texts in planned batches, returning one vector per
    /// input in input order.
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut out: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];
        for batch in plan_batches(texts, self.max_batch_inputs) {
            let inputs: Vec<&str> = batch.iter().map(|&i| texts[i].as_str()).collect();
            let vectors = self.embed_batch(&inputs, "document").await?;
            for (slot, vector) in batch.into_iter().zip(vectors) {
                out[slot] = vector;
            }
        }
        Ok(out)
    }

    /// Embeds a single query string.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(&[text], "query").await?;
        Ok(vectors.remove(0))
    }

    async fn embed_batch(
        &self,
        inputs: &[&str],
        input_type: &str,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let batch_tokens: u64 = inputs.iter().map(|t| estimate_tokens(t)).sum();
        let body = serde_json::json!({
            "input": inputs,
            "model": self.embed_model,
            "input_type": input_type,
        });

        let mut last_err: Option<ApiError> = None;
        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 2)).await;
            }

            self.limiter.check_and_record(batch_tokens)?;

            match self.post_embeddings(&body).await {
                Ok(vectors) => {
                    for v in &vectors {
                        if v.len() != self.dimension {
                            return Err(ApiError::DimensionMismatch {
                                expected: self.dimension,
                                actual: v.len(),
                            }
                            .into());
                        }
                    }
                    return Ok(vectors);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        attempt,
                        error = %e,
                        inputs = inputs.len(),
                        "embedding attempt failed, retrying"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err
            .unwrap_or(ApiError::Malformed {
                service: "voyage",
                message: "embedding failed with no recorded error".to_string(),
            })
            .into())
    }

    async fn post_embeddings(&self, body: &serde_json::Value) -> Result<Vec<Vec<f32>>, ApiError> {
        let response = self
            .http
            .post(format!("{VOYAGE_BASE_URL}/embeddings"))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::Network {
                service: "voyage",
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                service: "voyage",
                status: status.as_u16(),
                message,
            });
        }

        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| ApiError::Malformed {
                service: "voyage",
                message: e.to_string(),
            })?;

        // The API documents input order, but the index field is canonical.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    /// Cross-encoder rerank of `documents` against `query`. Same retry
    /// semantics as embedding. Returns `(input_index, relevance_score)`
    /// pairs, best first.
    pub async fn rerank(
        &self,
        query: &str,
        documents: &[&str],
        top_k: usize,
    ) -> Result<Vec<(usize, f32)>, EmbedError> {
        let model = match &self.rerank_model {
            Some(m) => m.clone(),
            None => {
                // No reranker configured: identity order.
                return Ok((0..documents.len().min(top_k)).map(|i| (i, 0.0)).collect());
            }
        };

        let rerank_tokens = estimate_tokens(query)
            + documents.iter().map(|d| estimate_tokens(d)).sum::<u64>();
        let body = serde_json::json!({
            "query": query,
            "documents": documents,
            "model": model,
            "top_k": top_k.min(documents.len()),
        });

        let mut last_err: Option<ApiError> = None;
        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 2)).await;
            }

            self.limiter.check_and_record(rerank_tokens)?;

            match self.post_rerank(&body).await {
                Ok(ranked) => return Ok(ranked),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(attempt, error = %e, "rerank attempt failed, retrying");
                    last_err = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err
            .unwrap_or(ApiError::Malformed {
                service: "voyage",
                message: "rerank failed with no recorded error".to_string(),
            })
            .into())
    }

    async fn post_rerank(&self, body: &serde_json::Value) -> Result<Vec<(usize, f32)>, ApiError> {
        let response = self
            .http
            .post(format!("{VOYAGE_BASE_URL}/rerank"))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::Network {
                service: "voyage",
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                service: "voyage",
                status: status.as_u16(),
                message,
            });
        }

        let parsed: RerankResponse = response.json().await.map_err(|e| ApiError::Malformed {
            service: "voyage",
            message: e.to_string(),
        })?;
        Ok(parsed
            .data
            .into_iter()
            .map(|r| (r.index, r.relevance_score))
            .collect())
    }
}

fn model_dimension(model: &str) -> usize {
    match model {
        "voyage-code-2" => 1536,
        "voyage-3-lite" => 512,
        "voyage-3-large" => 1024,
        // voyage-code-3, voyage-3, and future defaults
        _ => 1024,
    }
}
