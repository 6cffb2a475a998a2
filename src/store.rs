//! Qdrant vector store client.
//!
//! A thin abstraction over the Qdrant HTTP API covering exactly what the
//! indexer and searcher need: collection lifecycle, batched upsert, hybrid
//! and dense queries, payload-filtered scroll, and bulk delete.
//!
//! Collections hold two named vectors per point: `dense` (cosine, HNSW
//! m=16 / ef_construct=100) and `bm25` (sparse, IDF modifier). The BM25
//! side is computed server-side from the document text shipped with each
//! point, which is why upserts are sub-batched small.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;

/// Sub-batch size for upserts. The BM25 entry repeats the full chunk text
/// as model input, so requests grow quickly.
const UPSERT_SUB_BATCH: usize = 32;

/// Collections stay unindexed (brute-force) below this point count.
const INDEXING_THRESHOLD: u64 = 10_000;

const UPSERT_ATTEMPTS: u32 = 3;
const UPSERT_BACKOFF: Duration = Duration::from_secs(1);

const SERVICE: &str = "qdrant";

/// Stable point ID for a chunk: a name-based UUID over the chunk's string
/// identifier, so re-ingesting the same chunk overwrites instead of
/// duplicating.
pub fn point_id(chunk_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes())
}

/// One point ready for upsert: dense vector, BM25 source text, payload.
#[derive(Debug, Clone)]
pub struct ChunkPoint {
    /// The chunk's string identifier (`{doc_id}_chunk{N}`).
    pub chunk_id: String,
    pub dense: Vec<f32>,
    /// Full chunk text, shipped as BM25 model input.
    pub text: String,
    pub payload: Value,
}

/// A scored query hit with its payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoredPoint {
    pub score: f32,
    #[serde(default)]
    pub payload: Value,
}

/// A scrolled point (no similarity score).
#[derive(Debug, Clone, Deserialize)]
pub struct PayloadPoint {
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionInfo {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub points_count: u64,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct ExistsResult {
    exists: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    points: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    points: Vec<PayloadPoint>,
}

/// Shared Qdrant client. Cloneable `reqwest::Client` underneath; safe for
/// concurrent use across products and sessions.
pub struct VectorStore {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl VectorStore {
    pub fn new(url: &str, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = builder.send().await.map_err(|source| ApiError::Network {
            service: SERVICE,
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                service: SERVICE,
                status: status.as_u16(),
                message,
            });
        }

        response.json().await.map_err(|e| ApiError::Malformed {
            service: SERVICE,
            message: e.to_string(),
        })
    }

    /// Creates a collection with the named `dense` + `bm25` vector layout.
    pub async fn create_collection(&self, name: &str, dim: usize) -> Result<(), ApiError> {
        let body = json!({
            "vectors": {
                "dense": {
                    "size": dim,
                    "distance": "Cosine",
                    "hnsw_config": { "m": 16, "ef_construct": 100 },
                },
            },
            "sparse_vectors": {
                "bm25": { "modifier": "idf" },
            },
            "optimizers_config": { "indexing_threshold": INDEXING_THRESHOLD },
        });
        let _: Envelope<Value> = self
            .send(
                self.request(reqwest::Method::PUT, &format!("/collections/{name}"))
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    pub async fn collection_exists(&self, name: &str) -> Result<bool, ApiError> {
        let env: Envelope<ExistsResult> = self
            .send(self.request(reqwest::Method::GET, &format!("/collections/{name}/exists")))
            .await?;
        Ok(env.result.exists)
    }

    pub async fn delete_collection(&self, name: &str) -> Result<(), ApiError> {
        let _: Envelope<Value> = self
            .send(self.request(reqwest::Method::DELETE, &format!("/collections/{name}")))
            .await?;
        Ok(())
    }

    pub async fn collection_info(&self, name: &str) -> Result<CollectionInfo, ApiError> {
        let env: Envelope<CollectionInfo> = self
            .send(self.request(reqwest::Method::GET, &format!("/collections/{name}")))
            .await?;
        Ok(env.result)
    }

    /// Upserts points in sub-batches, waiting for server acknowledgement.
    /// Transient failures are retried up to 3 times with a 1 s pause.
    pub async fn upsert(&self, name: &str, points: &[ChunkPoint]) -> Result<(), ApiError> {
        for sub in points.chunks(UPSERT_SUB_BATCH) {
            let body = json!({
                "points": sub.iter().map(point_body).collect::<Vec<_>>(),
            });

            let mut last_err: Option<ApiError> = None;
            let mut done = false;
            for attempt in 1..=UPSERT_ATTEMPTS {
                if attempt > 1 {
                    tokio::time::sleep(UPSERT_BACKOFF).await;
                }
                let result: Result<Envelope<Value>, ApiError> = self
                    .send(
                        self.request(
                            reqwest::Method::PUT,
                            &format!("/collections/{name}/points?wait=true"),
                        )
                        .json(&body),
                    )
                    .await;
                match result {
                    Ok(_) => {
                        done = true;
                        break;
                    }
                    Err(e) if e.is_retryable() => {
                        tracing::warn!(attempt, error = %e, "upsert attempt failed, retrying");
                        last_err = Some(e);
                    }
                    Err(e) => return Err(e),
                }
            }
            if !done {
                return Err(last_err.unwrap_or(ApiError::Malformed {
                    service: SERVICE,
                    message: "upsert failed with no recorded error".to_string(),
                }));
            }
        }
        Ok(())
    }

    /// Server-side hybrid query: dense and BM25 prefetch independently,
    /// fused with reciprocal-rank fusion.
    pub async fn query_hybrid(
        &self,
        name: &str,
        dense: &[f32],
        query_text: &str,
        limit: usize,
        rrf_k: u32,
    ) -> Result<Vec<ScoredPoint>, ApiError> {
        let body = json!({
            "prefetch": [
                { "query": dense, "using": "dense", "limit": limit },
                {
                    "query": { "text": query_text, "model": "qdrant/bm25" },
                    "using": "bm25",
                    "limit": limit,
                },
            ],
            "query": { "fusion": "rrf", "k": rrf_k },
            "limit": limit,
            "with_payload": true,
        });
        let env: Envelope<QueryResult> = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{name}/points/query"),
                )
                .json(&body),
            )
            .await?;
        Ok(env.result.points)
    }

    /// Pure dense cosine query with an optional minimum-score filter.
    pub async fn query_dense(
        &self,
        name: &str,
        dense: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, ApiError> {
        let mut body = json!({
            "query": dense,
            "using": "dense",
            "limit": limit,
            "with_payload": true,
        });
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = json!(threshold);
        }
        let env: Envelope<QueryResult> = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{name}/points/query"),
                )
                .json(&body),
            )
            .await?;
        Ok(env.result.points)
    }

    /// Enumerates points matching a payload filter, without scoring.
    pub async fn scroll(
        &self,
        name: &str,
        filter: Value,
        limit: usize,
    ) -> Result<Vec<PayloadPoint>, ApiError> {
        let body = json!({
            "filter": filter,
            "limit": limit,
            "with_payload": true,
        });
        let env: Envelope<ScrollResult> = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{name}/points/scroll"),
                )
                .json(&body),
            )
            .await?;
        Ok(env.result.points)
    }

    /// Bulk delete by chunk string identifier.
    pub async fn delete_points(&self, name: &str, chunk_ids: &[String]) -> Result<(), ApiError> {
        let ids: Vec<String> = chunk_ids
            .iter()
            .map(|id| point_id(id).to_string())
            .collect();
        let _: Envelope<Value> = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{name}/points/delete?wait=true"),
                )
                .json(&json!({ "points": ids })),
            )
            .await?;
        Ok(())
    }
}

/// Equality filter on a payload field, the only filter shape the service
/// uses (`doc_id == X` for document reassembly).
pub fn payload_match(key: &str, value: &str) -> Value {
    json!({
        "must": [
            { "key": key, "match": { "value": value } },
        ],
    })
}

fn point_body(point: &ChunkPoint) -> Value {
    json!({
        "id": point_id(&point.chunk_id).to_string(),
        "vector": {
            "dense": point.dense,
            "bm25": { "text": point.text, "model": "qdrant/bm25" },
        },
        "payload": point.payload,
    })
}
