//! Resumable batch indexing.
//!
//! Orchestrates the offline half of the pipeline: embed each batch of
//! chunks, upsert the points, persist a checkpoint naming the last
//! acknowledged chunk. Batches run strictly in order, never in parallel,
//! so a crash leaves the checkpoint pointing at an exact resume position:
//! every not-yet-acknowledged chunk is processed exactly once on the next
//! run, and nothing acknowledged is repeated.
//!
//! Point IDs are a pure function of the chunk ID, so re-running a finished
//! ingestion overwrites points instead of duplicating them.

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunker::Chunk;
use crate::embedder::Embedder;
use crate::error::IngestionError;
use crate::store::{ChunkPoint, VectorStore};

/// Progress marker persisted after every acknowledged batch and removed on
/// clean completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_processed_chunk_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of one indexing run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Chunks skipped because a checkpoint marked them acknowledged.
    pub skipped: usize,
    pub duration_ms: u64,
}

pub struct Indexer<'a> {
    embedder: &'a Embedder,
    store: &'a VectorStore,
    collection: String,
    batch_size: usize,
    checkpoint_path: PathBuf,
}

impl<'a> Indexer<'a> {
    pub fn new(
        embedder: &'a Embedder,
        store: &'a VectorStore,
        collection: impl Into<String>,
        batch_size: usize,
        checkpoint_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            embedder,
            store,
            collection: collection.into(),
            batch_size: batch_size.max(1),
            checkpoint_path: checkpoint_path.into(),
        }
    }

    /// Ensures the collection exists with the embedder's dimension.
    /// With `force`, an existing collection is dropped first.
    pub async fn init_collection(&self, force: bool) -> Result<(), IngestionError> {
        let exists = self
            .store
            .collection_exists(&self.collection)
            .await
            .map_err(IngestionError::Collection)?;

        if exists && force {
            tracing::info!(collection = %self.collection, "dropping existing collection");
            self.store
                .delete_collection(&self.collection)
                .await
                .map_err(IngestionError::Collection)?;
        } else if exists {
            tracing::info!(collection = %self.collection, "collection exists");
            return Ok(());
        }

        tracing::info!(
            collection = %self.collection,
            dim = self.embedder.dimension(),
            "creating collection"
        );
        self.store
            .create_collection(&self.collection, self.embedder.dimension())
            .await
            .map_err(IngestionError::Collection)
    }

    /// Runs the embed+upsert loop over `chunks`, resuming past any
    /// checkpointed position. Any batch failure aborts and propagates; the
    /// checkpoint stays on disk so the next run resumes.
    pub async fn run(&self, chunks: &[Chunk]) -> Result<IndexReport, IngestionError> {
        let started = Instant::now();

        let resume_from = match self.load_checkpoint()? {
            Some(checkpoint) => {
                let position = chunks
                    .iter()
                    .position(|c| c.id == checkpoint.last_processed_chunk_id)
                    .map(|i| i + 1)
                    .unwrap_or(0);
                tracing::info!(
                    last = %checkpoint.last_processed_chunk_id,
                    resume_from = position,
                    "resuming from checkpoint"
                );
                position
            }
            None => 0,
        };

        let mut succeeded = 0usize;
        let pending = &chunks[resume_from.min(chunks.len())..];
        let total_batches = pending.len().div_ceil(self.batch_size);

        for (batch_no, batch) in pending.chunks(self.batch_size).enumerate() {
            let global_batch = batch_no + resume_from / self.batch_size;
            tracing::info!(
                batch = batch_no + 1,
                total_batches,
                chunks = batch.len(),
                "indexing batch"
            );

            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self
                .embedder
                .embed_documents(&texts)
                .await
                .map_err(|source| IngestionError::Embed {
                    batch: global_batch,
                    source,
                })?;

            let points: Vec<ChunkPoint> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, dense)| ChunkPoint {
                    chunk_id: chunk.id.clone(),
                    dense,
                    text: chunk.content.clone(),
                    payload: serde_json::json!({
                        "chunk_id": chunk.id,
                        "doc_id": chunk.doc_id,
                        "chunk_index": chunk.chunk_index,
                        "content": chunk.content,
                        "metadata": chunk.meta,
                    }),
                })
                .collect();

            self.store
                .upsert(&self.collection, &points)
                .await
                .map_err(|source| IngestionError::Upsert {
                    batch: global_batch,
                    source,
                })?;

            succeeded += batch.len();
            // The batch is fully acknowledged; move the resume marker.
            self.write_checkpoint(&batch[batch.len() - 1].id)?;
        }

        self.delete_checkpoint()?;

        let report = IndexReport {
            total: chunks.len(),
            succeeded,
            failed: 0,
            skipped: resume_from,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            total = report.total,
            succeeded = report.succeeded,
            skipped = report.skipped,
            duration_ms = report.duration_ms,
            "indexing complete"
        );
        Ok(report)
    }

    fn load_checkpoint(&self) -> Result<Option<Checkpoint>, IngestionError> {
        if !self.checkpoint_path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.checkpoint_path).map_err(|source| {
            IngestionError::Checkpoint {
                path: self.checkpoint_path.clone(),
                source,
            }
        })?;
        match serde_json::from_str(&raw) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                tracing::warn!(
                    path = %self.checkpoint_path.display(),
                    error = %e,
                    "ignoring unreadable checkpoint"
                );
                Ok(None)
            }
        }
    }

    fn write_checkpoint(&self, last_chunk_id: &str) -> Result<(), IngestionError> {
        let checkpoint = Checkpoint {
            last_processed_chunk_id: last_chunk_id.to_string(),
            timestamp: Utc::now(),
        };
        if let Some(parent) = self.checkpoint_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| IngestionError::Checkpoint {
                path: self.checkpoint_path.clone(),
                source,
            })?;
        }
        let body = serde_json::to_string_pretty(&checkpoint).expect("checkpoint serializes");
        std::fs::write(&self.checkpoint_path, body).map_err(|source| {
            IngestionError::Checkpoint {
                path: self.checkpoint_path.clone(),
                source,
            }
        })
    }

    fn delete_checkpoint(&self) -> Result<(), IngestionError> {
        if self.checkpoint_path.exists() {
            std::fs::remove_file(&self.checkpoint_path).map_err(|source| {
                IngestionError::Checkpoint {
                    path: self.checkpoint_path.clone(),
                    source,
                }
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_round_trips_through_json() {
        let checkpoint = Checkpoint {
            last_processed_chunk_id: "apis_Workbook_chunk7".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&checkpoint).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back.last_processed_chunk_id, "apis_Workbook_chunk7");
    }

    #[test]
    fn resume_position_is_after_the_checkpointed_chunk() {
        // Mirrors the arithmetic in `run`: position(last) + 1.
        let ids = ["d_chunk0", "d_chunk1", "d_chunk2", "d_chunk3"];
        let last = "d_chunk1";
        let resume = ids.iter().position(|id| *id == last).map(|i| i + 1).unwrap();
        assert_eq!(resume, 2);
        assert_eq!(&ids[resume..], &["d_chunk2", "d_chunk3"]);
    }

    #[test]
    fn unknown_checkpoint_id_restarts_from_zero() {
        let ids = ["d_chunk0", "d_chunk1"];
        let resume = ids
            .iter()
            .position(|id| *id == "stale_chunk9")
            .map(|i| i + 1)
            .unwrap_or(0);
        assert_eq!(resume, 0);
    }
}
