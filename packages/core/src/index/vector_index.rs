//! Chunk Vector Index
//!
//! Append-only store of (vector, owning-entity-reference, metadata,
//! document) rows with brute-force cosine similarity queries. The index
//! has no business knowledge of entities - the entity id column and the
//! metadata bag are opaque back-references supplied by callers.
//!
//! # Semantics
//!
//! - `add`/`add_text` append; there is no update-in-place. An entity edit
//!   is realized by the caller as delete-all-for-entity followed by
//!   re-chunk-and-insert.
//! - Queries return up to `top_k` rows ordered by descending similarity,
//!   with ties broken by insertion order (earliest row id first) for
//!   determinism.
//! - Deletion takes a predicate over the metadata bag; a predicate that
//!   matches nothing is a no-op, not an error.

use crate::db::{DatabaseError, DatabaseService};
use mercato_embed_engine::{from_blob, to_blob, EmbedError, TextEmbedder};
use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;

/// Vector index errors
#[derive(Error, Debug)]
pub enum IndexError {
    /// Vector length does not match the index dimensionality
    #[error("Vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector contains NaN or infinite components
    #[error("Vector contains non-finite components")]
    NonFiniteVector,

    /// Underlying database failure
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    /// Embedding backend failure (retryable when `Unavailable`)
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    /// Row decoding failure
    #[error("Query failed: {0}")]
    QueryFailed(String),
}

/// One chunk-level query hit.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    /// Row id; doubles as the insertion-order tie-break
    pub record_id: i64,
    /// Owning entity back-reference
    pub entity_id: String,
    /// Source chunk text
    pub document: String,
    /// Open metadata bag (carries at least the entity id)
    pub metadata: serde_json::Value,
    /// Cosine similarity to the query, in [-1, 1]
    pub similarity: f32,
}

/// Append-only chunk vector index over the `chunk_vectors` table.
pub struct VectorIndex {
    db: Arc<DatabaseService>,
    embedder: Arc<dyn TextEmbedder>,
    dimension: usize,
}

impl VectorIndex {
    /// Create an index bound to a database and an embedding backend.
    /// The index dimensionality is fixed to the backend's.
    pub fn new(db: Arc<DatabaseService>, embedder: Arc<dyn TextEmbedder>) -> Self {
        let dimension = embedder.dimension();
        Self {
            db,
            embedder,
            dimension,
        }
    }

    /// Index dimensionality.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The embedding backend this index was built with. Callers that
    /// pre-embed chunks (to keep delete-then-reinsert atomic) must use
    /// the same backend the index queries with.
    pub fn embedder(&self) -> &Arc<dyn TextEmbedder> {
        &self.embedder
    }

    /// Append one record with a precomputed vector. Makes no embedding
    /// calls.
    pub async fn add(
        &self,
        vector: &[f32],
        metadata: serde_json::Value,
        document: &str,
    ) -> Result<i64, IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::NonFiniteVector);
        }

        let entity_id = metadata
            .get("entity_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let conn = self.db.connect_with_timeout().await?;
        conn.execute(
            "INSERT INTO chunk_vectors (entity_id, vector, document, metadata)
             VALUES (?, ?, ?, ?)",
            (
                entity_id,
                to_blob(vector),
                document,
                metadata.to_string(),
            ),
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to insert vector: {}", e)))?;

        let record_id = conn.last_insert_rowid();
        Ok(record_id)
    }

    /// Embed `text` once via the configured backend, then append.
    pub async fn add_text(
        &self,
        text: &str,
        metadata: serde_json::Value,
    ) -> Result<i64, IndexError> {
        let vector = self.embedder.embed_document(text).await?;
        self.add(&vector, metadata, text).await
    }

    /// Query by free text: embeds the query, then delegates to
    /// [`query_vector`].
    ///
    /// [`query_vector`]: VectorIndex::query_vector
    pub async fn query_text(&self, query: &str, top_k: usize) -> Result<Vec<ChunkHit>, IndexError> {
        let vector = self.embedder.embed_query(query).await?;
        self.query_vector(&vector, top_k).await
    }

    /// Query by vector: full scan with cosine similarity computed in
    /// process, descending order, insertion-order tie-break.
    pub async fn query_vector(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ChunkHit>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT id, entity_id, vector, document, metadata
                 FROM chunk_vectors ORDER BY id ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to scan vectors: {}", e)))?;

        let mut hits = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| IndexError::QueryFailed(format!("Row fetch failed: {}", e)))?
        {
            let record_id: i64 = row
                .get(0)
                .map_err(|e| IndexError::QueryFailed(format!("Failed to get id: {}", e)))?;
            let entity_id: String = row
                .get(1)
                .map_err(|e| IndexError::QueryFailed(format!("Failed to get entity_id: {}", e)))?;
            let blob: Vec<u8> = row
                .get(2)
                .map_err(|e| IndexError::QueryFailed(format!("Failed to get vector: {}", e)))?;
            let document: String = row
                .get(3)
                .map_err(|e| IndexError::QueryFailed(format!("Failed to get document: {}", e)))?;
            let metadata_raw: String = row
                .get(4)
                .map_err(|e| IndexError::QueryFailed(format!("Failed to get metadata: {}", e)))?;

            let candidate = from_blob(&blob)?;
            let Some(similarity) = cosine_similarity(query, &candidate) else {
                // Dimension drift or zero-norm row; skip rather than
                // poisoning the whole query.
                tracing::warn!(record_id, "Skipping unscorable vector record");
                continue;
            };

            let metadata: serde_json::Value =
                serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null);

            hits.push(ChunkHit {
                record_id,
                entity_id,
                document,
                metadata,
                similarity,
            });
        }

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then(a.record_id.cmp(&b.record_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Delete every record whose metadata matches the predicate.
    /// Matching zero records is a successful no-op.
    pub async fn delete_where<F>(&self, predicate: F) -> Result<u64, IndexError>
    where
        F: Fn(&serde_json::Value) -> bool,
    {
        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query("SELECT id, metadata FROM chunk_vectors", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to scan metadata: {}", e)))?;

        let mut matched = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| IndexError::QueryFailed(format!("Row fetch failed: {}", e)))?
        {
            let id: i64 = row
                .get(0)
                .map_err(|e| IndexError::QueryFailed(format!("Failed to get id: {}", e)))?;
            let metadata_raw: String = row
                .get(1)
                .map_err(|e| IndexError::QueryFailed(format!("Failed to get metadata: {}", e)))?;
            let metadata: serde_json::Value =
                serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null);
            if predicate(&metadata) {
                matched.push(id);
            }
        }

        if matched.is_empty() {
            return Ok(0);
        }

        // Row ids come straight from the table; safe to inline.
        let id_list = matched
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let deleted = conn
            .execute(
                &format!("DELETE FROM chunk_vectors WHERE id IN ({})", id_list),
                (),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to delete vectors: {}", e)))?;

        Ok(deleted)
    }

    /// Fast-path deletion of every record owned by one entity.
    pub async fn delete_for_entity(&self, entity_id: &str) -> Result<u64, IndexError> {
        let conn = self.db.connect_with_timeout().await?;
        let deleted = conn
            .execute("DELETE FROM chunk_vectors WHERE entity_id = ?", [entity_id])
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to delete entity vectors: {}", e))
            })?;
        Ok(deleted)
    }

    /// Total number of indexed records.
    pub async fn len(&self) -> Result<u64, IndexError> {
        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM chunk_vectors", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to count vectors: {}", e)))?;

        let row = rows
            .next()
            .await
            .map_err(|e| IndexError::QueryFailed(format!("Row fetch failed: {}", e)))?
            .ok_or_else(|| IndexError::QueryFailed("COUNT returned no row".to_string()))?;
        let count: i64 = row
            .get(0)
            .map_err(|e| IndexError::QueryFailed(format!("Failed to get count: {}", e)))?;
        Ok(count as u64)
    }

    /// Whether the index holds no records.
    pub async fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len().await? == 0)
    }
}

/// Cosine similarity with f64 accumulation.
///
/// Returns `None` when the lengths differ or either vector has zero
/// norm - callers skip such records instead of ranking on NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(x);
        let y64 = f64::from(y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some((dot / denom) as f32)
}
