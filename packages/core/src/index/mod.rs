//! Semantic Index Layer
//!
//! Text chunking and the chunk-level vector index. This layer knows
//! nothing about commerce semantics; it stores vectors tagged with an
//! opaque owning-entity reference and answers similarity queries.

mod chunker;
mod vector_index;

pub use chunker::{TextChunker, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
pub use vector_index::{cosine_similarity, ChunkHit, IndexError, VectorIndex};
