/// Mercato Embed Engine - Embedding Provider Boundary
///
/// This crate is the seam between the entity store and whatever produces
/// embedding vectors. Stores and search services depend only on the
/// [`TextEmbedder`] trait; backends are interchangeable.
///
/// # Backends
///
/// - **HashingEmbedder** (always available): deterministic token feature
///   hashing into a fixed-dimension L2-normalized vector. No model files,
///   no network, identical output for identical input - the backend used
///   by the test suites and as an offline fallback.
/// - **LocalModelEmbedder** (`local-model` feature): candle + tokenizers
///   transformer backend with asymmetric document/query prefixes, loading
///   model files from a local directory.
///
/// # Example
///
/// ```
/// use mercato_embed_engine::{HashingEmbedder, TextEmbedder};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let embedder = HashingEmbedder::new(256);
///
///     let doc = embedder.embed_document("pipe repair and installation").await?;
///     let query = embedder.embed_query("pipe repair").await?;
///
///     assert_eq!(doc.len(), 256);
///     assert_eq!(query.len(), 256);
///     Ok(())
/// }
/// ```
pub mod config;
pub mod embedding;
pub mod error;

#[cfg(feature = "local-model")]
pub mod model;

// Re-export main types
pub use config::EmbedConfig;
pub use embedding::{from_blob, to_blob, HashingEmbedder, TextEmbedder, DEFAULT_DIMENSION};
pub use error::{EmbedError, Result};

#[cfg(feature = "local-model")]
pub use model::LocalModelEmbedder;
