/// Embedding provider boundary
///
/// Defines the [`TextEmbedder`] trait consumed by the vector index and
/// search services, plus the always-available [`HashingEmbedder`] backend
/// and the f32 blob codecs shared with the storage layer.
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use lru::LruCache;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use twox_hash::XxHash64;

/// Default vector dimension for the offline hashing backend
pub const DEFAULT_DIMENSION: usize = 384;

/// A source of fixed-length embedding vectors.
///
/// Document and query embeddings are separate methods because asymmetric
/// retrieval models prefix them differently; symmetric backends simply
/// route both through the same path. Implementations must return an
/// error on failure - never a silent zero vector.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Embed text for storage/indexing.
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed text for querying. May differ from [`embed_document`] for
    /// asymmetric query/document models.
    ///
    /// [`embed_document`]: TextEmbedder::embed_document
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed raw bytes (e.g. image data) into the same vector space.
    async fn embed_bytes(&self, bytes: &[u8]) -> Result<Vec<f32>>;

    /// Output vector dimension; constant for the lifetime of the backend.
    fn dimension(&self) -> usize;
}

/// Convert an f32 vector to a little-endian byte blob for BLOB columns.
pub fn to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Convert a little-endian byte blob back to an f32 vector.
///
/// Fails if the blob length is not a multiple of 4 bytes.
pub fn from_blob(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(EmbedError::InferenceError(format!(
            "Vector blob length {} is not a multiple of 4",
            blob.len()
        )));
    }

    let mut vector = Vec::with_capacity(blob.len() / 4);
    for chunk in blob.chunks_exact(4) {
        let bytes = [chunk[0], chunk[1], chunk[2], chunk[3]];
        vector.push(f32::from_le_bytes(bytes));
    }
    Ok(vector)
}

/// Deterministic feature-hashing embedder.
///
/// Tokenizes on non-alphanumeric boundaries, lowercases, and hashes each
/// token into a bucket of a fixed-dimension vector, which is then
/// L2-normalized. Same input and dimension always produce the identical
/// vector, which is what the idempotent re-index tests rely on. Shared
/// tokens between two texts produce cosine similarity > 0; disjoint
/// vocabulary scores at or near zero.
///
/// This is a symmetric model: document and query embeddings are computed
/// identically.
pub struct HashingEmbedder {
    dimension: usize,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl HashingEmbedder {
    /// Create a hashing embedder with the given output dimension.
    pub fn new(dimension: usize) -> Self {
        Self::with_cache_capacity(dimension, 10000)
    }

    /// Create a hashing embedder with an explicit cache capacity.
    pub fn with_cache_capacity(dimension: usize, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            dimension: dimension.max(1),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn cached(&self, key: &str) -> Option<Vec<f32>> {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.get(key).cloned()
    }

    fn store(&self, key: String, vector: Vec<f32>) {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.put(key, vector);
    }

    fn hash_token(token: &str) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        token.hash(&mut hasher);
        hasher.finish()
    }

    fn embed_tokens<I>(&self, tokens: I) -> Vec<f32>
    where
        I: Iterator<Item = String>,
    {
        let mut vector = vec![0f32; self.dimension];
        for token in tokens {
            let hashed = Self::hash_token(&token);
            let bucket = (hashed as usize) % self.dimension;
            // Sign bit from the upper hash half spreads tokens across
            // both directions, reducing accidental collisions' impact.
            let sign = if (hashed >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase());
        self.embed_tokens(tokens)
    }
}

#[async_trait]
impl TextEmbedder for HashingEmbedder {
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        let key = format!("doc:{}", text);
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }
        let vector = self.embed_text(text);
        self.store(key, vector.clone());
        Ok(vector)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        // Symmetric model: queries share the document path (and cache).
        self.embed_document(text).await
    }

    async fn embed_bytes(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        // Byte trigrams hashed into the same space.
        let tokens = bytes
            .windows(3)
            .map(|w| format!("{:02x}{:02x}{:02x}", w[0], w[1], w[2]));
        Ok(self.embed_tokens(tokens))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
