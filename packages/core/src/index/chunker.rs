//! Text Chunker
//!
//! Splits long text into overlapping character windows sized for the
//! embedding backend. Deterministic: the same input and configuration
//! always produce the identical chunk sequence, which is what makes
//! re-indexing idempotent.

use crate::models::ValidationError;

/// Maximum characters per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Characters repeated between consecutive chunks - preserves context
/// across boundaries
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// Overlapping character-window chunker.
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl TextChunker {
    /// Create a chunker. `chunk_overlap` must be strictly smaller than
    /// `chunk_size` and `chunk_size` must be non-zero, otherwise the
    /// window could never advance.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ValidationError> {
        if chunk_size == 0 {
            return Err(ValidationError::invalid_config(
                "chunk_size must be greater than 0",
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(ValidationError::invalid_config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split text into overlapping windows.
    ///
    /// - empty input produces no chunks
    /// - input up to `chunk_size` characters produces exactly one chunk
    /// - no leading or trailing content is ever dropped; the final
    ///   partial window is always emitted
    ///
    /// Windows advance by `chunk_size - chunk_overlap` characters and
    /// slicing is by char, never by byte, so multi-byte input stays
    /// intact.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }
        if chars.len() <= self.chunk_size {
            return vec![text.to_string()];
        }

        let stride = self.chunk_size - self.chunk_overlap;
        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += stride;
        }
        chunks
    }
}
