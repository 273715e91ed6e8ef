/// Configuration for embedding backends
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Maximum supported sequence length for transformer backends.
/// Limited by attention matrix memory requirements (O(n²)).
const MAX_SUPPORTED_SEQUENCE_LENGTH: usize = 8192;

/// Configuration shared by all embedding backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Model name or identifier (used to resolve the local model directory)
    pub model_name: String,

    /// Explicit local model path; overrides the resolved default when set
    pub model_path: Option<PathBuf>,

    /// Output vector dimension. All backends of one index must agree.
    pub dimension: usize,

    /// Maximum sequence length for tokenization (transformer backends)
    pub max_sequence_length: usize,

    /// Maximum cache size (number of embeddings to cache)
    pub cache_capacity: usize,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model_name: "BAAI/bge-small-en-v1.5".to_string(),
            model_path: None,
            dimension: 384,
            max_sequence_length: 512,
            cache_capacity: 10000,
        }
    }
}

impl EmbedConfig {
    /// Get the model path, resolving it from ~/.mercato/models/
    ///
    /// Keeps model files next to the database directory so version
    /// updates never require an app reinstall:
    /// - macOS/Linux: ~/.mercato/models/<model>/
    /// - Windows: %USERPROFILE%\.mercato\models\<model>\
    pub fn resolve_model_path(&self) -> Result<PathBuf, std::io::Error> {
        if let Some(path) = &self.model_path {
            if path.exists() {
                return Ok(path.clone());
            }
        }

        let home_dir = dirs::home_dir().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Cannot determine home directory",
            )
        })?;

        let model_path = home_dir
            .join(".mercato")
            .join("models")
            .join(sanitize_model_name(&self.model_name));

        if model_path.exists() {
            Ok(model_path)
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!(
                    "Model not found at {:?}. Please install model to ~/.mercato/models/",
                    model_path
                ),
            ))
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.model_name.is_empty() {
            return Err("model_name cannot be empty".to_string());
        }

        if self.dimension == 0 {
            return Err("dimension must be greater than 0".to_string());
        }

        if self.max_sequence_length == 0 {
            return Err("max_sequence_length must be greater than 0".to_string());
        }

        if self.max_sequence_length > MAX_SUPPORTED_SEQUENCE_LENGTH {
            return Err(format!(
                "max_sequence_length cannot exceed {} (transformer attention matrix memory limit)",
                MAX_SUPPORTED_SEQUENCE_LENGTH
            ));
        }

        if self.cache_capacity == 0 {
            return Err("cache_capacity must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Sanitize model name to be filesystem-safe
fn sanitize_model_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '<' | '>' | '|' | '"' => '-',
            _ => c,
        })
        .collect()
}
