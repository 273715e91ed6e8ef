/// Local transformer model backend (feature `local-model`)
///
/// Loads a tokenizer + transformer checkpoint from a local directory and
/// produces mean-pooled, L2-normalized sentence embeddings on the CPU.
/// Uses asymmetric retrieval prefixes so document and query vectors live
/// in compatible but distinct subspaces.
///
/// The model runtime is an external collaborator: this backend only
/// exists behind the feature flag and the rest of the system never
/// depends on it directly, only on [`TextEmbedder`].
use crate::config::EmbedConfig;
use crate::embedding::TextEmbedder;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XlmRobertaConfig, XLMRobertaModel};
use std::sync::Mutex;
use tokenizers::Tokenizer;

/// Task prefixes for asymmetric retrieval models
const SEARCH_DOCUMENT_PREFIX: &str = "search_document: ";
const SEARCH_QUERY_PREFIX: &str = "search_query: ";

struct ModelState {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
}

/// Embedding backend running a local transformer checkpoint.
pub struct LocalModelEmbedder {
    config: EmbedConfig,
    /// Inference state is serialized through a Mutex; candle tensors are
    /// not shareable across concurrent forward passes.
    state: Mutex<ModelState>,
}

impl LocalModelEmbedder {
    /// Load the tokenizer and model weights from the configured model
    /// directory. Missing files surface as `ModelNotFound` so callers can
    /// treat the condition as retryable (e.g. model still downloading).
    pub fn load(config: EmbedConfig) -> Result<Self> {
        config.validate().map_err(EmbedError::ConfigError)?;

        let model_dir = config
            .resolve_model_path()
            .map_err(|e| EmbedError::ModelNotFound(e.to_string()))?;

        let device = Device::Cpu;

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            EmbedError::ModelLoadError(format!(
                "Failed to load tokenizer from {}: {}",
                tokenizer_path.display(),
                e
            ))
        })?;

        let config_path = model_dir.join("config.json");
        let model_config: XlmRobertaConfig =
            serde_json::from_str(&std::fs::read_to_string(&config_path)?)
                .map_err(|e| EmbedError::ModelLoadError(format!("Invalid model config: {}", e)))?;

        let weights_path = model_dir.join("pytorch_model.bin");
        let weights = candle_core::pickle::read_all(&weights_path)
            .map_err(|e| EmbedError::ModelLoadError(format!("Failed to read weights: {}", e)))?;
        let weights_map: std::collections::HashMap<String, Tensor> =
            weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);

        let model = XLMRobertaModel::new(&model_config, vb)
            .map_err(|e| EmbedError::ModelLoadError(format!("Failed to build model: {}", e)))?;

        tracing::info!(model = %config.model_name, "Local embedding model loaded");

        Ok(Self {
            config,
            state: Mutex::new(ModelState {
                model,
                tokenizer,
                device,
            }),
        })
    }

    fn embed_with_prefix(&self, prefix: &str, text: &str) -> Result<Vec<f32>> {
        let prefixed = format!("{}{}", prefix, text);
        let max_len = self.config.max_sequence_length;

        let state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let encoding = state
            .tokenizer
            .encode(prefixed.as_str(), true)
            .map_err(|e| EmbedError::TokenizationError(e.to_string()))?;

        let mut ids = encoding.get_ids().to_vec();
        let mut mask = encoding.get_attention_mask().to_vec();
        if ids.len() > max_len {
            ids.truncate(max_len);
            mask.truncate(max_len);
        }
        if ids.len() < max_len {
            let pad = max_len - ids.len();
            ids.extend(std::iter::repeat(1).take(pad));
            mask.extend(std::iter::repeat(0).take(pad));
        }

        let run = || -> candle_core::Result<Vec<f32>> {
            let input_ids = Tensor::from_iter(ids, &state.device)?.reshape((1, max_len))?;
            let attention_mask = Tensor::from_iter(mask, &state.device)?.reshape((1, max_len))?;
            let token_type_ids = Tensor::zeros((1, max_len), DType::I64, &state.device)?;

            let hidden = state.model.forward(
                &input_ids,
                &attention_mask,
                &token_type_ids,
                None,
                None,
                None,
            )?;

            // Mean pooling over non-padded positions, then L2 normalize.
            let hdim = hidden.dims()[2];
            let mask_f = attention_mask.to_dtype(hidden.dtype())?;
            let mask_3d = mask_f.unsqueeze(2)?;
            let mask_b = mask_3d.broadcast_as(hidden.shape())
                .unwrap_or(mask_3d.repeat((1, 1, hdim))?);
            let masked = (&hidden * &mask_b)?;
            let summed = masked.sum(1)?;
            let lengths = mask_f.sum(1)?.unsqueeze(1)?.to_dtype(summed.dtype())?;
            let mut pooled = summed.broadcast_div(&lengths)?;

            let eps = Tensor::new(&[1e-12f32], &state.device)?
                .to_dtype(pooled.dtype())?
                .unsqueeze(0)?;
            let norm = pooled.sqr()?.sum_keepdim(1)?.sqrt()?.broadcast_add(&eps)?;
            pooled = pooled.broadcast_div(&norm)?;

            pooled.squeeze(0)?.to_vec1()
        };

        let vector = run().map_err(|e| EmbedError::InferenceError(e.to_string()))?;

        if vector.len() != self.config.dimension {
            return Err(EmbedError::InferenceError(format!(
                "Model produced {} dimensions, expected {}",
                vector.len(),
                self.config.dimension
            )));
        }

        Ok(vector)
    }
}

#[async_trait]
impl TextEmbedder for LocalModelEmbedder {
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_prefix(SEARCH_DOCUMENT_PREFIX, text)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_prefix(SEARCH_QUERY_PREFIX, text)
    }

    async fn embed_bytes(&self, _bytes: &[u8]) -> Result<Vec<f32>> {
        Err(EmbedError::Unavailable(
            "Byte embedding requires a multimodal checkpoint".to_string(),
        ))
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
