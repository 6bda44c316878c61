//! Local embedding service using fastembed
//!
//! Models are downloaded on first use to the configured cache directory.

use crate::config::EmbeddingConfig;
use crate::embeddings::{validate_embedding, EmbeddingGateway};
use crate::error::{ImpMailError, Result};
use crate::utils::string::truncate_chars;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};
use tokio::task;
use tracing::info;

/// Local embedding gateway backed by an ONNX model
pub struct LocalEmbeddingService {
    // fastembed needs &mut for embed()
    model: Arc<Mutex<TextEmbedding>>,
    config: EmbeddingConfig,
    dimensions: usize,
}

impl LocalEmbeddingService {
    /// Load (and if needed download) the configured model
    pub async fn new(config: EmbeddingConfig) -> Result<Self> {
        let (embedding_model, dimensions) = Self::resolve_model(&config.model)?;

        info!(
            "Initializing local embedding service: model={}, cache={:?}",
            config.model, config.cache_dir
        );

        let mut init_options = InitOptions::default();
        init_options.model_name = embedding_model;
        init_options.show_download_progress = false;
        init_options.cache_dir = config.cache_dir.clone();

        let model = task::spawn_blocking(move || TextEmbedding::try_new(init_options))
            .await
            .map_err(|e| ImpMailError::Other(format!("Task join error: {}", e)))?
            .map_err(|e| ImpMailError::Embedding(format!("Failed to load model: {}", e)))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            config,
            dimensions,
        })
    }

    fn resolve_model(model_name: &str) -> Result<(EmbeddingModel, usize)> {
        match model_name {
            "all-MiniLM-L6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
            "all-MiniLM-L12-v2" => Ok((EmbeddingModel::AllMiniLML12V2, 384)),
            "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
            "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
            "nomic-embed-text-v1.5" => Ok((EmbeddingModel::NomicEmbedTextV15, 768)),
            _ => Err(ImpMailError::Config(config::ConfigError::Message(format!(
                "Unsupported local embedding model: '{}'",
                model_name
            )))),
        }
    }
}

#[async_trait]
impl EmbeddingGateway for LocalEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = truncate_chars(text, self.config.max_input_chars).to_string();
        let model = Arc::clone(&self.model);

        let mut embeddings = task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|e| format!("Mutex lock failed: {}", e))?;
            guard
                .embed(vec![text], None)
                .map_err(|e| format!("Embedding generation failed: {}", e))
        })
        .await
        .map_err(|e| ImpMailError::Other(format!("Task join error: {}", e)))?
        .map_err(ImpMailError::Embedding)?;

        let embedding = embeddings
            .pop()
            .ok_or_else(|| ImpMailError::Embedding("No embedding returned".to_string()))?;
        validate_embedding(&embedding, self.dimensions)?;
        Ok(embedding)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
