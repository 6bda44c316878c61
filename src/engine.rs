//! Service wiring
//!
//! Builds every service from one configuration around a shared embedding
//! gateway, vector store, mail store and prototype cache.

use crate::classifier::TieredClassifier;
use crate::config::ImpMailConfig;
use crate::digest::DigestEngine;
use crate::embeddings::{build_gateway, EmbeddingGateway};
use crate::error::Result;
use crate::expectations::ExpectationService;
use crate::indexing::EmailIndexer;
use crate::preferences::PreferenceService;
use crate::prototype::{PrototypeBuilder, PrototypeCache};
use crate::ranking::SimilarityRanker;
use crate::services::{build_llm_classifier, LlmClassifier};
use crate::storage::{build_vector_store, MailStore, VectorStore};
use crate::sweep::ClassificationSweep;
use std::sync::Arc;
use tracing::debug;

pub struct ImpMail {
    pub config: ImpMailConfig,
    pub gateway: Arc<dyn EmbeddingGateway>,
    pub vectors: Arc<dyn VectorStore>,
    pub mail: Arc<dyn MailStore>,
    pub classifier: Arc<TieredClassifier>,
    pub ranker: SimilarityRanker,
    pub digest: DigestEngine,
    pub preferences: PreferenceService,
    pub expectations: ExpectationService,
    pub indexer: EmailIndexer,
    pub sweep: Arc<ClassificationSweep>,
}

impl ImpMail {
    /// Build the gateway, vector store and LLM classifier from configuration
    pub async fn from_config(config: ImpMailConfig, mail: Arc<dyn MailStore>) -> Result<Self> {
        let gateway = build_gateway(&config.embedding).await?;
        let vectors = build_vector_store(&config.vector_store, gateway.dimensions()).await?;
        let llm = build_llm_classifier(&config.llm);
        Ok(Self::with_parts(config, gateway, vectors, mail, llm))
    }

    /// Wire services around explicitly supplied backends
    pub fn with_parts(
        config: ImpMailConfig,
        gateway: Arc<dyn EmbeddingGateway>,
        vectors: Arc<dyn VectorStore>,
        mail: Arc<dyn MailStore>,
        llm: Arc<dyn LlmClassifier>,
    ) -> Self {
        debug!(
            "Wiring services with embedding model {} ({} dims)",
            gateway.model_name(),
            gateway.dimensions()
        );

        let cache = Arc::new(PrototypeCache::new(config.cache.prototype_capacity));
        let prototypes = PrototypeBuilder::new(Arc::clone(&gateway), cache);

        let classifier = Arc::new(TieredClassifier::new(
            config.classifier.clone(),
            prototypes.clone(),
            Arc::clone(&vectors),
            Arc::clone(&mail),
            llm,
        ));
        let sweep = Arc::new(ClassificationSweep::new(
            config.sweep.clone(),
            Arc::clone(&classifier),
            Arc::clone(&mail),
        ));

        Self {
            ranker: SimilarityRanker::new(
                config.ranking.clone(),
                prototypes.clone(),
                Arc::clone(&vectors),
                Arc::clone(&mail),
            ),
            digest: DigestEngine::new(
                config.digest.clone(),
                prototypes.clone(),
                Arc::clone(&vectors),
                Arc::clone(&mail),
            ),
            preferences: PreferenceService::new(
                config.preferences.clone(),
                Arc::clone(&vectors),
                Arc::clone(&mail),
            ),
            expectations: ExpectationService::new(Arc::clone(&mail), prototypes),
            indexer: EmailIndexer::new(Arc::clone(&gateway), Arc::clone(&vectors), Arc::clone(&mail)),
            classifier,
            sweep,
            config,
            gateway,
            vectors,
            mail,
        }
    }
}
