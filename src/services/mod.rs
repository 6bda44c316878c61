//! External judgment services

pub mod llm;

pub use llm::{AnthropicClassifier, DisabledLlmClassifier, LlmClassifier};

use crate::config::LlmConfig;
use std::sync::Arc;
use tracing::warn;

/// Construct the LLM classifier for this configuration
///
/// Falls back to a disabled classifier when the tier is switched off or no API
/// key is set, so the keyword tier takes over instead of failing.
pub fn build_llm_classifier(config: &LlmConfig) -> Arc<dyn LlmClassifier> {
    if !config.enabled {
        return Arc::new(DisabledLlmClassifier);
    }
    match AnthropicClassifier::new(config.clone()) {
        Ok(classifier) => Arc::new(classifier),
        Err(e) => {
            warn!("LLM classifier unavailable, keyword fallback only: {}", e);
            Arc::new(DisabledLlmClassifier)
        }
    }
}
