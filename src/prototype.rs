//! Prototype vectors for expectations
//!
//! A prototype is the embedding of a user's stated importance criteria. The
//! cache is keyed on the full source content rather than an id, so editing an
//! expectation can never serve a stale vector. The cache is an injected object
//! owned by whoever wires the components together.

use crate::embeddings::EmbeddingGateway;
use crate::error::Result;
use crate::types::{Expectation, ExpectationExamples};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Deterministic text embedded for an expectation
///
/// Title, description, important examples, then not-important examples, one
/// per line; blank parts are skipped.
pub fn build_prototype_text(expectation: &Expectation) -> String {
    let examples = &expectation.examples;
    std::iter::once(expectation.title.as_str())
        .chain(std::iter::once(expectation.description.as_str()))
        .chain(examples.important.iter().map(String::as_str))
        .chain(examples.not_important.iter().map(String::as_str))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PrototypeKey {
    model: String,
    title: String,
    description: String,
    examples: ExpectationExamples,
}

impl PrototypeKey {
    fn new(model: &str, expectation: &Expectation) -> Self {
        Self {
            model: model.to_string(),
            title: expectation.title.clone(),
            description: expectation.description.clone(),
            examples: expectation.examples.clone(),
        }
    }
}

/// Content-keyed LRU cache of prototype vectors
#[derive(Debug)]
pub struct PrototypeCache {
    inner: Mutex<LruCache<PrototypeKey, Arc<Vec<f32>>>>,
}

impl PrototypeCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn get(&self, key: &PrototypeKey) -> Option<Arc<Vec<f32>>> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn put(&self, key: PrototypeKey, vector: Arc<Vec<f32>>) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(key, vector);
    }

    /// Drop every cached prototype
    pub fn invalidate(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PrototypeCache {
    fn default() -> Self {
        Self::new(128)
    }
}

/// Builds (and caches) prototype vectors through the embedding gateway
#[derive(Clone)]
pub struct PrototypeBuilder {
    gateway: Arc<dyn EmbeddingGateway>,
    cache: Arc<PrototypeCache>,
}

impl PrototypeBuilder {
    pub fn new(gateway: Arc<dyn EmbeddingGateway>, cache: Arc<PrototypeCache>) -> Self {
        Self { gateway, cache }
    }

    /// Prototype vector for an expectation; embeds only on a cache miss
    pub async fn get_prototype(&self, expectation: &Expectation) -> Result<Arc<Vec<f32>>> {
        let key = PrototypeKey::new(self.gateway.model_name(), expectation);
        if let Some(vector) = self.cache.get(&key) {
            debug!("Prototype cache hit for expectation {}", expectation.id);
            return Ok(vector);
        }

        debug!("Prototype cache miss for expectation {}", expectation.id);
        let vector = Arc::new(
            self.gateway
                .embed(&build_prototype_text(expectation))
                .await?,
        );
        self.cache.put(key, Arc::clone(&vector));
        Ok(vector)
    }

    /// Drop cached prototypes after an expectation changed
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    pub fn gateway(&self) -> &Arc<dyn EmbeddingGateway> {
        &self.gateway
    }
}
