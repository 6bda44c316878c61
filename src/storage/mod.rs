//! Storage layer for the impmail engine
//!
//! Two collaborators sit behind traits here: the vector store holding one
//! embedding per email, and the mail store holding email rows, expectations,
//! preferences, digest logs and per-user sync status.

pub mod memory;
pub mod vectors;

pub use memory::{MemoryMailStore, MemoryVectorStore};
pub use vectors::SqliteVectorStore;

use crate::config::{VectorStoreBackend, VectorStoreConfig};
use crate::error::Result;
use crate::types::{
    ClassificationResult, DigestLog, Email, Expectation, Importance, SyncStatus, UserPreferences,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stored embedding for one email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVector {
    pub id: String,
    pub vector: Vec<f32>,
}

/// One k-NN search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
}

/// Vector store adapter
///
/// Every read is scoped to a user: a vector written for one user is never
/// returned to another, even when its email id is asked for directly.
/// Ids are email ids.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace the vector for an email
    async fn upsert(
        &self,
        id: &str,
        user_id: &str,
        vector: &[f32],
        model: &str,
        metadata: serde_json::Value,
    ) -> Result<()>;

    /// Fetch the user's stored vectors for the given ids; ids that are unknown
    /// or belong to another user are skipped
    async fn get_by_ids(&self, user_id: &str, ids: &[String]) -> Result<Vec<StoredVector>>;

    /// Fetch the user's vectors, most recently written first, capped
    async fn get_all_for_user(&self, user_id: &str) -> Result<Vec<StoredVector>>;

    /// k-NN by cosine similarity within one user's vectors
    async fn search(
        &self,
        vector: &[f32],
        user_id: &str,
        k: usize,
        min_score: f32,
    ) -> Result<Vec<VectorMatch>>;

    /// Number of vectors stored for the user
    async fn count(&self, user_id: &str) -> Result<usize>;

    /// Delete one vector; returns whether it existed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Delete every vector of the user; returns how many were removed
    async fn delete_for_user(&self, user_id: &str) -> Result<usize>;
}

/// Persistence boundary for email rows and per-user state
#[async_trait]
pub trait MailStore: Send + Sync {
    async fn get_email(&self, email_id: &str) -> Result<Option<Email>>;

    /// Emails for the given ids, in the order given; unknown ids are skipped
    async fn get_emails(&self, email_ids: &[String]) -> Result<Vec<Email>>;

    /// The user's emails, newest first
    async fn recent_emails(&self, user_id: &str, limit: usize) -> Result<Vec<Email>>;

    /// Emails received in `(start, end]`, newest first
    async fn emails_received_between(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Email>>;

    /// Unclassified emails that no human has labeled, oldest first
    async fn unclassified_emails(&self, user_id: &str, limit: usize) -> Result<Vec<Email>>;

    /// Ingestion seam: insert or replace an email row
    async fn upsert_email(&self, email: Email) -> Result<()>;

    /// Write an automated decision; always clears `user_labeled`
    async fn apply_classification(&self, result: &ClassificationResult) -> Result<()>;

    /// Manual labeling path; the only writer of `user_labeled = true`
    async fn apply_user_label(&self, email_id: &str, importance: Importance) -> Result<()>;

    async fn active_expectation(&self, user_id: &str) -> Result<Option<Expectation>>;

    /// Store an expectation as the user's only active one
    async fn save_expectation(&self, expectation: Expectation) -> Result<()>;

    async fn preferences(&self, user_id: &str) -> Result<Option<UserPreferences>>;

    /// Replace the user's preferences wholesale
    async fn save_preferences(&self, preferences: UserPreferences) -> Result<()>;

    /// Latest digest log; its `sent_at` is the watermark
    async fn last_digest(&self, user_id: &str) -> Result<Option<DigestLog>>;

    async fn record_digest(&self, log: DigestLog) -> Result<()>;

    async fn sync_status(&self, user_id: &str) -> Result<SyncStatus>;

    /// Set status to `Syncing` only if it is not already; returns whether it did
    async fn try_begin_sync(&self, user_id: &str) -> Result<bool>;

    async fn finish_sync(&self, user_id: &str, status: SyncStatus) -> Result<()>;
}

/// Construct the vector store selected by configuration
///
/// `dimensions` is the embedding gateway's output size; the SQLite store
/// fixes its vec0 column to it.
pub async fn build_vector_store(
    config: &VectorStoreConfig,
    dimensions: usize,
) -> Result<Arc<dyn VectorStore>> {
    match config.backend {
        VectorStoreBackend::Memory => Ok(Arc::new(MemoryVectorStore::new(config.user_scan_cap))),
        VectorStoreBackend::Sqlite => {
            let store = SqliteVectorStore::with_pool_size(
                &config.path,
                dimensions,
                config.pool_size,
                config.user_scan_cap,
            )?;
            store.create_tables().await?;
            Ok(Arc::new(store))
        }
    }
}
