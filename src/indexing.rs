//! Email indexing
//!
//! Embeds a user's emails into the vector store. A pass runs under the
//! per-user advisory sync lock; classification and ranking keep reading while
//! it runs and may see a partially indexed mailbox.

use crate::embeddings::EmbeddingGateway;
use crate::error::{ImpMailError, Result};
use crate::storage::{MailStore, VectorStore};
use crate::thread::thread_key;
use crate::types::{Email, SyncStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub scanned: usize,
    pub indexed: usize,
    pub already_indexed: usize,
    pub failed: usize,
}

pub struct EmailIndexer {
    gateway: Arc<dyn EmbeddingGateway>,
    vectors: Arc<dyn VectorStore>,
    mail: Arc<dyn MailStore>,
}

impl EmailIndexer {
    pub fn new(
        gateway: Arc<dyn EmbeddingGateway>,
        vectors: Arc<dyn VectorStore>,
        mail: Arc<dyn MailStore>,
    ) -> Self {
        Self {
            gateway,
            vectors,
            mail,
        }
    }

    /// Embed and store one email, replacing any existing vector
    pub async fn index_email(&self, email: &Email) -> Result<()> {
        let vector = self.gateway.embed(&email.embedding_text()).await?;
        let metadata = serde_json::json!({
            "threadKey": thread_key(email).as_str(),
            "model": self.gateway.model_name(),
            "receivedAt": email.received_at,
        });
        self.vectors
            .upsert(
                &email.id,
                &email.user_id,
                &vector,
                self.gateway.model_name(),
                metadata,
            )
            .await
    }

    /// Index every email of the user that has no stored vector yet
    pub async fn sync_user(&self, user_id: &str) -> Result<SyncReport> {
        if !self.mail.try_begin_sync(user_id).await? {
            return Err(ImpMailError::SyncInProgress(user_id.to_string()));
        }

        let outcome = self.index_pending(user_id).await;
        let status = if outcome.is_ok() {
            SyncStatus::Idle
        } else {
            SyncStatus::Failed
        };
        self.mail.finish_sync(user_id, status).await?;

        if let Ok(report) = &outcome {
            info!(
                "Synced user {}: {} indexed, {} already indexed, {} failed",
                user_id, report.indexed, report.already_indexed, report.failed
            );
        }
        outcome
    }

    async fn index_pending(&self, user_id: &str) -> Result<SyncReport> {
        let emails = self.mail.recent_emails(user_id, usize::MAX).await?;
        let ids: Vec<String> = emails.iter().map(|e| e.id.clone()).collect();
        let existing: HashSet<String> = self
            .vectors
            .get_by_ids(user_id, &ids)
            .await?
            .into_iter()
            .map(|stored| stored.id)
            .collect();

        let mut report = SyncReport {
            scanned: emails.len(),
            already_indexed: existing.len(),
            ..SyncReport::default()
        };

        for email in emails.iter().filter(|e| !existing.contains(&e.id)) {
            match self.index_email(email).await {
                Ok(()) => {
                    debug!("Indexed email {}", email.id);
                    report.indexed += 1;
                }
                Err(e @ ImpMailError::Storage(_)) => return Err(e),
                Err(e) => {
                    warn!("Failed to embed email {}: {}", email.id, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Delete every stored vector of the user
    pub async fn reset_user(&self, user_id: &str) -> Result<usize> {
        let removed = self.vectors.delete_for_user(user_id).await?;
        info!("Reset user {}: removed {} vectors", user_id, removed);
        Ok(removed)
    }
}
