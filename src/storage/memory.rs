//! In-memory storage backends
//!
//! Used by the CLI when no database is configured and by tests.

use crate::embeddings::cosine_similarity;
use crate::error::{ImpMailError, Result};
use crate::storage::{MailStore, StoredVector, VectorMatch, VectorStore};
use crate::types::{
    ClassificationResult, DigestLog, Email, Expectation, Importance, SyncStatus, UserPreferences,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct VectorEntry {
    user_id: String,
    vector: Vec<f32>,
    #[allow(dead_code)]
    model: String,
    #[allow(dead_code)]
    metadata: serde_json::Value,
    seq: u64,
}

#[derive(Debug, Default)]
struct VectorTable {
    entries: HashMap<String, VectorEntry>,
    next_seq: u64,
}

/// Vector store held in process memory
#[derive(Debug)]
pub struct MemoryVectorStore {
    table: RwLock<VectorTable>,
    user_scan_cap: usize,
}

impl MemoryVectorStore {
    pub fn new(user_scan_cap: usize) -> Self {
        Self {
            table: RwLock::new(VectorTable::default()),
            user_scan_cap,
        }
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(
        &self,
        id: &str,
        user_id: &str,
        vector: &[f32],
        model: &str,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let mut table = self.table.write().await;
        table.next_seq += 1;
        let seq = table.next_seq;
        table.entries.insert(
            id.to_string(),
            VectorEntry {
                user_id: user_id.to_string(),
                vector: vector.to_vec(),
                model: model.to_string(),
                metadata,
                seq,
            },
        );
        Ok(())
    }

    async fn get_by_ids(&self, user_id: &str, ids: &[String]) -> Result<Vec<StoredVector>> {
        let table = self.table.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                let entry = table.entries.get(id)?;
                (entry.user_id == user_id).then(|| StoredVector {
                    id: id.clone(),
                    vector: entry.vector.clone(),
                })
            })
            .collect())
    }

    async fn get_all_for_user(&self, user_id: &str) -> Result<Vec<StoredVector>> {
        let table = self.table.read().await;
        let mut entries: Vec<(&String, &VectorEntry)> = table
            .entries
            .iter()
            .filter(|(_, entry)| entry.user_id == user_id)
            .collect();
        entries.sort_by(|a, b| b.1.seq.cmp(&a.1.seq));

        Ok(entries
            .into_iter()
            .take(self.user_scan_cap)
            .map(|(id, entry)| StoredVector {
                id: id.clone(),
                vector: entry.vector.clone(),
            })
            .collect())
    }

    async fn search(
        &self,
        vector: &[f32],
        user_id: &str,
        k: usize,
        min_score: f32,
    ) -> Result<Vec<VectorMatch>> {
        let table = self.table.read().await;
        let mut matches: Vec<VectorMatch> = table
            .entries
            .iter()
            .filter(|(_, entry)| entry.user_id == user_id)
            .map(|(id, entry)| VectorMatch {
                id: id.clone(),
                score: cosine_similarity(vector, &entry.vector),
            })
            .filter(|m| m.score >= min_score)
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(k);
        debug!("Memory vector search returned {} results", matches.len());
        Ok(matches)
    }

    async fn count(&self, user_id: &str) -> Result<usize> {
        let table = self.table.read().await;
        Ok(table
            .entries
            .values()
            .filter(|entry| entry.user_id == user_id)
            .count())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.table.write().await.entries.remove(id).is_some())
    }

    async fn delete_for_user(&self, user_id: &str) -> Result<usize> {
        let mut table = self.table.write().await;
        let before = table.entries.len();
        table.entries.retain(|_, entry| entry.user_id != user_id);
        Ok(before - table.entries.len())
    }
}

/// Mail store held in process memory
#[derive(Debug, Default)]
pub struct MemoryMailStore {
    emails: RwLock<HashMap<String, Email>>,
    expectations: RwLock<Vec<Expectation>>,
    preferences: RwLock<HashMap<String, UserPreferences>>,
    digests: RwLock<Vec<DigestLog>>,
    sync: RwLock<HashMap<String, SyncStatus>>,
}

impl MemoryMailStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store already-parsed emails from an email source export
    pub async fn seed(&self, emails: impl IntoIterator<Item = Email>) {
        let mut table = self.emails.write().await;
        for email in emails {
            table.insert(email.id.clone(), email);
        }
    }

    async fn user_emails_sorted(&self, user_id: &str, newest_first: bool) -> Vec<Email> {
        let table = self.emails.read().await;
        let mut emails: Vec<Email> = table
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        emails.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if newest_first {
            emails.reverse();
        }
        emails
    }
}

#[async_trait]
impl MailStore for MemoryMailStore {
    async fn get_email(&self, email_id: &str) -> Result<Option<Email>> {
        Ok(self.emails.read().await.get(email_id).cloned())
    }

    async fn get_emails(&self, email_ids: &[String]) -> Result<Vec<Email>> {
        let table = self.emails.read().await;
        Ok(email_ids
            .iter()
            .filter_map(|id| table.get(id).cloned())
            .collect())
    }

    async fn recent_emails(&self, user_id: &str, limit: usize) -> Result<Vec<Email>> {
        let mut emails = self.user_emails_sorted(user_id, true).await;
        emails.truncate(limit);
        Ok(emails)
    }

    async fn emails_received_between(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Email>> {
        Ok(self
            .user_emails_sorted(user_id, true)
            .await
            .into_iter()
            .filter(|e| e.received_at > start && e.received_at <= end)
            .take(limit)
            .collect())
    }

    async fn unclassified_emails(&self, user_id: &str, limit: usize) -> Result<Vec<Email>> {
        Ok(self
            .user_emails_sorted(user_id, false)
            .await
            .into_iter()
            .filter(|e| e.importance == Importance::Unclassified && !e.user_labeled)
            .take(limit)
            .collect())
    }

    async fn upsert_email(&self, email: Email) -> Result<()> {
        self.emails.write().await.insert(email.id.clone(), email);
        Ok(())
    }

    async fn apply_classification(&self, result: &ClassificationResult) -> Result<()> {
        let mut table = self.emails.write().await;
        let email = table
            .get_mut(&result.email_id)
            .ok_or_else(|| ImpMailError::EmailNotFound(result.email_id.clone()))?;
        email.importance = result.importance;
        email.importance_confidence = Some(result.confidence);
        email.user_labeled = false;
        Ok(())
    }

    async fn apply_user_label(&self, email_id: &str, importance: Importance) -> Result<()> {
        let mut table = self.emails.write().await;
        let email = table
            .get_mut(email_id)
            .ok_or_else(|| ImpMailError::EmailNotFound(email_id.to_string()))?;
        email.importance = importance;
        email.importance_confidence = Some(1.0);
        email.user_labeled = true;
        Ok(())
    }

    async fn active_expectation(&self, user_id: &str) -> Result<Option<Expectation>> {
        Ok(self
            .expectations
            .read()
            .await
            .iter()
            .rev()
            .find(|e| e.user_id == user_id && e.is_active)
            .cloned())
    }

    async fn save_expectation(&self, mut expectation: Expectation) -> Result<()> {
        let mut table = self.expectations.write().await;
        for existing in table.iter_mut().filter(|e| e.user_id == expectation.user_id) {
            existing.is_active = false;
        }
        expectation.is_active = true;
        table.push(expectation);
        Ok(())
    }

    async fn preferences(&self, user_id: &str) -> Result<Option<UserPreferences>> {
        Ok(self.preferences.read().await.get(user_id).cloned())
    }

    async fn save_preferences(&self, preferences: UserPreferences) -> Result<()> {
        self.preferences
            .write()
            .await
            .insert(preferences.user_id.clone(), preferences);
        Ok(())
    }

    async fn last_digest(&self, user_id: &str) -> Result<Option<DigestLog>> {
        Ok(self
            .digests
            .read()
            .await
            .iter()
            .filter(|log| log.user_id == user_id)
            .max_by_key(|log| log.sent_at)
            .cloned())
    }

    async fn record_digest(&self, log: DigestLog) -> Result<()> {
        self.digests.write().await.push(log);
        Ok(())
    }

    async fn sync_status(&self, user_id: &str) -> Result<SyncStatus> {
        Ok(self
            .sync
            .read()
            .await
            .get(user_id)
            .copied()
            .unwrap_or_default())
    }

    async fn try_begin_sync(&self, user_id: &str) -> Result<bool> {
        let mut table = self.sync.write().await;
        let status = table.entry(user_id.to_string()).or_default();
        if *status == SyncStatus::Syncing {
            return Ok(false);
        }
        *status = SyncStatus::Syncing;
        Ok(true)
    }

    async fn finish_sync(&self, user_id: &str, status: SyncStatus) -> Result<()> {
        self.sync.write().await.insert(user_id.to_string(), status);
        Ok(())
    }
}
