//! Digest engine
//!
//! Picks the threads worth surfacing since the user's last digest. Similarity
//! to the expectation prototype decides membership; recency decides display
//! order. Recording a digest advances the watermark, a dry run never does.

use crate::config::DigestConfig;
use crate::embeddings::cosine_similarity;
use crate::error::{ImpMailError, Result};
use crate::prototype::PrototypeBuilder;
use crate::ranking::best_per_thread;
use crate::storage::{MailStore, VectorStore};
use crate::thread::thread_key;
use crate::types::{DigestItem, DigestLog};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Result of one digest computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Digest {
    pub user_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,

    /// Newest first
    pub items: Vec<DigestItem>,

    /// Nothing met the threshold and the top threads were taken instead
    pub below_threshold: bool,

    /// A digest log was written and the watermark advanced
    pub recorded: bool,
}

pub struct DigestEngine {
    config: DigestConfig,
    prototypes: PrototypeBuilder,
    vectors: Arc<dyn VectorStore>,
    mail: Arc<dyn MailStore>,
}

impl DigestEngine {
    pub fn new(
        config: DigestConfig,
        prototypes: PrototypeBuilder,
        vectors: Arc<dyn VectorStore>,
        mail: Arc<dyn MailStore>,
    ) -> Self {
        Self {
            config,
            prototypes,
            vectors,
            mail,
        }
    }

    pub async fn compute_digest(&self, user_id: &str, dry_run: bool) -> Result<Digest> {
        self.compute_digest_at(user_id, Utc::now(), dry_run).await
    }

    /// Compute the digest for the window ending at `now`
    pub async fn compute_digest_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<Digest> {
        let expectation = self.mail.active_expectation(user_id).await?.ok_or_else(|| {
            ImpMailError::NotConfigured(format!("user {} has no active expectation", user_id))
        })?;

        // The window is (start, now]; mail at the watermark went out last time
        let window_start = match self.mail.last_digest(user_id).await? {
            Some(log) => log.sent_at,
            None => now - Duration::hours(self.config.window_hours),
        };

        let emails = self
            .mail
            .emails_received_between(user_id, window_start, now, self.config.max_emails)
            .await?;
        let prototype = self.prototypes.get_prototype(&expectation).await?;

        let ids: Vec<String> = emails.iter().map(|e| e.id.clone()).collect();
        let vectors: HashMap<String, Vec<f32>> = self
            .vectors
            .get_by_ids(user_id, &ids)
            .await?
            .into_iter()
            .map(|stored| (stored.id, stored.vector))
            .collect();

        let candidates = emails.iter().filter_map(|email| {
            vectors.get(&email.id).map(|vector| {
                let item = DigestItem {
                    email_id: email.id.clone(),
                    subject: email.subject.clone(),
                    sender: email.sender.clone(),
                    received_at: email.received_at,
                    similarity: cosine_similarity(&prototype, vector),
                };
                (thread_key(email), item)
            })
        });
        let threads = best_per_thread(candidates, |a: &DigestItem, b: &DigestItem| {
            a.similarity > b.similarity
        });
        let thread_total = threads.len();

        let (mut items, below_threshold) = {
            let passing: Vec<DigestItem> = threads
                .iter()
                .filter(|item| item.similarity >= self.config.threshold)
                .cloned()
                .collect();
            if passing.is_empty() {
                let mut ranked = threads;
                ranked.sort_by(|a, b| {
                    b.similarity
                        .total_cmp(&a.similarity)
                        .then_with(|| b.received_at.cmp(&a.received_at))
                });
                ranked.truncate(self.config.min_items);
                (ranked, true)
            } else {
                (passing, false)
            }
        };

        items.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| a.email_id.cmp(&b.email_id))
        });

        debug!(
            "Digest for user {}: {} emails, {} threads, {} selected",
            user_id,
            emails.len(),
            thread_total,
            items.len()
        );

        let recorded = !dry_run && !items.is_empty();
        if recorded {
            self.mail
                .record_digest(DigestLog {
                    id: Uuid::new_v4(),
                    user_id: user_id.to_string(),
                    sent_at: now,
                    thread_count: items.len(),
                    email_ids: items.iter().map(|i| i.email_id.clone()).collect(),
                })
                .await?;
            info!("Recorded digest of {} threads for user {}", items.len(), user_id);
        }

        Ok(Digest {
            user_id: user_id.to_string(),
            window_start,
            window_end: now,
            items,
            below_threshold,
            recorded,
        })
    }
}
