//! Similarity ranking over a user's mailbox
//!
//! Read-only, per-user batch views built on cosine similarity and thread
//! deduplication: prototype scores, a top-percentile slice of the most similar
//! threads, and outliers farthest from the user's own centroid.

use crate::config::RankingConfig;
use crate::embeddings::{centroid, cosine_similarity};
use crate::error::{ImpMailError, Result};
use crate::prototype::PrototypeBuilder;
use crate::storage::{MailStore, VectorStore};
use crate::thread::{thread_key, ThreadKey};
use crate::types::{Email, Expectation, ScoredEmail};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Keep one item per thread, preferring the item `better` says wins
///
/// Threads keep the position of their first appearance; on a tie the earlier
/// item stays.
pub(crate) fn best_per_thread<T>(
    items: impl IntoIterator<Item = (ThreadKey, T)>,
    better: impl Fn(&T, &T) -> bool,
) -> Vec<T> {
    let mut slots: HashMap<ThreadKey, usize> = HashMap::new();
    let mut kept: Vec<T> = Vec::new();
    for (key, item) in items {
        match slots.get(&key) {
            Some(&slot) => {
                if better(&item, &kept[slot]) {
                    kept[slot] = item;
                }
            }
            None => {
                slots.insert(key, kept.len());
                kept.push(item);
            }
        }
    }
    kept
}

/// Descending by score with missing scores last, then newest first
fn by_score_desc(a: &ScoredEmail, b: &ScoredEmail) -> Ordering {
    match (a.score, b.score) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| b.received_at.cmp(&a.received_at))
}

fn score_beats(a: &ScoredEmail, b: &ScoredEmail) -> bool {
    match (a.score, b.score) {
        (Some(x), Some(y)) => x > y,
        (Some(_), None) => true,
        _ => false,
    }
}

fn scored(email: &Email, key: &ThreadKey, score: Option<f32>) -> ScoredEmail {
    ScoredEmail {
        email_id: email.id.clone(),
        thread_key: key.to_string(),
        subject: email.subject.clone(),
        sender: email.sender.clone(),
        received_at: email.received_at,
        score,
    }
}

/// Similarity ranker over injected stores
pub struct SimilarityRanker {
    config: RankingConfig,
    prototypes: PrototypeBuilder,
    vectors: Arc<dyn VectorStore>,
    mail: Arc<dyn MailStore>,
}

impl SimilarityRanker {
    pub fn new(
        config: RankingConfig,
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

    async fn prototype_for(&self, user_id: &str) -> Result<(Expectation, Arc<Vec<f32>>)> {
        let expectation = self.mail.active_expectation(user_id).await?.ok_or_else(|| {
            ImpMailError::NotConfigured(format!("user {} has no active expectation", user_id))
        })?;
        let prototype = self.prototypes.get_prototype(&expectation).await?;
        Ok((expectation, prototype))
    }

    async fn vectors_by_id(
        &self,
        user_id: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<f32>>> {
        Ok(self
            .vectors
            .get_by_ids(user_id, ids)
            .await?
            .into_iter()
            .map(|stored| (stored.id, stored.vector))
            .collect())
    }

    /// Recent emails scored against the prototype, best email per thread
    pub async fn prototype_scores(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredEmail>> {
        let limit = limit.unwrap_or(self.config.default_limit);
        let (_, prototype) = self.prototype_for(user_id).await?;

        let emails = self
            .mail
            .recent_emails(user_id, self.config.scan_limit)
            .await?;
        let ids: Vec<String> = emails.iter().map(|e| e.id.clone()).collect();
        let vectors = self.vectors_by_id(user_id, &ids).await?;

        let candidates = emails.iter().map(|email| {
            let key = thread_key(email);
            let score = vectors
                .get(&email.id)
                .map(|v| cosine_similarity(&prototype, v));
            let item = scored(email, &key, score);
            (key, item)
        });

        let mut ranked = best_per_thread(candidates, score_beats);
        ranked.sort_by(by_score_desc);
        ranked.truncate(limit);

        debug!(
            "Prototype scores for user {}: {} threads from {} emails",
            user_id,
            ranked.len(),
            emails.len()
        );
        Ok(ranked)
    }

    /// The top `percent` of distinct threads by similarity to the prototype
    ///
    /// The thread census comes from a capped k-NN candidate pool, not the full
    /// mailbox.
    pub async fn top_similar(&self, user_id: &str, percent: f64) -> Result<Vec<ScoredEmail>> {
        if !(percent > 0.0 && percent <= 100.0) {
            return Err(ImpMailError::InvalidInput(format!(
                "percent must be in (0, 100], got {}",
                percent
            )));
        }

        let (_, prototype) = self.prototype_for(user_id).await?;
        let matches = self
            .vectors
            .search(&prototype, user_id, self.config.candidate_pool, -1.0)
            .await?;

        let ids: Vec<String> = matches.iter().map(|m| m.id.clone()).collect();
        let emails: HashMap<String, Email> = self
            .mail
            .get_emails(&ids)
            .await?
            .into_iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| (e.id.clone(), e))
            .collect();

        let pool: Vec<(ThreadKey, ScoredEmail)> = matches
            .iter()
            .filter_map(|m| {
                emails.get(&m.id).map(|email| {
                    let key = thread_key(email);
                    let item = scored(email, &key, Some(m.score));
                    (key, item)
                })
            })
            .collect();

        let distinct_threads = pool.iter().map(|(key, _)| key).collect::<HashSet<_>>().len();
        let target = (percent / 100.0 * distinct_threads as f64).ceil() as usize;

        let mut seen: HashSet<ThreadKey> = HashSet::new();
        let mut selected = Vec::with_capacity(target);
        for (key, item) in pool {
            if selected.len() >= target {
                break;
            }
            if seen.insert(key) {
                selected.push(item);
            }
        }

        debug!(
            "Top {}% for user {}: {} of {} threads in a pool of {}",
            percent,
            user_id,
            selected.len(),
            distinct_threads,
            matches.len()
        );
        Ok(selected)
    }

    /// Threads farthest from the centroid of all of the user's vectors
    pub async fn outliers(&self, user_id: &str, limit: Option<usize>) -> Result<Vec<ScoredEmail>> {
        let limit = limit.unwrap_or(self.config.default_limit);
        let stored = self.vectors.get_all_for_user(user_id).await?;
        let Some(center) = centroid(&stored.iter().map(|s| s.vector.as_slice()).collect::<Vec<_>>())
        else {
            return Ok(Vec::new());
        };

        let ids: Vec<String> = stored.iter().map(|s| s.id.clone()).collect();
        let emails: HashMap<String, Email> = self
            .mail
            .get_emails(&ids)
            .await?
            .into_iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| (e.id.clone(), e))
            .collect();

        let candidates = stored.iter().filter_map(|s| {
            emails.get(&s.id).map(|email| {
                let key = thread_key(email);
                let distance = 1.0 - cosine_similarity(&center, &s.vector);
                let item = scored(email, &key, Some(distance));
                (key, item)
            })
        });

        let mut ranked = best_per_thread(candidates, score_beats);
        ranked.sort_by(by_score_desc);
        ranked.truncate(limit);
        Ok(ranked)
    }
}
