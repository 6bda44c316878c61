//! Dual-centroid preference classification
//!
//! Learns from explicit like/dislike selections: the centroid of liked email
//! vectors and the centroid of disliked ones. An email leans whichever way it
//! is closer to, by more than a margin.

use crate::config::PreferenceConfig;
use crate::embeddings::{centroid, cosine_similarity};
use crate::error::{ImpMailError, Result};
use crate::storage::{MailStore, VectorStore};
use crate::types::{Importance, PreferenceScore, UserPreferences, UserPrototypes};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Label for a liked-minus-disliked similarity margin
pub fn label_for_margin(margin: f32, threshold: f32) -> Importance {
    if margin > threshold {
        Importance::Important
    } else if margin < -threshold {
        Importance::NotImportant
    } else {
        Importance::Unclassified
    }
}

fn dedupe(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// Computed centroids per user, plus a per-user generation bumped on every save
///
/// A computation only lands in the cache if the generation it started under
/// is still current.
#[derive(Default)]
struct CentroidCache {
    entries: HashMap<String, Arc<UserPrototypes>>,
    generations: HashMap<String, u64>,
}

impl CentroidCache {
    fn generation(&self, user_id: &str) -> u64 {
        self.generations.get(user_id).copied().unwrap_or(0)
    }
}

pub struct PreferenceService {
    config: PreferenceConfig,
    vectors: Arc<dyn VectorStore>,
    mail: Arc<dyn MailStore>,
    cache: Mutex<CentroidCache>,
}

impl PreferenceService {
    pub fn new(
        config: PreferenceConfig,
        vectors: Arc<dyn VectorStore>,
        mail: Arc<dyn MailStore>,
    ) -> Self {
        Self {
            config,
            vectors,
            mail,
            cache: Mutex::new(CentroidCache::default()),
        }
    }

    /// Cached centroids and the user's current generation
    fn cached(&self, user_id: &str) -> (Option<Arc<UserPrototypes>>, u64) {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        (cache.entries.get(user_id).cloned(), cache.generation(user_id))
    }

    fn invalidate(&self, user_id: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.entries.remove(user_id);
        *cache.generations.entry(user_id.to_string()).or_insert(0) += 1;
    }

    /// Store centroids unless preferences were saved since `generation`
    fn store(&self, user_id: &str, generation: u64, prototypes: &Arc<UserPrototypes>) -> bool {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.generation(user_id) != generation {
            return false;
        }
        cache
            .entries
            .insert(user_id.to_string(), Arc::clone(prototypes));
        true
    }

    /// Every id must name one of the user's own emails
    async fn check_ownership(&self, user_id: &str, ids: &[String]) -> Result<()> {
        let owned: HashSet<String> = self
            .mail
            .get_emails(ids)
            .await?
            .into_iter()
            .filter(|email| email.user_id == user_id)
            .map(|email| email.id)
            .collect();

        match ids.iter().find(|id| !owned.contains(*id)) {
            Some(id) => Err(ImpMailError::InvalidInput(format!(
                "email {} is not in the mailbox of user {}",
                id, user_id
            ))),
            None => Ok(()),
        }
    }

    /// Replace the user's like/dislike selections
    pub async fn save_preferences(
        &self,
        user_id: &str,
        liked_email_ids: Vec<String>,
        disliked_email_ids: Vec<String>,
    ) -> Result<UserPreferences> {
        let liked = dedupe(liked_email_ids);
        let disliked = dedupe(disliked_email_ids);

        let liked_set: HashSet<&String> = liked.iter().collect();
        if let Some(both) = disliked.iter().find(|id| liked_set.contains(id)) {
            return Err(ImpMailError::InvalidInput(format!(
                "email {} is both liked and disliked",
                both
            )));
        }

        let min = self.config.min_examples;
        if liked.len() < min || disliked.len() < min {
            return Err(ImpMailError::NotConfigured(format!(
                "need at least {} liked and {} disliked emails, got {} and {}",
                min,
                min,
                liked.len(),
                disliked.len()
            )));
        }

        let selected: Vec<String> = liked.iter().chain(disliked.iter()).cloned().collect();
        self.check_ownership(user_id, &selected).await?;

        let preferences = UserPreferences {
            user_id: user_id.to_string(),
            liked_email_ids: liked,
            disliked_email_ids: disliked,
            updated_at: Utc::now(),
        };
        self.mail.save_preferences(preferences.clone()).await?;
        self.invalidate(user_id);

        info!(
            "Saved preferences for user {} ({} liked, {} disliked)",
            user_id,
            preferences.liked_email_ids.len(),
            preferences.disliked_email_ids.len()
        );
        Ok(preferences)
    }

    async fn group_centroid(
        &self,
        user_id: &str,
        ids: &[String],
        group: &str,
    ) -> Result<(Vec<f32>, usize)> {
        let stored = self.vectors.get_by_ids(user_id, ids).await?;
        let vectors: Vec<&[f32]> = stored.iter().map(|s| s.vector.as_slice()).collect();
        let center = centroid(&vectors).ok_or_else(|| {
            ImpMailError::NotConfigured(format!("no indexed vectors for {} emails", group))
        })?;
        Ok((center, stored.len()))
    }

    /// Liked and disliked centroids, cached until preferences change
    pub async fn compute_prototypes(&self, user_id: &str) -> Result<Arc<UserPrototypes>> {
        let (cached, generation) = self.cached(user_id);
        if let Some(prototypes) = cached {
            return Ok(prototypes);
        }

        let preferences = self.mail.preferences(user_id).await?.ok_or_else(|| {
            ImpMailError::NotConfigured(format!("user {} has no saved preferences", user_id))
        })?;

        let (liked_centroid, liked_count) = self
            .group_centroid(user_id, &preferences.liked_email_ids, "liked")
            .await?;
        let (disliked_centroid, disliked_count) = self
            .group_centroid(user_id, &preferences.disliked_email_ids, "disliked")
            .await?;

        let prototypes = Arc::new(UserPrototypes {
            liked_centroid,
            disliked_centroid,
            liked_count,
            disliked_count,
        });
        if !self.store(user_id, generation, &prototypes) {
            debug!(
                "Preferences for user {} changed while computing centroids, not caching",
                user_id
            );
            return Ok(prototypes);
        }

        debug!(
            "Computed preference centroids for user {} from {} liked, {} disliked vectors",
            user_id, liked_count, disliked_count
        );
        Ok(prototypes)
    }

    /// Score one email against the user's preference centroids
    pub async fn score(&self, user_id: &str, email_id: &str) -> Result<PreferenceScore> {
        let mut scores = self.score_emails(user_id, &[email_id.to_string()]).await?;
        scores
            .pop()
            .ok_or_else(|| ImpMailError::EmailNotFound(email_id.to_string()))
    }

    /// Score several emails; emails without a vector come back unclassified
    pub async fn score_emails(
        &self,
        user_id: &str,
        email_ids: &[String],
    ) -> Result<Vec<PreferenceScore>> {
        let prototypes = self.compute_prototypes(user_id).await?;
        let vectors: HashMap<String, Vec<f32>> = self
            .vectors
            .get_by_ids(user_id, email_ids)
            .await?
            .into_iter()
            .map(|stored| (stored.id, stored.vector))
            .collect();

        Ok(email_ids
            .iter()
            .map(|id| match vectors.get(id) {
                Some(vector) => {
                    let liked = cosine_similarity(vector, &prototypes.liked_centroid);
                    let disliked = cosine_similarity(vector, &prototypes.disliked_centroid);
                    let margin = liked - disliked;
                    PreferenceScore {
                        email_id: id.clone(),
                        liked_similarity: liked,
                        disliked_similarity: disliked,
                        margin,
                        label: label_for_margin(margin, self.config.margin_threshold),
                    }
                }
                None => PreferenceScore {
                    email_id: id.clone(),
                    liked_similarity: 0.0,
                    disliked_similarity: 0.0,
                    margin: 0.0,
                    label: Importance::Unclassified,
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_for_margin() {
        assert_eq!(label_for_margin(0.2, 0.05), Importance::Important);
        assert_eq!(label_for_margin(-0.2, 0.05), Importance::NotImportant);
        assert_eq!(label_for_margin(0.05, 0.05), Importance::Unclassified);
        assert_eq!(label_for_margin(-0.01, 0.05), Importance::Unclassified);
    }

    fn prototypes(liked: f32) -> Arc<UserPrototypes> {
        Arc::new(UserPrototypes {
            liked_centroid: vec![liked, 0.0],
            disliked_centroid: vec![0.0, 1.0],
            liked_count: 1,
            disliked_count: 1,
        })
    }

    #[test]
    fn test_centroid_store_rejected_after_invalidation() {
        let service = PreferenceService::new(
            PreferenceConfig::default(),
            Arc::new(crate::storage::MemoryVectorStore::default()),
            Arc::new(crate::storage::MemoryMailStore::new()),
        );

        let (_, generation) = service.cached("u1");
        service.invalidate("u1");
        assert!(!service.store("u1", generation, &prototypes(1.0)));
        assert!(service.cached("u1").0.is_none());

        let (_, generation) = service.cached("u1");
        assert_eq!(generation, 1);
        assert!(service.store("u1", generation, &prototypes(0.5)));
        let (cached, _) = service.cached("u1");
        assert_eq!(cached.unwrap().liked_centroid, vec![0.5, 0.0]);

        // Other users keep their own generation
        assert_eq!(service.cached("u2").1, 0);
    }

    #[test]
    fn test_dedupe_preserves_order() {
        let ids = vec!["b", "a", "b", "c", "a"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(dedupe(ids), vec!["b", "a", "c"]);
    }
}
