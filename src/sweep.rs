//! Incremental classification sweep
//!
//! Periodically classifies emails that are still unclassified and were never
//! labeled by hand, in small paced batches through the tiered classifier.

use crate::classifier::TieredClassifier;
use crate::config::SweepConfig;
use crate::error::{ImpMailError, Result};
use crate::storage::MailStore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Outcome of one sweep pass for one user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub user_id: String,

    /// The user has no active expectation, nothing was attempted
    pub skipped: bool,

    pub selected: usize,
    pub classified: usize,
    pub failed: usize,
    pub prototype_count: usize,
    pub llm_count: usize,
    pub fallback_count: usize,
    pub review_count: usize,
}

/// Emails whose batch failed, keyed by user, with the time of the failure
///
/// Classified emails leave the unclassified set on their own, so only
/// failures need remembering. Entries expire after `retry_failed_after` and
/// the email becomes eligible again.
type HeldBack = HashMap<String, HashMap<String, Instant>>;

pub struct ClassificationSweep {
    config: SweepConfig,
    classifier: Arc<TieredClassifier>,
    mail: Arc<dyn MailStore>,
    held_back: Mutex<HeldBack>,
    running: AtomicBool,
    wake: Notify,
}

impl ClassificationSweep {
    pub fn new(
        config: SweepConfig,
        classifier: Arc<TieredClassifier>,
        mail: Arc<dyn MailStore>,
    ) -> Self {
        Self {
            config,
            classifier,
            mail,
            held_back: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Drop expired entries and return the ids still held back for the user
    fn prune_held_back(&self, user_id: &str, now: Instant) -> HashSet<String> {
        let retry_after = self.config.retry_failed_after;
        let mut held_back = self.held_back.lock().unwrap_or_else(|e| e.into_inner());
        held_back.retain(|_, failed| {
            failed.retain(|_, at| now.saturating_duration_since(*at) < retry_after);
            !failed.is_empty()
        });
        held_back
            .get(user_id)
            .map(|failed| failed.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn hold_back(&self, user_id: &str, ids: &[String], now: Instant) {
        let mut held_back = self.held_back.lock().unwrap_or_else(|e| e.into_inner());
        let failed = held_back.entry(user_id.to_string()).or_default();
        for id in ids {
            failed.insert(id.clone(), now);
        }
    }

    /// Number of the user's emails skipped after a failed batch
    pub fn held_back_count(&self, user_id: &str) -> usize {
        self.held_back
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .map_or(0, HashMap::len)
    }

    /// Classify the user's pending emails once
    pub async fn run_once(&self, user_id: &str) -> Result<SweepReport> {
        self.sweep_user(user_id, false).await
    }

    /// One pass for one user; an interruptible pass ends early once stopped
    async fn sweep_user(&self, user_id: &str, interruptible: bool) -> Result<SweepReport> {
        let mut report = SweepReport {
            user_id: user_id.to_string(),
            ..SweepReport::default()
        };

        if self.mail.active_expectation(user_id).await?.is_none() {
            debug!("Skipping sweep for user {}: no active expectation", user_id);
            report.skipped = true;
            return Ok(report);
        }

        let held_back = self.prune_held_back(user_id, Instant::now());
        let pending: Vec<String> = self
            .mail
            .unclassified_emails(user_id, self.config.max_per_pass)
            .await?
            .into_iter()
            .map(|e| e.id)
            .filter(|id| !held_back.contains(id))
            .collect();
        report.selected = pending.len();

        for chunk in pending.chunks(self.config.batch_size) {
            if interruptible && !self.running.load(Ordering::SeqCst) {
                debug!("Sweep for user {} stopped between batches", user_id);
                break;
            }
            match self.classifier.classify_batch(user_id, chunk).await {
                Ok(batch) => {
                    report.classified += batch.results.len();
                    report.prototype_count += batch.prototype_count;
                    report.llm_count += batch.llm_count;
                    report.fallback_count += batch.fallback_count;
                    report.review_count += batch.review_count;
                }
                Err(e) => {
                    warn!(
                        "Sweep batch of {} failed for user {}: {}",
                        chunk.len(),
                        user_id,
                        e
                    );
                    report.failed += chunk.len();
                    self.hold_back(user_id, chunk, Instant::now());
                }
            }
        }

        if report.selected > 0 {
            info!(
                "Sweep for user {}: {} selected, {} classified, {} failed",
                user_id, report.selected, report.classified, report.failed
            );
        }
        Ok(report)
    }

    /// Sweep the given users every interval until stopped
    pub async fn run(&self, user_ids: Vec<String>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ImpMailError::AlreadyRunning);
        }

        info!(
            "Starting classification sweep for {} users every {:?}",
            user_ids.len(),
            self.config.interval
        );

        while self.running.load(Ordering::SeqCst) {
            for user_id in &user_ids {
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = self.sweep_user(user_id, true).await {
                    error!("Sweep failed for user {}: {}", user_id, e);
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = self.wake.notified() => {}
            }
        }

        info!("Classification sweep stopped");
        Ok(())
    }

    /// Stop a running sweep after its current batch
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        // Stores a permit if the loop is not parked yet
        self.wake.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassifierConfig;
    use crate::embeddings::HashingEmbedder;
    use crate::prototype::{PrototypeBuilder, PrototypeCache};
    use crate::services::{DisabledLlmClassifier, LlmClassifier};
    use crate::storage::{MemoryMailStore, MemoryVectorStore};
    use crate::types::{
        ClassificationResult, DigestLog, Email, Expectation, ExpectationExamples, Importance,
        LlmJudgment, SyncStatus, UserPreferences,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::time::Duration;

    fn email(id: &str, minutes: i64) -> Email {
        Email {
            id: id.to_string(),
            user_id: "u1".to_string(),
            subject: format!("Deadline {}", id),
            sender: "prof@uni.edu".to_string(),
            content: "Assignment due soon".to_string(),
            received_at: Utc::now() - ChronoDuration::minutes(minutes),
            message_id: None,
            metadata: Default::default(),
            importance: Importance::Unclassified,
            importance_confidence: None,
            user_labeled: false,
        }
    }

    /// Mail store whose classification writes can be switched to fail
    struct FlakyMailStore {
        inner: MemoryMailStore,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl MailStore for FlakyMailStore {
        async fn get_email(&self, email_id: &str) -> Result<Option<Email>> {
            self.inner.get_email(email_id).await
        }

        async fn get_emails(&self, email_ids: &[String]) -> Result<Vec<Email>> {
            self.inner.get_emails(email_ids).await
        }

        async fn recent_emails(&self, user_id: &str, limit: usize) -> Result<Vec<Email>> {
            self.inner.recent_emails(user_id, limit).await
        }

        async fn emails_received_between(
            &self,
            user_id: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<Email>> {
            self.inner
                .emails_received_between(user_id, start, end, limit)
                .await
        }

        async fn unclassified_emails(&self, user_id: &str, limit: usize) -> Result<Vec<Email>> {
            self.inner.unclassified_emails(user_id, limit).await
        }

        async fn upsert_email(&self, email: Email) -> Result<()> {
            self.inner.upsert_email(email).await
        }

        async fn apply_classification(&self, result: &ClassificationResult) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(ImpMailError::Storage("write refused".to_string()));
            }
            self.inner.apply_classification(result).await
        }

        async fn apply_user_label(&self, email_id: &str, importance: Importance) -> Result<()> {
            self.inner.apply_user_label(email_id, importance).await
        }

        async fn active_expectation(&self, user_id: &str) -> Result<Option<Expectation>> {
            self.inner.active_expectation(user_id).await
        }

        async fn save_expectation(&self, expectation: Expectation) -> Result<()> {
            self.inner.save_expectation(expectation).await
        }

        async fn preferences(&self, user_id: &str) -> Result<Option<UserPreferences>> {
            self.inner.preferences(user_id).await
        }

        async fn save_preferences(&self, preferences: UserPreferences) -> Result<()> {
            self.inner.save_preferences(preferences).await
        }

        async fn last_digest(&self, user_id: &str) -> Result<Option<DigestLog>> {
            self.inner.last_digest(user_id).await
        }

        async fn record_digest(&self, log: DigestLog) -> Result<()> {
            self.inner.record_digest(log).await
        }

        async fn sync_status(&self, user_id: &str) -> Result<SyncStatus> {
            self.inner.sync_status(user_id).await
        }

        async fn try_begin_sync(&self, user_id: &str) -> Result<bool> {
            self.inner.try_begin_sync(user_id).await
        }

        async fn finish_sync(&self, user_id: &str, status: SyncStatus) -> Result<()> {
            self.inner.finish_sync(user_id, status).await
        }
    }

    /// LLM that takes `delay` per batch before judging everything important
    struct SlowLlm {
        delay: Duration,
    }

    #[async_trait]
    impl LlmClassifier for SlowLlm {
        fn is_available(&self) -> bool {
            true
        }

        async fn classify(&self, _email: &Email, _expectation: &Expectation) -> Result<LlmJudgment> {
            tokio::time::sleep(self.delay).await;
            Ok(judgment())
        }

        async fn classify_batch(
            &self,
            emails: &[Email],
            _expectation: &Expectation,
        ) -> Result<HashMap<String, LlmJudgment>> {
            tokio::time::sleep(self.delay).await;
            Ok(emails.iter().map(|e| (e.id.clone(), judgment())).collect())
        }
    }

    fn judgment() -> LlmJudgment {
        LlmJudgment {
            importance: Importance::Important,
            confidence: 0.9,
            reasoning: "slow but sure".to_string(),
        }
    }

    fn sweep_config(interval: Duration) -> SweepConfig {
        SweepConfig {
            batch_size: 2,
            max_per_pass: 100,
            interval,
            retry_failed_after: Duration::from_secs(3600),
        }
    }

    async fn seeded_mail(with_expectation: bool) -> Arc<FlakyMailStore> {
        let mail = Arc::new(FlakyMailStore {
            inner: MemoryMailStore::new(),
            fail_writes: AtomicBool::new(false),
        });
        mail.inner.seed((0..5).map(|i| email(&format!("e{}", i), i))).await;
        mail.apply_user_label("e4", Importance::NotImportant).await.unwrap();
        if with_expectation {
            mail.save_expectation(Expectation::new(
                "u1",
                "Academic",
                "deadlines",
                ExpectationExamples::default(),
            ))
            .await
            .unwrap();
        }
        mail
    }

    fn build_sweep(
        mail: Arc<FlakyMailStore>,
        llm: Arc<dyn LlmClassifier>,
        config: SweepConfig,
    ) -> Arc<ClassificationSweep> {
        let prototypes = PrototypeBuilder::new(
            Arc::new(HashingEmbedder::new(64, 1000)),
            Arc::new(PrototypeCache::new(4)),
        );
        let classifier = Arc::new(TieredClassifier::new(
            ClassifierConfig {
                llm_batch_delay: Duration::ZERO,
                ..ClassifierConfig::default()
            },
            prototypes,
            Arc::new(MemoryVectorStore::default()),
            mail.clone(),
            llm,
        ));
        Arc::new(ClassificationSweep::new(config, classifier, mail))
    }

    async fn sweep(
        with_expectation: bool,
        interval: Duration,
    ) -> (Arc<ClassificationSweep>, Arc<FlakyMailStore>) {
        let mail = seeded_mail(with_expectation).await;
        let sweep = build_sweep(
            mail.clone(),
            Arc::new(DisabledLlmClassifier),
            sweep_config(interval),
        );
        (sweep, mail)
    }

    #[tokio::test]
    async fn test_run_once_classifies_pending_only() {
        let (sweep, mail) = sweep(true, Duration::from_secs(60)).await;

        let report = sweep.run_once("u1").await.unwrap();
        assert!(!report.skipped);
        assert_eq!(report.selected, 4);
        assert_eq!(report.classified, 4);
        assert_eq!(report.fallback_count, 4);

        // Classified emails are not tracked, they simply stop being pending
        assert_eq!(sweep.held_back_count("u1"), 0);

        let labeled = mail.get_email("e4").await.unwrap().unwrap();
        assert!(labeled.user_labeled);
        assert_eq!(labeled.importance_confidence, Some(1.0));

        let second = sweep.run_once("u1").await.unwrap();
        assert_eq!(second.selected, 0);
    }

    #[tokio::test]
    async fn test_run_once_skips_without_expectation() {
        let (sweep, _) = sweep(false, Duration::from_secs(60)).await;
        let report = sweep.run_once("u1").await.unwrap();
        assert!(report.skipped);
        assert_eq!(report.selected, 0);
    }

    #[tokio::test]
    async fn test_failed_batches_held_back() {
        let (sweep, mail) = sweep(true, Duration::from_secs(60)).await;
        mail.fail_writes.store(true, Ordering::SeqCst);

        let report = sweep.run_once("u1").await.unwrap();
        assert_eq!(report.selected, 4);
        assert_eq!(report.failed, 4);
        assert_eq!(sweep.held_back_count("u1"), 4);

        mail.fail_writes.store(false, Ordering::SeqCst);
        let second = sweep.run_once("u1").await.unwrap();
        assert_eq!(second.selected, 0);
        assert_eq!(mail.unclassified_emails("u1", 10).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_held_back_emails_retried_after_expiry() {
        let mail = seeded_mail(true).await;
        let config = SweepConfig {
            retry_failed_after: Duration::ZERO,
            ..sweep_config(Duration::from_secs(60))
        };
        let sweep = build_sweep(mail.clone(), Arc::new(DisabledLlmClassifier), config);

        mail.fail_writes.store(true, Ordering::SeqCst);
        assert_eq!(sweep.run_once("u1").await.unwrap().failed, 4);

        mail.fail_writes.store(false, Ordering::SeqCst);
        let retry = sweep.run_once("u1").await.unwrap();
        assert_eq!(retry.selected, 4);
        assert_eq!(retry.classified, 4);
        assert_eq!(sweep.held_back_count("u1"), 0);
    }

    #[tokio::test]
    async fn test_run_until_stopped() {
        let (sweep, mail) = sweep(true, Duration::from_millis(10)).await;

        let handle = {
            let sweep = Arc::clone(&sweep);
            tokio::spawn(async move { sweep.run(vec!["u1".to_string()]).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sweep.is_running());
        assert!(matches!(
            sweep.run(vec![]).await,
            Err(ImpMailError::AlreadyRunning)
        ));

        sweep.stop();
        handle.await.unwrap().unwrap();
        assert!(!sweep.is_running());
        assert!(mail.unclassified_emails("u1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_during_pass_returns_promptly() {
        let mail = seeded_mail(true).await;
        let sweep = build_sweep(
            mail.clone(),
            Arc::new(SlowLlm {
                delay: Duration::from_millis(300),
            }),
            sweep_config(Duration::from_secs(5)),
        );

        let handle = {
            let sweep = Arc::clone(&sweep);
            tokio::spawn(async move { sweep.run(vec!["u1".to_string()]).await })
        };

        // Land inside the first LLM batch
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweep.stop();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweep should stop well before the next interval")
            .unwrap()
            .unwrap();

        // The batch in flight finished, the next one never started
        assert_eq!(mail.unclassified_emails("u1", 10).await.unwrap().len(), 2);
    }
}
