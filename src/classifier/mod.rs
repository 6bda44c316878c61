//! Tiered importance classifier
//!
//! Decides important / not_important for an email against the user's active
//! expectation:
//! 1. cosine similarity to the prototype, when the email has a vector and the
//!    similarity clears the high or low threshold
//! 2. the LLM classifier, for borderline or vector-less emails
//! 3. a keyword heuristic when the LLM is unavailable or fails
//!
//! Every terminal decision is written back to the email row with
//! `user_labeled = false`.

pub mod keywords;

pub use keywords::{score_keywords, KeywordScore};

use crate::config::ClassifierConfig;
use crate::embeddings::cosine_similarity;
use crate::error::{ImpMailError, Result};
use crate::prototype::PrototypeBuilder;
use crate::services::LlmClassifier;
use crate::storage::{MailStore, VectorStore};
use crate::types::{
    ClassificationMethod, ClassificationResult, Email, Expectation, Importance, LlmJudgment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Summary of a batch classification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// One result per classified email, in input order
    pub results: Vec<ClassificationResult>,
    pub prototype_count: usize,
    pub llm_count: usize,
    pub fallback_count: usize,
    pub review_count: usize,
}

impl BatchReport {
    fn from_results(results: Vec<ClassificationResult>) -> Self {
        let count = |method| results.iter().filter(|r| r.method == method).count();
        Self {
            prototype_count: count(ClassificationMethod::Prototype),
            llm_count: count(ClassificationMethod::Llm),
            fallback_count: count(ClassificationMethod::Fallback),
            review_count: results.iter().filter(|r| r.needs_review).count(),
            results,
        }
    }
}

/// Confidence of a threshold decision
///
/// Half confidence exactly at the crossed threshold, rising by the width of
/// the borderline band per unit of distance beyond it.
pub fn prototype_confidence(importance: Importance, similarity: f32, config: &ClassifierConfig) -> f32 {
    let band = (config.high_threshold - config.low_threshold).max(f32::EPSILON);
    let distance = match importance {
        Importance::Important => similarity - config.high_threshold,
        _ => config.low_threshold - similarity,
    };
    (0.5 + distance / band).clamp(0.0, 1.0)
}

/// Resolve an email from its similarity alone, or `None` to escalate
pub fn decide_by_similarity(
    email_id: &str,
    similarity: Option<f32>,
    config: &ClassifierConfig,
) -> Option<ClassificationResult> {
    let similarity = similarity?;
    let (importance, comparison, threshold) = if similarity >= config.high_threshold {
        (Importance::Important, "at or above", config.high_threshold)
    } else if similarity <= config.low_threshold {
        (Importance::NotImportant, "at or below", config.low_threshold)
    } else {
        return None;
    };

    let confidence = prototype_confidence(importance, similarity, config);
    Some(ClassificationResult {
        email_id: email_id.to_string(),
        importance,
        confidence,
        reasoning: format!(
            "Similarity {:.3} to the expectation prototype is {} {:.2}",
            similarity, comparison, threshold
        ),
        method: ClassificationMethod::Prototype,
        similarity: Some(similarity),
        needs_review: confidence < config.review_cutoff,
    })
}

/// Tiered classifier over injected stores and services
pub struct TieredClassifier {
    config: ClassifierConfig,
    prototypes: PrototypeBuilder,
    vectors: Arc<dyn VectorStore>,
    mail: Arc<dyn MailStore>,
    llm: Arc<dyn LlmClassifier>,
}

impl TieredClassifier {
    pub fn new(
        config: ClassifierConfig,
        prototypes: PrototypeBuilder,
        vectors: Arc<dyn VectorStore>,
        mail: Arc<dyn MailStore>,
        llm: Arc<dyn LlmClassifier>,
    ) -> Self {
        Self {
            config,
            prototypes,
            vectors,
            mail,
            llm,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    async fn require_expectation(&self, user_id: &str) -> Result<Expectation> {
        self.mail
            .active_expectation(user_id)
            .await?
            .ok_or_else(|| {
                ImpMailError::NotConfigured(format!("user {} has no active expectation", user_id))
            })
    }

    /// Classify one email and persist the decision
    pub async fn classify_email(&self, user_id: &str, email_id: &str) -> Result<ClassificationResult> {
        let expectation = self.require_expectation(user_id).await?;
        let email = self
            .mail
            .get_email(email_id)
            .await?
            .filter(|e| e.user_id == user_id)
            .ok_or_else(|| ImpMailError::EmailNotFound(email_id.to_string()))?;

        let similarity = self.similarity_for(&email, &expectation).await;
        let result = self.decide(&email, &expectation, similarity).await;
        self.mail.apply_classification(&result).await?;

        info!(
            "Classified email {} as {} via {} (confidence {:.2})",
            email.id, result.importance, result.method, result.confidence
        );
        Ok(result)
    }

    /// Cosine similarity between the email's stored vector and the prototype
    ///
    /// `None` when either side is unavailable; failures here only cost the
    /// cheap tier, so they are logged rather than returned.
    pub async fn similarity_for(&self, email: &Email, expectation: &Expectation) -> Option<f32> {
        let prototype = match self.prototypes.get_prototype(expectation).await {
            Ok(prototype) => prototype,
            Err(e) => {
                warn!("Prototype unavailable, escalating email {}: {}", email.id, e);
                return None;
            }
        };

        let ids = std::slice::from_ref(&email.id);
        match self.vectors.get_by_ids(&email.user_id, ids).await {
            Ok(mut found) => found
                .pop()
                .map(|stored| cosine_similarity(&prototype, &stored.vector)),
            Err(e) => {
                warn!("Vector lookup failed for email {}: {}", email.id, e);
                None
            }
        }
    }

    /// Run the tiers for one email without persisting anything
    pub async fn decide(
        &self,
        email: &Email,
        expectation: &Expectation,
        similarity: Option<f32>,
    ) -> ClassificationResult {
        if let Some(result) = decide_by_similarity(&email.id, similarity, &self.config) {
            debug!(
                "Email {} resolved by prototype (similarity {:.3})",
                email.id,
                similarity.unwrap_or_default()
            );
            return result;
        }

        if self.llm.is_available() {
            match self.llm.classify(email, expectation).await {
                Ok(judgment) => return self.llm_result(&email.id, judgment, similarity),
                Err(e) => warn!("LLM classification failed for email {}: {}", email.id, e),
            }
        }

        self.fallback_result(email, similarity)
    }

    /// Classify many emails, batching the LLM tier, and persist every decision
    pub async fn classify_batch(&self, user_id: &str, email_ids: &[String]) -> Result<BatchReport> {
        let expectation = self.require_expectation(user_id).await?;
        let emails: Vec<Email> = self
            .mail
            .get_emails(email_ids)
            .await?
            .into_iter()
            .filter(|e| e.user_id == user_id)
            .collect();
        if emails.is_empty() {
            return Ok(BatchReport::default());
        }

        let similarities = self.batch_similarities(&emails, &expectation).await;

        let mut resolved: HashMap<String, ClassificationResult> = HashMap::new();
        let mut remainder: Vec<Email> = Vec::new();
        for email in &emails {
            let similarity = similarities.get(&email.id).copied();
            match decide_by_similarity(&email.id, similarity, &self.config) {
                Some(result) => {
                    resolved.insert(email.id.clone(), result);
                }
                None => remainder.push(email.clone()),
            }
        }

        debug!(
            "Batch of {}: {} resolved by prototype, {} escalated",
            emails.len(),
            resolved.len(),
            remainder.len()
        );

        for result in self.escalate_batch(&remainder, &expectation, &similarities).await {
            resolved.insert(result.email_id.clone(), result);
        }

        let mut results = Vec::with_capacity(emails.len());
        for email in &emails {
            if let Some(result) = resolved.remove(&email.id) {
                self.mail.apply_classification(&result).await?;
                results.push(result);
            }
        }

        let report = BatchReport::from_results(results);
        info!(
            "Classified {} emails for user {} (prototype {}, llm {}, fallback {}, review {})",
            report.results.len(),
            user_id,
            report.prototype_count,
            report.llm_count,
            report.fallback_count,
            report.review_count
        );
        Ok(report)
    }

    async fn batch_similarities(
        &self,
        emails: &[Email],
        expectation: &Expectation,
    ) -> HashMap<String, f32> {
        let prototype = match self.prototypes.get_prototype(expectation).await {
            Ok(prototype) => prototype,
            Err(e) => {
                warn!("Prototype unavailable, escalating whole batch: {}", e);
                return HashMap::new();
            }
        };

        let ids: Vec<String> = emails.iter().map(|e| e.id.clone()).collect();
        match self.vectors.get_by_ids(&expectation.user_id, &ids).await {
            Ok(found) => found
                .into_iter()
                .map(|stored| {
                    let similarity = cosine_similarity(&prototype, &stored.vector);
                    (stored.id, similarity)
                })
                .collect(),
            Err(e) => {
                warn!("Vector lookup failed for batch: {}", e);
                HashMap::new()
            }
        }
    }

    async fn escalate_batch(
        &self,
        emails: &[Email],
        expectation: &Expectation,
        similarities: &HashMap<String, f32>,
    ) -> Vec<ClassificationResult> {
        let similarity_of = |email: &Email| similarities.get(&email.id).copied();

        if emails.is_empty() {
            return Vec::new();
        }
        if !self.llm.is_available() {
            return emails
                .iter()
                .map(|email| self.fallback_result(email, similarity_of(email)))
                .collect();
        }

        let mut results = Vec::with_capacity(emails.len());
        for (index, chunk) in emails.chunks(self.config.llm_batch_size).enumerate() {
            if index > 0 && !self.config.llm_batch_delay.is_zero() {
                tokio::time::sleep(self.config.llm_batch_delay).await;
            }

            match self.llm.classify_batch(chunk, expectation).await {
                Ok(mut judgments) => {
                    for email in chunk {
                        let result = match judgments.remove(&email.id) {
                            Some(judgment) => {
                                self.llm_result(&email.id, judgment, similarity_of(email))
                            }
                            None => {
                                warn!("LLM batch response omitted email {}", email.id);
                                self.fallback_result(email, similarity_of(email))
                            }
                        };
                        results.push(result);
                    }
                }
                Err(e) => {
                    warn!(
                        "LLM batch of {} failed, using keyword fallback: {}",
                        chunk.len(),
                        e
                    );
                    results.extend(
                        chunk
                            .iter()
                            .map(|email| self.fallback_result(email, similarity_of(email))),
                    );
                }
            }
        }
        results
    }

    fn llm_result(
        &self,
        email_id: &str,
        judgment: LlmJudgment,
        similarity: Option<f32>,
    ) -> ClassificationResult {
        ClassificationResult {
            email_id: email_id.to_string(),
            importance: judgment.importance,
            confidence: judgment.confidence,
            reasoning: judgment.reasoning,
            method: ClassificationMethod::Llm,
            similarity,
            needs_review: judgment.confidence < self.config.review_cutoff,
        }
    }

    fn fallback_result(&self, email: &Email, similarity: Option<f32>) -> ClassificationResult {
        let score = score_keywords(&email.subject, &email.content);
        ClassificationResult {
            email_id: email.id.clone(),
            importance: score.importance(),
            confidence: self.config.fallback_confidence,
            reasoning: format!(
                "Keyword heuristic: {} positive, {} negative matches",
                score.positive, score.negative
            ),
            method: ClassificationMethod::Fallback,
            similarity,
            needs_review: true,
        }
    }
}
