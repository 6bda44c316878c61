//! Common test utilities and helpers

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use impmail_core::{
    services::{DisabledLlmClassifier, LlmClassifier},
    types::{EmailMetadata, LlmJudgment},
    Email, EmbeddingGateway, Expectation, ExpectationExamples, ImpMail, ImpMailConfig,
    ImpMailError, Importance, MemoryMailStore, MemoryVectorStore, Result,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Unit vector whose cosine with `[1, 0]` is exactly `s`
pub fn at_similarity(s: f32) -> Vec<f32> {
    vec![s, (1.0 - s * s).max(0.0).sqrt()]
}

/// Gateway that maps the first line of the text to a fixed vector
///
/// Prototype text starts with the expectation title and email text with the
/// subject, so tests script both by that line.
pub struct ScriptedGateway {
    vectors: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            vectors: HashMap::new(),
            fallback: at_similarity(0.0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, first_line: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(first_line.to_string(), vector);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingGateway for ScriptedGateway {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let first_line = text.lines().next().unwrap_or_default().trim();
        Ok(self
            .vectors
            .get(first_line)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }

    fn model_name(&self) -> &str {
        "scripted-test"
    }

    fn dimensions(&self) -> usize {
        2
    }
}

/// LLM classifier returning one fixed judgment and counting calls
pub struct StubLlm {
    judgment: LlmJudgment,
    omit: Vec<String>,
    pub single_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
}

impl StubLlm {
    pub fn new(importance: Importance, confidence: f32) -> Self {
        Self {
            judgment: LlmJudgment {
                importance,
                confidence,
                reasoning: "stub judgment".to_string(),
            },
            omit: Vec::new(),
            single_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
        }
    }

    /// Leave these ids out of batch responses
    pub fn omitting(mut self, ids: &[&str]) -> Self {
        self.omit = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn total_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst) + self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClassifier for StubLlm {
    fn is_available(&self) -> bool {
        true
    }

    async fn classify(&self, _email: &Email, _expectation: &Expectation) -> Result<LlmJudgment> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.judgment.clone())
    }

    async fn classify_batch(
        &self,
        emails: &[Email],
        _expectation: &Expectation,
    ) -> Result<HashMap<String, LlmJudgment>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(emails
            .iter()
            .filter(|e| !self.omit.contains(&e.id))
            .map(|e| (e.id.clone(), self.judgment.clone()))
            .collect())
    }
}

/// LLM classifier that is available but always fails
pub struct FailingLlm;

#[async_trait]
impl LlmClassifier for FailingLlm {
    fn is_available(&self) -> bool {
        true
    }

    async fn classify(&self, _email: &Email, _expectation: &Expectation) -> Result<LlmJudgment> {
        Err(ImpMailError::LlmApi("upstream unavailable".to_string()))
    }

    async fn classify_batch(
        &self,
        _emails: &[Email],
        _expectation: &Expectation,
    ) -> Result<HashMap<String, LlmJudgment>> {
        Err(ImpMailError::LlmApi("upstream unavailable".to_string()))
    }
}

pub const USER: &str = "alice";

/// Email for `USER` received `minutes_ago` before `now`
pub fn email_at(id: &str, subject: &str, content: &str, now: DateTime<Utc>, minutes_ago: i64) -> Email {
    Email {
        id: id.to_string(),
        user_id: USER.to_string(),
        subject: subject.to_string(),
        sender: "sender@example.com".to_string(),
        content: content.to_string(),
        received_at: now - Duration::minutes(minutes_ago),
        message_id: None,
        metadata: EmailMetadata::default(),
        importance: Importance::Unclassified,
        importance_confidence: None,
        user_labeled: false,
    }
}

pub fn email(id: &str, subject: &str, content: &str) -> Email {
    email_at(id, subject, content, Utc::now(), 0)
}

/// Put an email in an explicit provider thread
pub fn in_thread(mut email: Email, thread_id: &str) -> Email {
    email.metadata.thread_id = Some(thread_id.to_string());
    email
}

pub fn academic_expectation() -> Expectation {
    Expectation::new(
        USER,
        "Academic",
        "deadlines and grades",
        ExpectationExamples {
            important: vec!["midterm deadline".to_string()],
            not_important: vec!["party invite".to_string()],
        },
    )
}

/// Configuration with no LLM pacing delay
pub fn test_config() -> ImpMailConfig {
    let mut config = ImpMailConfig::default();
    config.classifier.llm_batch_delay = std::time::Duration::ZERO;
    config
}

pub struct TestApp {
    pub app: ImpMail,
    pub gateway: Arc<ScriptedGateway>,
    pub mail: Arc<MemoryMailStore>,
}

/// Wire the engine around in-memory stores and a scripted gateway
pub async fn build_app(
    gateway: ScriptedGateway,
    emails: Vec<Email>,
    llm: Option<Arc<dyn LlmClassifier>>,
    config: ImpMailConfig,
) -> TestApp {
    let gateway = Arc::new(gateway);
    let mail = Arc::new(MemoryMailStore::new());
    mail.seed(emails).await;

    let llm: Arc<dyn LlmClassifier> = match llm {
        Some(llm) => llm,
        None => Arc::new(DisabledLlmClassifier),
    };

    let app = ImpMail::with_parts(
        config,
        gateway.clone(),
        Arc::new(MemoryVectorStore::default()),
        mail.clone(),
        llm,
    );
    TestApp { app, gateway, mail }
}
