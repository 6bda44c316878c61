//! LLM importance classifier
//!
//! Asks Claude whether an email matches a user's stated expectation. Email
//! text is PII-scrubbed and truncated before it leaves the process; any reply
//! that does not parse into a judgment is an error, which the tiered
//! classifier absorbs by falling back to keywords.

use crate::config::LlmConfig;
use crate::error::{ImpMailError, Result};
use crate::types::{Email, Expectation, Importance, LlmJudgment};
use crate::utils::string::{collapse_whitespace, truncate_with_ellipsis};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?\d{1,3}[\s.-]?)?(?:\(\d{3}\)|\d{3})[\s.-]?\d{3}[\s.-]?\d{4}\b").unwrap()
});

/// External judgment operation used by the tiered classifier
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClassifier: Send + Sync {
    /// Whether calls can be attempted at all (configured and enabled)
    fn is_available(&self) -> bool;

    /// Judge one email against the expectation
    async fn classify(
        &self,
        email: &Email,
        expectation: &crate::types::Expectation,
    ) -> Result<LlmJudgment>;

    /// Judge several emails in one call, keyed by email id
    ///
    /// Emails absent from the returned map were not judged.
    async fn classify_batch(
        &self,
        emails: &[Email],
        expectation: &crate::types::Expectation,
    ) -> Result<HashMap<String, LlmJudgment>>;
}

/// Classifier that is never available
///
/// Stands in when no API key is configured or the LLM tier is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledLlmClassifier;

#[async_trait]
impl LlmClassifier for DisabledLlmClassifier {
    fn is_available(&self) -> bool {
        false
    }

    async fn classify(&self, _email: &Email, _expectation: &Expectation) -> Result<LlmJudgment> {
        Err(ImpMailError::LlmApi("LLM classifier is disabled".to_string()))
    }

    async fn classify_batch(
        &self,
        _emails: &[Email],
        _expectation: &Expectation,
    ) -> Result<HashMap<String, LlmJudgment>> {
        Err(ImpMailError::LlmApi("LLM classifier is disabled".to_string()))
    }
}

/// Anthropic Messages API classifier
pub struct AnthropicClassifier {
    config: LlmConfig,
    client: reqwest::Client,
}

/// Anthropic API message format
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: usize,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// Anthropic API response format
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    text: String,
}

#[derive(Debug, Deserialize)]
struct RawJudgment {
    #[serde(default)]
    email_id: Option<String>,
    importance: String,
    confidence: f32,
    #[serde(default)]
    reasoning: String,
}

impl RawJudgment {
    fn into_judgment(self) -> Result<LlmJudgment> {
        let importance = match Importance::parse_label(&self.importance) {
            Some(label @ (Importance::Important | Importance::NotImportant)) => label,
            _ => {
                return Err(ImpMailError::LlmApi(format!(
                    "Unexpected importance label: {}",
                    self.importance
                )))
            }
        };

        if !self.confidence.is_finite() {
            return Err(ImpMailError::LlmApi("Confidence is not a number".to_string()));
        }

        Ok(LlmJudgment {
            importance,
            confidence: self.confidence.clamp(0.0, 1.0),
            reasoning: self.reasoning.trim().to_string(),
        })
    }
}

impl AnthropicClassifier {
    /// Create a classifier; fails without an API key
    pub fn new(config: LlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(ImpMailError::NotConfigured(
                "LLM API key is not set".to_string(),
            ));
        }

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn render_email(&self, email: &Email) -> String {
        let body = truncate_with_ellipsis(
            &collapse_whitespace(&scrub_pii(&email.content)),
            self.config.max_body_chars,
        );
        format!(
            "From: {}\nSubject: {}\nBody: {}",
            scrub_pii(&email.sender),
            scrub_pii(&email.subject),
            body
        )
    }

    fn single_prompt(&self, email: &Email, expectation: &Expectation) -> String {
        format!(
            r#"{}

Decide whether this email is important to the user.

{}

Respond with ONLY a JSON object:
{{"importance": "important" | "not_important", "confidence": <0.0-1.0>, "reasoning": "<one sentence>"}}"#,
            render_expectation(expectation),
            self.render_email(email)
        )
    }

    fn batch_prompt(&self, emails: &[Email], expectation: &Expectation) -> String {
        let rendered: Vec<String> = emails
            .iter()
            .map(|email| format!("[email_id: {}]\n{}", email.id, self.render_email(email)))
            .collect();

        format!(
            r#"{}

Decide for each email below whether it is important to the user.

{}

Respond with ONLY a JSON array, one object per email:
[{{"email_id": "<id>", "importance": "important" | "not_important", "confidence": <0.0-1.0>, "reasoning": "<one sentence>"}}]"#,
            render_expectation(expectation),
            rendered.join("\n\n---\n\n")
        )
    }

    /// Make an API call to Claude
    async fn call_api(&self, prompt: &str) -> Result<String> {
        debug!("Calling Anthropic API (model: {})", self.config.model);

        let request = AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(format!(
                "{}/messages",
                self.config.base_url.trim_end_matches('/')
            ))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ImpMailError::LlmApi(format!(
                "API request failed with status {}: {}",
                status, error_text
            )));
        }

        let api_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ImpMailError::LlmApi(format!("Failed to parse response: {}", e)))?;

        api_response
            .content
            .first()
            .map(|c| c.text.clone())
            .ok_or_else(|| ImpMailError::LlmApi("Empty response from API".to_string()))
    }
}

#[async_trait]
impl LlmClassifier for AnthropicClassifier {
    fn is_available(&self) -> bool {
        self.config.enabled && !self.config.api_key.is_empty()
    }

    async fn classify(&self, email: &Email, expectation: &Expectation) -> Result<LlmJudgment> {
        let response = self
            .call_api(&self.single_prompt(email, expectation))
            .await?;
        parse_judgment(&response)
    }

    async fn classify_batch(
        &self,
        emails: &[Email],
        expectation: &Expectation,
    ) -> Result<HashMap<String, LlmJudgment>> {
        if emails.is_empty() {
            return Ok(HashMap::new());
        }

        let response = self
            .call_api(&self.batch_prompt(emails, expectation))
            .await?;
        let judgments = parse_batch_judgments(&response)?;
        debug!(
            "LLM judged {} of {} emails in batch",
            judgments.len(),
            emails.len()
        );
        Ok(judgments)
    }
}

fn render_expectation(expectation: &Expectation) -> String {
    let mut out = format!(
        "The user's importance criteria:\nTitle: {}\nDescription: {}",
        expectation.title, expectation.description
    );
    if !expectation.examples.important.is_empty() {
        out.push_str("\nImportant examples:");
        for example in &expectation.examples.important {
            out.push_str(&format!("\n- {}", example));
        }
    }
    if !expectation.examples.not_important.is_empty() {
        out.push_str("\nNot important examples:");
        for example in &expectation.examples.not_important {
            out.push_str(&format!("\n- {}", example));
        }
    }
    out
}

/// Replace email addresses and phone numbers with placeholders
pub fn scrub_pii(text: &str) -> String {
    let text = EMAIL_RE.replace_all(text, "[email]");
    PHONE_RE.replace_all(&text, "[phone]").into_owned()
}

/// Slice out the JSON payload, tolerating code fences and surrounding prose
fn extract_json(response: &str, open: char, close: char) -> Result<&str> {
    let start = response.find(open);
    let end = response.rfind(close);
    match (start, end) {
        (Some(start), Some(end)) if start < end => Ok(&response[start..=end]),
        _ => Err(ImpMailError::LlmApi(format!(
            "No JSON payload in response: {}",
            truncate_with_ellipsis(response, 200)
        ))),
    }
}

fn parse_judgment(response: &str) -> Result<LlmJudgment> {
    let raw: RawJudgment = serde_json::from_str(extract_json(response, '{', '}')?)
        .map_err(|e| ImpMailError::LlmApi(format!("Malformed judgment: {}", e)))?;
    raw.into_judgment()
}

fn parse_batch_judgments(response: &str) -> Result<HashMap<String, LlmJudgment>> {
    let raw: Vec<RawJudgment> = serde_json::from_str(extract_json(response, '[', ']')?)
        .map_err(|e| ImpMailError::LlmApi(format!("Malformed batch judgment: {}", e)))?;

    let mut judgments = HashMap::with_capacity(raw.len());
    for item in raw {
        // Items without an id cannot be matched back to an email
        let Some(email_id) = item.email_id.clone() else {
            continue;
        };
        if let Ok(judgment) = item.into_judgment() {
            judgments.insert(email_id, judgment);
        }
    }
    Ok(judgments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExpectationExamples;
    use chrono::Utc;

    fn test_config() -> LlmConfig {
        LlmConfig {
            api_key: "test-key".to_string(),
            max_body_chars: 20,
            ..LlmConfig::default()
        }
    }

    fn test_email() -> Email {
        Email {
            id: "e1".to_string(),
            user_id: "u1".to_string(),
            subject: "Call me at 555-123-4567".to_string(),
            sender: "Prof. Smith <smith@uni.edu>".to_string(),
            content: "Reach me at smith@uni.edu about the midterm deadline next week please"
                .to_string(),
            received_at: Utc::now(),
            message_id: None,
            metadata: Default::default(),
            importance: Importance::Unclassified,
            importance_confidence: None,
            user_labeled: false,
        }
    }

    #[test]
    fn test_scrub_pii() {
        let scrubbed = scrub_pii("mail bob@example.com or call (555) 123-4567");
        assert_eq!(scrubbed, "mail [email] or call [phone]");
    }

    #[test]
    fn test_prompt_is_scrubbed_and_truncated() {
        let classifier = AnthropicClassifier::new(test_config()).unwrap();
        let expectation = Expectation::new(
            "u1",
            "Academic",
            "deadlines and grades",
            ExpectationExamples {
                important: vec!["midterm deadline".to_string()],
                not_important: vec!["party invite".to_string()],
            },
        );

        let prompt = classifier.single_prompt(&test_email(), &expectation);
        assert!(!prompt.contains("smith@uni.edu"));
        assert!(!prompt.contains("555-123-4567"));
        assert!(prompt.contains("Body: Reach me at [email] ..."));
        assert!(prompt.contains("- party invite"));
    }

    #[test]
    fn test_parse_judgment_with_code_fence() {
        let response = "```json\n{\"importance\": \"important\", \"confidence\": 0.82, \"reasoning\": \"Deadline.\"}\n```";
        let judgment = parse_judgment(response).unwrap();
        assert_eq!(judgment.importance, Importance::Important);
        assert!((judgment.confidence - 0.82).abs() < 1e-6);
        assert_eq!(judgment.reasoning, "Deadline.");
    }

    #[test]
    fn test_parse_judgment_clamps_confidence() {
        let judgment =
            parse_judgment(r#"{"importance": "not important", "confidence": 1.7}"#).unwrap();
        assert_eq!(judgment.importance, Importance::NotImportant);
        assert_eq!(judgment.confidence, 1.0);
    }

    #[test]
    fn test_parse_judgment_rejects_malformed() {
        assert!(parse_judgment("I think it's important").is_err());
        assert!(parse_judgment(r#"{"importance": "maybe", "confidence": 0.5}"#).is_err());
        assert!(parse_judgment(r#"{"importance": "unclassified", "confidence": 0.5}"#).is_err());
        assert!(parse_judgment(r#"{"confidence": 0.5}"#).is_err());
    }

    #[test]
    fn test_parse_batch_skips_unmatched_items() {
        let response = r#"Here you go:
[
  {"email_id": "e1", "importance": "important", "confidence": 0.9, "reasoning": "a"},
  {"importance": "important", "confidence": 0.9},
  {"email_id": "e3", "importance": "bogus", "confidence": 0.9},
  {"email_id": "e4", "importance": "not_important", "confidence": 0.4}
]"#;
        let judgments = parse_batch_judgments(response).unwrap();
        assert_eq!(judgments.len(), 2);
        assert_eq!(judgments["e1"].importance, Importance::Important);
        assert_eq!(judgments["e4"].importance, Importance::NotImportant);
    }

    #[test]
    fn test_availability() {
        assert!(AnthropicClassifier::new(test_config()).unwrap().is_available());

        let disabled = LlmConfig {
            enabled: false,
            ..test_config()
        };
        assert!(!AnthropicClassifier::new(disabled).unwrap().is_available());

        let missing_key = LlmConfig {
            api_key: String::new(),
            ..test_config()
        };
        assert!(AnthropicClassifier::new(missing_key).is_err());
        assert!(!DisabledLlmClassifier.is_available());
    }
}
