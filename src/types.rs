//! Core data types for the impmail engine
//!
//! This module defines the records that flow between the email source, the
//! stores and the classification/ranking components: emails, expectations,
//! classification results, preferences and digest records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Importance label carried by an email row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Important,
    NotImportant,
    #[default]
    Unclassified,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Important => "important",
            Importance::NotImportant => "not_important",
            Importance::Unclassified => "unclassified",
        }
    }

    /// Parse a label as an LLM or a user would write it
    pub fn parse_label(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "important" => Some(Importance::Important),
            "not_important" | "unimportant" => Some(Importance::NotImportant),
            "unclassified" => Some(Importance::Unclassified),
            _ => None,
        }
    }
}

impl std::fmt::Display for Importance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-supplied metadata attached to an email
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMetadata {
    /// Provider conversation id (e.g. Gmail threadId)
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// A parsed email as handed over by the email source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub id: String,
    pub user_id: String,
    pub subject: String,
    pub sender: String,
    pub content: String,
    pub received_at: DateTime<Utc>,

    /// RFC 5322 Message-ID, when the source provides one
    #[serde(default)]
    pub message_id: Option<String>,

    #[serde(default)]
    pub metadata: EmailMetadata,

    #[serde(default)]
    pub importance: Importance,

    #[serde(default)]
    pub importance_confidence: Option<f32>,

    /// Sticky flag set only by the manual labeling path
    #[serde(default)]
    pub user_labeled: bool,
}

impl Email {
    /// Text used to embed this email
    pub fn embedding_text(&self) -> String {
        format!("{}\n\n{}", self.subject.trim(), self.content.trim())
            .trim()
            .to_string()
    }
}

/// Canonical example lists attached to an expectation
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectationExamples {
    #[serde(default)]
    pub important: Vec<String>,
    #[serde(default)]
    pub not_important: Vec<String>,
}

/// A user's stated importance criteria
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expectation {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub examples: ExpectationExamples,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Expectation {
    /// Create a new active expectation
    pub fn new(
        user_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        examples: ExpectationExamples,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            title: title.into(),
            description: description.into(),
            examples,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Which tier produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    Prototype,
    Llm,
    Fallback,
}

impl std::fmt::Display for ClassificationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassificationMethod::Prototype => write!(f, "prototype"),
            ClassificationMethod::Llm => write!(f, "llm"),
            ClassificationMethod::Fallback => write!(f, "fallback"),
        }
    }
}

/// Terminal decision for one email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub email_id: String,
    pub importance: Importance,
    pub confidence: f32,
    pub reasoning: String,
    pub method: ClassificationMethod,

    /// Cosine similarity to the prototype, when a vector was available
    pub similarity: Option<f32>,

    pub needs_review: bool,
}

/// Judgment returned by the LLM classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmJudgment {
    pub importance: Importance,
    pub confidence: f32,
    pub reasoning: String,
}

/// Explicit like/dislike selections for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    pub user_id: String,
    pub liked_email_ids: Vec<String>,
    pub disliked_email_ids: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Dual centroids derived from a user's preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPrototypes {
    pub liked_centroid: Vec<f32>,
    pub disliked_centroid: Vec<f32>,
    pub liked_count: usize,
    pub disliked_count: usize,
}

/// Preference score for one email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceScore {
    pub email_id: String,
    pub liked_similarity: f32,
    pub disliked_similarity: f32,
    pub margin: f32,
    pub label: Importance,
}

/// One ranked email in a browsing view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredEmail {
    pub email_id: String,
    pub thread_key: String,
    pub subject: String,
    pub sender: String,
    pub received_at: DateTime<Utc>,

    /// Similarity (or distance, for outliers); None when the email has no vector
    pub score: Option<f32>,
}

/// One thread selected for a digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestItem {
    pub email_id: String,
    pub subject: String,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub similarity: f32,
}

/// Persisted record of a sent digest; its `sent_at` is the user's watermark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestLog {
    pub id: Uuid,
    pub user_id: String,
    pub sent_at: DateTime<Utc>,
    pub thread_count: usize,
    pub email_ids: Vec<String>,
}

/// Per-user indexing status used as an advisory lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_importance_parse_label() {
        assert_eq!(Importance::parse_label("important"), Some(Importance::Important));
        assert_eq!(
            Importance::parse_label("Not Important"),
            Some(Importance::NotImportant)
        );
        assert_eq!(
            Importance::parse_label("not-important"),
            Some(Importance::NotImportant)
        );
        assert_eq!(Importance::parse_label("maybe"), None);
    }

    #[test]
    fn test_importance_serialization() {
        let json = serde_json::to_string(&Importance::NotImportant).unwrap();
        assert_eq!(json, "\"not_important\"");
    }

    #[test]
    fn test_email_deserializes_with_defaults() {
        let email: Email = serde_json::from_str(
            r#"{
                "id": "e1",
                "userId": "u1",
                "subject": "Hello",
                "sender": "a@example.com",
                "content": "Body",
                "receivedAt": "2026-01-05T10:00:00Z",
                "metadata": {"threadId": "T1"}
            }"#,
        )
        .unwrap();

        assert_eq!(email.metadata.thread_id.as_deref(), Some("T1"));
        assert_eq!(email.importance, Importance::Unclassified);
        assert!(!email.user_labeled);
        assert_eq!(email.embedding_text(), "Hello\n\nBody");
    }
}
