//! Thread key resolution
//!
//! Maps an email to one canonical conversation identity so ranking and digest
//! can keep a single representative per conversation, with or without a
//! provider-issued thread id.

use crate::types::Email;
use crate::utils::string::collapse_whitespace;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of stacked reply/forward prefixes stripped from a subject
const MAX_PREFIX_STRIPS: usize = 5;

const REPLY_PREFIXES: [&str; 3] = ["re:", "fwd:", "fw:"];

/// Canonical conversation identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadKey(String);

impl ThreadKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase a subject, strip leading `re:`/`fw:`/`fwd:` prefixes and collapse
/// whitespace
pub fn normalize_subject(subject: &str) -> String {
    let mut normalized = collapse_whitespace(subject).to_lowercase();
    for _ in 0..MAX_PREFIX_STRIPS {
        let stripped = REPLY_PREFIXES
            .iter()
            .find_map(|prefix| normalized.strip_prefix(prefix));
        match stripped {
            Some(rest) => normalized = rest.trim_start().to_string(),
            None => break,
        }
    }
    normalized
}

/// Resolve the thread key for an email
///
/// Precedence: provider thread id, normalized subject with sender, message
/// id, then the email id itself.
pub fn thread_key(email: &Email) -> ThreadKey {
    if let Some(thread_id) = email
        .metadata
        .thread_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    {
        return ThreadKey(format!("thread:{}", thread_id));
    }

    let subject = normalize_subject(&email.subject);
    if !subject.is_empty() {
        return ThreadKey(format!(
            "subj:{}|from:{}",
            subject,
            email.sender.trim().to_lowercase()
        ));
    }

    if let Some(message_id) = email
        .message_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    {
        return ThreadKey(format!("msg:{}", message_id));
    }

    ThreadKey(format!("email:{}", email.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EmailMetadata, Importance};
    use chrono::Utc;
    use proptest::prelude::*;

    fn email(subject: &str, sender: &str) -> Email {
        Email {
            id: "e1".to_string(),
            user_id: "u1".to_string(),
            subject: subject.to_string(),
            sender: sender.to_string(),
            content: String::new(),
            received_at: Utc::now(),
            message_id: None,
            metadata: EmailMetadata::default(),
            importance: Importance::Unclassified,
            importance_confidence: None,
            user_labeled: false,
        }
    }

    #[test]
    fn test_explicit_thread_id_wins() {
        let mut e = email("Re: Midterm", "prof@uni.edu");
        e.metadata.thread_id = Some("T1".to_string());
        e.message_id = Some("<m1@uni.edu>".to_string());
        assert_eq!(thread_key(&e).as_str(), "thread:T1");
    }

    #[test]
    fn test_reply_chain_collapses() {
        let original = email("Midterm   Deadline", "Prof@Uni.edu ");
        let reply = email("RE: Fwd: re: midterm deadline", "prof@uni.edu");
        assert_eq!(thread_key(&original), thread_key(&reply));
        assert_eq!(
            thread_key(&original).as_str(),
            "subj:midterm deadline|from:prof@uni.edu"
        );
    }

    #[test]
    fn test_at_most_five_prefixes_stripped() {
        assert_eq!(normalize_subject("re: re: re: re: re: re: hi"), "re: hi");
        assert_eq!(normalize_subject("Fw: FWD: hello"), "hello");
    }

    #[test]
    fn test_prefix_only_subject_falls_through() {
        let mut e = email("Re:", "a@b.com");
        e.message_id = Some("<m1@b.com>".to_string());
        assert_eq!(thread_key(&e).as_str(), "msg:<m1@b.com>");

        e.message_id = None;
        assert_eq!(thread_key(&e).as_str(), "email:e1");
    }

    #[test]
    fn test_blank_thread_id_ignored() {
        let mut e = email("Hello", "a@b.com");
        e.metadata.thread_id = Some("  ".to_string());
        assert_eq!(thread_key(&e).as_str(), "subj:hello|from:a@b.com");
    }

    proptest! {
        #[test]
        fn prop_thread_key_is_pure(subject in ".{0,40}", sender in "[a-z]{1,8}@[a-z]{1,8}\\.com") {
            let e = email(&subject, &sender);
            prop_assert_eq!(thread_key(&e), thread_key(&e.clone()));
        }

        #[test]
        fn prop_thread_id_overrides(subject in ".{0,40}", id in "[A-Za-z0-9]{1,16}") {
            let mut e = email(&subject, "x@y.com");
            e.metadata.thread_id = Some(id.clone());
            prop_assert_eq!(thread_key(&e).into_string(), format!("thread:{}", id));
        }
    }
}
