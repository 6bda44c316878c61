//! Keyword fallback heuristic
//!
//! Last tier of the classifier: counts fixed positive and negative keywords in
//! `subject + content`. Cheap and always available, so it is always flagged
//! for review.

use crate::types::Importance;
use once_cell::sync::Lazy;
use regex::Regex;

/// Keywords suggesting the email needs attention
pub const POSITIVE_KEYWORDS: &[&str] = &[
    "urgent",
    "important",
    "asap",
    "deadline",
    "due",
    "action required",
    "response required",
    "exam",
    "midterm",
    "final",
    "grade",
    "grades",
    "assignment",
    "interview",
    "offer",
    "invoice",
    "payment",
    "overdue",
    "security alert",
    "password",
    "verify",
    "meeting",
    "schedule",
    "reminder",
];

/// Keywords suggesting bulk or social mail
pub const NEGATIVE_KEYWORDS: &[&str] = &[
    "newsletter",
    "unsubscribe",
    "promotion",
    "promo",
    "sale",
    "discount",
    "deal",
    "coupon",
    "party",
    "invite",
    "invitation",
    "social",
    "webinar",
    "digest",
    "sponsored",
    "advertisement",
    "no-reply",
    "noreply",
];

static POSITIVE_RE: Lazy<Regex> = Lazy::new(|| keyword_regex(POSITIVE_KEYWORDS));
static NEGATIVE_RE: Lazy<Regex> = Lazy::new(|| keyword_regex(NEGATIVE_KEYWORDS));

fn keyword_regex(keywords: &[&str]) -> Regex {
    let alternation = keywords
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).unwrap()
}

/// Positive and negative keyword hit counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeywordScore {
    pub positive: usize,
    pub negative: usize,
}

impl KeywordScore {
    /// `Important` only when positive hits outnumber negative ones
    pub fn importance(&self) -> Importance {
        if self.positive > self.negative {
            Importance::Important
        } else {
            Importance::NotImportant
        }
    }
}

/// Scan subject and content for keywords
pub fn score_keywords(subject: &str, content: &str) -> KeywordScore {
    let text = format!("{} {}", subject, content);
    KeywordScore {
        positive: POSITIVE_RE.find_iter(&text).count(),
        negative: NEGATIVE_RE.find_iter(&text).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_outweighs_negative() {
        let score = score_keywords("URGENT: midterm deadline", "Assignment due Friday");
        assert!(score.positive >= 4);
        assert_eq!(score.negative, 0);
        assert_eq!(score.importance(), Importance::Important);
    }

    #[test]
    fn test_negative_and_ties_are_not_important() {
        let score = score_keywords("Party invite", "Join us this weekend");
        assert_eq!(score.positive, 0);
        assert_eq!(score.negative, 2);
        assert_eq!(score.importance(), Importance::NotImportant);

        let tie = score_keywords("Meeting", "newsletter");
        assert_eq!(tie, KeywordScore { positive: 1, negative: 1 });
        assert_eq!(tie.importance(), Importance::NotImportant);

        assert_eq!(score_keywords("", "").importance(), Importance::NotImportant);
    }

    #[test]
    fn test_whole_words_only() {
        // "residue" contains "due", "parties" is not "party"
        let score = score_keywords("residue report", "parties");
        assert_eq!(score, KeywordScore::default());
    }

    #[test]
    fn test_adjacent_keywords_both_counted() {
        let score = score_keywords("sale promo", "");
        assert_eq!(score.negative, 2);
    }
}
