//! String utility functions for safe UTF-8 text manipulation

/// Keep at most `max_chars` characters, cutting on a character boundary.
///
/// Used where overlong input is silently shortened before an upstream call.
///
/// # Examples
/// ```
/// use impmail_core::utils::string::truncate_chars;
///
/// assert_eq!(truncate_chars("hello world", 5), "hello");
/// assert_eq!(truncate_chars("héllo", 2), "hé");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// Truncate at a character boundary, appending an ellipsis if anything was cut.
///
/// # Examples
/// ```
/// use impmail_core::utils::string::truncate_with_ellipsis;
///
/// assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
/// assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
/// ```
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    let truncated = truncate_chars(s, max_chars);
    if truncated.len() == s.len() {
        s.to_string()
    } else {
        format!("{}...", truncated)
    }
}

/// Collapse runs of whitespace into single spaces and trim the ends
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_input_untouched() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 5), "hello");
        assert_eq!(truncate_chars("", 5), "");
    }

    #[test]
    fn test_truncate_multibyte() {
        // '→' is 3 bytes in UTF-8
        let text = "Phase 4.1→4.2 complete";
        assert_eq!(truncate_chars(text, 10), "Phase 4.1→");
        assert_eq!(truncate_with_ellipsis(text, 10), "Phase 4.1→...");
    }

    #[test]
    fn test_truncate_emoji() {
        assert_eq!(truncate_with_ellipsis("🎉🎊🎈🎁🎀", 2), "🎉🎊...");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  weekly \t status\n report "), "weekly status report");
        assert_eq!(collapse_whitespace("   "), "");
    }
}
