//! Shared helpers for the QuickSite pipeline: log redaction, display
//! truncation, and HTTP response/path utilities.

use once_cell::sync::Lazy;
use regex::Regex;

pub mod http;

static REDACTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization: bearer )([\w\-\.=:/+]+)",
        r"(?i)(authorization: )([\w\-\.=:/+]+)",
        r"(?i)([A-Z0-9_]*?(KEY|TOKEN|SECRET|PASSWORD))=([^\s]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("redaction pattern compiles"))
    .collect()
});

/// Redacts values that look like secrets in a string.
///
/// Applied to every raw request/response line before it reaches a log sink
/// or the terminal.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for re in REDACTION_PATTERNS.iter() {
        redacted = re
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}<redacted>", prefix)
            })
            .to_string();
    }
    redacted
}

/// Truncate text to `max_len` characters, appending an ellipsis when cut.
///
/// Operates on characters, not bytes, so multi-byte content never splits.
pub fn truncate_chars(text: &str, max_len: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_len {
        return trimmed.to_string();
    }

    let target_len = max_len.saturating_sub(3);
    let mut truncated = String::new();
    for (idx, ch) in trimmed.chars().enumerate() {
        if idx >= target_len {
            break;
        }
        truncated.push(ch);
    }
    format!("{}...", truncated.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_bearer_tokens() {
        let line = "Authorization: Bearer qs_live_abc123.def";
        let redacted = redact_sensitive(line);
        assert!(!redacted.contains("qs_live_abc123"), "token must not survive: {redacted}");
        assert!(redacted.contains("<redacted>"));
    }

    #[test]
    fn redacts_env_style_secrets() {
        let redacted = redact_sensitive("QUICKSITE_API_TOKEN=supersecret other=ok");
        assert!(redacted.contains("QUICKSITE_API_TOKEN=<redacted>"));
        assert!(redacted.contains("other=ok"));
    }

    #[test]
    fn truncate_trims_and_truncates() {
        assert_eq!(truncate_chars(" short message ", 20), "short message");
        assert_eq!(truncate_chars("abcdefghij", 5), "ab...");
    }

    #[test]
    fn truncate_handles_multibyte() {
        let text = "café résumé naïveté over and over again";
        let out = truncate_chars(text, 10);
        assert!(out.ends_with("..."));
        assert!(out.chars().count() <= 10);
    }
}
