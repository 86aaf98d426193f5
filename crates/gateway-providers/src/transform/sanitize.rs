//! Redaction of PII-shaped substrings from upstream text.

#![allow(clippy::expect_used)]

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

static BEARER_TOKEN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bBearer\s+[A-Za-z0-9._~+/-]+=*").expect("valid regex"));

static API_KEY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(?:sk-(?:ant-|proj-)?[A-Za-z0-9_-]{20,}|AKIA[A-Z0-9]{16}|(?:api[_-]?key|apikey|secret[_-]?key|access[_-]?token)["']?\s*[=:]\s*["']?[A-Za-z0-9_\-]{16,}["']?)"#,
    )
    .expect("valid regex")
});

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}\b").expect("valid regex")
});

static CREDIT_CARD_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:4[0-9]{3}|5[1-5][0-9]{2}|6(?:011|5[0-9]{2})|3[47][0-9]{2})[- ]?[0-9]{4}[- ]?[0-9]{4}[- ]?[0-9]{1,4}\b")
        .expect("valid regex")
});

static SSN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[0-9]{3}-[0-9]{2}-[0-9]{4}\b").expect("valid regex"));

/// Replace emails, card numbers, SSNs, bearer tokens and API keys with placeholders.
///
/// Borrows the input when nothing matched.
pub fn redact_pii(text: &str) -> Cow<'_, str> {
    let patterns: [(&Lazy<Regex>, &str); 5] = [
        (&BEARER_TOKEN_REGEX, "[BEARER_TOKEN]"),
        (&API_KEY_REGEX, "[API_KEY]"),
        (&EMAIL_REGEX, "[EMAIL]"),
        (&CREDIT_CARD_REGEX, "[CREDIT_CARD]"),
        (&SSN_REGEX, "[SSN]"),
    ];

    let mut result = Cow::Borrowed(text);
    for (regex, placeholder) in patterns {
        if regex.is_match(&result) {
            result = Cow::Owned(regex.replace_all(&result, placeholder).into_owned());
        }
    }
    result
}
