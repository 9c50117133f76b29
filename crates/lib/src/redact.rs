//! PII redaction for text handed to the language model.
//!
//! Applied to every message body and feedback description before it is placed into an
//! analysis context. Patterns run in a fixed order: national id (CPF) first, then e-mail,
//! then phone numbers, so an 11-digit CPF is never tagged as a phone number.

use regex::Regex;
use std::sync::LazyLock;

pub const CPF_PLACEHOLDER: &str = "[CPF REDACTED]";
pub const EMAIL_PLACEHOLDER: &str = "[EMAIL REDACTED]";
pub const PHONE_PLACEHOLDER: &str = "[PHONE REDACTED]";

static CPF_PATTERN: LazyLock<Regex> = LazyLock::new(|| pattern(r"\d{3}\.?\d{3}\.?\d{3}-?\d{2}"));
static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}"));
static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"\(?\d{2}\)?\s?\d{4,5}-?\d{4}"));

fn pattern(re: &str) -> Regex {
    Regex::new(re).unwrap_or_else(|e| panic!("invalid redaction pattern {}: {}", re, e))
}

/// Replace CPF-like digit groups, e-mail addresses and phone numbers with placeholders.
/// Everything else in the text is left untouched.
pub fn redact(text: &str) -> String {
    let text = CPF_PATTERN.replace_all(text, CPF_PLACEHOLDER);
    let text = EMAIL_PATTERN.replace_all(&text, EMAIL_PLACEHOLDER);
    let text = PHONE_PATTERN.replace_all(&text, PHONE_PLACEHOLDER);
    text.into_owned()
}
