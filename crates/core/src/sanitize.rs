use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

pub const URL_TOKEN: &str = "[REDACTED_URL]";

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").expect("url pattern"));

static INJECTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)ignore (previous|all) instructions",
        r"(?i)do not follow (the )?system",
        r"(?i)follow these new instructions",
        r"(?i)execute the following",
        r"(?i)reveal (the |your )?system prompt",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("injection pattern"))
    .collect()
});

pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out.trim().to_string()
}

/// Strips control characters, redacts URLs, and collapses whitespace runs.
/// The result is what gets hashed, retrieved against, and audited.
pub fn sanitize(text: &str) -> String {
    let stripped: String = text
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect();
    let redacted = URL_PATTERN.replace_all(&stripped, URL_TOKEN);
    collapse_whitespace(&redacted)
}

/// Heuristic gate over known jailbreak phrasings. False negatives are
/// expected; callers must treat a `false` as "not obviously hostile",
/// not as safe.
pub fn detect_injection(text: &str) -> bool {
    INJECTION_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(text))
}

pub fn input_hash(sanitized: &str) -> String {
    hex::encode(Sha256::digest(sanitized.as_bytes()))
}
