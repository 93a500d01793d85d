use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const POLICY_TOKEN: &str = "[REDACTED_FOR_POLICY]";

// Order matters: email before phone, so an address never leaves digits
// behind for the phone pattern to mangle.
static PII_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "email",
            Regex::new(r"\b[\w.-]+@[\w.-]+\.\w+\b").expect("email pattern"),
        ),
        (
            "ssn",
            Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn pattern"),
        ),
        (
            "phone",
            Regex::new(r"\b(?:\+?\d{1,3})?[-.\s]?(?:\d{2,4}[-.\s]?){2,4}\d{2,4}\b")
                .expect("phone pattern"),
        ),
    ]
});

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub sensitive_keyword: String,
    pub policy_max_len: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            sensitive_keyword: "confidential".to_string(),
            policy_max_len: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Redaction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RedactionReport {
    pub redactions: Vec<Redaction>,
}

impl RedactionReport {
    pub fn is_empty(&self) -> bool {
        self.redactions.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutputFilter {
    config: FilterConfig,
}

impl OutputFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// PII redaction always runs first; the policy check inspects the
    /// already-redacted text.
    pub fn apply(&self, text: &str) -> (String, RedactionReport) {
        let mut filtered = text.to_string();
        let mut redactions = Vec::new();
        for (label, pattern) in PII_PATTERNS.iter() {
            let matches: Vec<String> = pattern
                .find_iter(&filtered)
                .map(|m| m.as_str().to_string())
                .collect();
            if matches.is_empty() {
                continue;
            }
            let token = format!("[REDACTED_{}]", label.to_uppercase());
            filtered = pattern.replace_all(&filtered, token.as_str()).into_owned();
            redactions.push(Redaction {
                kind: (*label).to_string(),
                matches,
                reason: None,
            });
        }
        if filtered
            .to_lowercase()
            .contains(&self.config.sensitive_keyword)
            && filtered.len() > self.config.policy_max_len
        {
            let reason = format!(
                "{} content over {} chars",
                self.config.sensitive_keyword, self.config.policy_max_len
            );
            filtered = POLICY_TOKEN.to_string();
            redactions.push(Redaction {
                kind: "policy_block".to_string(),
                matches: Vec::new(),
                reason: Some(reason),
            });
        }
        (filtered, RedactionReport { redactions })
    }
}
