//! Pattern-based moderation for chat input and model output.
//!
//! A blocked match short-circuits with the refusal message. Suspicious
//! matches are reported so the caller can log them, but the text still goes
//! through.

use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_REFUSAL: &str = "I can't help with that one. Let's keep the focus on building your venture. What are you working on right now?";

const BLOCKED_PATTERNS: &[(&str, &str)] = &[
    (
        "self_harm",
        r"\b(kill|hurt|harm|cut)\s+(myself|yourself)\b|\bsuicid(e|al)\b|\bself[- ]?harm\b",
    ),
    (
        "violence",
        r"\b(make|build|assemble)\s+(a\s+|an\s+)?(bomb|explosive|pipe\s*bomb|gun|weapon)s?\b|\bshoot\s+up\b",
    ),
    (
        "sexual",
        r"\b(porn\w*|nudes?|sexting|explicit\s+sex\w*)\b",
    ),
    ("hate", r"\b(heil\s+hitler|white\s+power|ethnic\s+cleansing)\b"),
    (
        "drugs",
        r"\b(buy|sell|make|cook)\s+(some\s+)?(meth|cocaine|heroin|fentanyl|drugs)\b",
    ),
    (
        "prompt_injection",
        r"\bignore\s+(all\s+)?(the\s+|your\s+)?(previous|prior|above|earlier)\s+(instructions|prompts?|rules)\b|\breveal\s+(your\s+|the\s+)?system\s+prompt\b",
    ),
];

const SUSPICIOUS_PATTERNS: &[(&str, &str)] = &[
    ("contact_email", r"\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b"),
    ("contact_phone", r"(\+\d{1,3}[\s.-]?)?\(?\d{3}\)?[\s.-]\d{3}[\s.-]\d{4}\b"),
    ("external_link", r"\bhttps?://\S+|\bwww\.\S+"),
    (
        "role_play",
        r"\b(pretend|act)\s+(to\s+be|you\s+are|as\s+if|like\s+you)\b|\bjailbreak\w*\b",
    ),
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModerationError {
    #[error("Invalid moderation pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

#[derive(Debug, Clone)]
struct Rule {
    category: String,
    regex: Regex,
}

impl Rule {
    fn compile(category: &str, pattern: &str) -> Result<Self, ModerationError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| ModerationError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            category: category.to_string(),
            regex,
        })
    }
}

lazy_static! {
    static ref DEFAULT_BLOCKED: Vec<Rule> = BLOCKED_PATTERNS
        .iter()
        .map(|(category, pattern)| Rule::compile(category, pattern).unwrap())
        .collect();
    static ref DEFAULT_SUSPICIOUS: Vec<Rule> = SUSPICIOUS_PATTERNS
        .iter()
        .map(|(category, pattern)| Rule::compile(category, pattern).unwrap())
        .collect();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ModerationVerdict {
    Allowed,
    Suspicious { categories: Vec<String> },
    Blocked { category: String },
}

impl ModerationVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, ModerationVerdict::Blocked { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ModerationVerdict::Allowed => "allowed",
            ModerationVerdict::Suspicious { .. } => "suspicious",
            ModerationVerdict::Blocked { .. } => "blocked",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentFilter {
    blocked: Vec<Rule>,
    suspicious: Vec<Rule>,
    refusal: String,
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self {
            blocked: DEFAULT_BLOCKED.clone(),
            suspicious: DEFAULT_SUSPICIOUS.clone(),
            refusal: DEFAULT_REFUSAL.to_string(),
        }
    }
}

impl ContentFilter {
    /// Default rules plus operator-supplied patterns, which land in the
    /// `custom` category.
    pub fn with_extra(
        extra_blocked: &[String],
        extra_suspicious: &[String],
        refusal: Option<&str>,
    ) -> Result<Self, ModerationError> {
        let mut filter = Self::default();
        for pattern in extra_blocked {
            filter.blocked.push(Rule::compile("custom", pattern)?);
        }
        for pattern in extra_suspicious {
            filter.suspicious.push(Rule::compile("custom", pattern)?);
        }
        if let Some(refusal) = refusal.filter(|r| !r.trim().is_empty()) {
            filter.refusal = refusal.to_string();
        }
        Ok(filter)
    }

    pub fn refusal_message(&self) -> &str {
        &self.refusal
    }

    pub fn check(&self, text: &str) -> ModerationVerdict {
        if let Some(rule) = self.blocked.iter().find(|rule| rule.regex.is_match(text)) {
            return ModerationVerdict::Blocked {
                category: rule.category.clone(),
            };
        }

        let mut categories: Vec<String> = Vec::new();
        for rule in self.suspicious.iter().filter(|rule| rule.regex.is_match(text)) {
            if !categories.contains(&rule.category) {
                categories.push(rule.category.clone());
            }
        }

        if categories.is_empty() {
            ModerationVerdict::Allowed
        } else {
            ModerationVerdict::Suspicious { categories }
        }
    }

    /// Model output only goes through the blocked list.
    pub fn check_output(&self, text: &str) -> ModerationVerdict {
        match self.blocked.iter().find(|rule| rule.regex.is_match(text)) {
            Some(rule) => ModerationVerdict::Blocked {
                category: rule.category.clone(),
            },
            None => ModerationVerdict::Allowed,
        }
    }
}
