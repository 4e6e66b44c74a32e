//! Stage 1: deterministic pattern filtering.
//!
//! Scans message content against an ordered list of structural regex
//! patterns, then lowercased keyword-phrase lists. No network calls; runs
//! before the semantic classifier on every message.

use regex::Regex;

use crate::error::Result;
use crate::models::{PatternMatch, ViolationCategory};

/// An ordered structural pattern with its diagnostic reason.
struct StructuralPattern {
    regex: Regex,
    reason: &'static str,
}

/// A group of keyword phrases sharing one diagnostic reason.
struct KeywordGroup {
    terms: &'static [&'static str],
    reason: &'static str,
}

const MESSAGING_APP_TERMS: &[&str] = &[
    "whatsapp",
    "telegram",
    "signal app",
    "kik me",
    "snapchat",
    "my snap",
    "add me on snap",
    "ig is",
    "my insta",
    "find me on",
];

const CONTACT_TERMS: &[&str] = &[
    "text me",
    "call me",
    "dm me",
    "message me on",
    "hit me up on",
    "reach me at",
    "contact me at",
    "hmu on",
];

const PAYMENT_TERMS: &[&str] = &[
    "venmo me",
    "cashapp me",
    "paypal me",
    "zelle me",
    "send to my venmo",
    "send to my cashapp",
    "pay me directly",
    "pay outside",
];

/// Deterministic regex/keyword scanner.
///
/// Patterns are evaluated top-to-bottom and the first match wins. The
/// ordering affects only the diagnostic reason text; any match means the
/// content is flagged, so the allow/block outcome is order-independent.
pub struct PatternFilter {
    structural: Vec<StructuralPattern>,
    keywords: Vec<KeywordGroup>,
}

impl PatternFilter {
    /// Build the standard pattern set: phone numbers, email addresses,
    /// URLs, social handles, and off-platform contact/payment phrases.
    ///
    /// Returns an error if any pattern fails to compile.
    pub fn standard() -> Result<Self> {
        let structural = vec![
            StructuralPattern {
                regex: Regex::new(r"\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b")?,
                reason: "Phone number detected",
            },
            StructuralPattern {
                regex: Regex::new(r"\(\d{3}\)\s*\d{3}[-.\s]?\d{4}")?,
                reason: "Phone number detected",
            },
            StructuralPattern {
                regex: Regex::new(r"\+\d{1,3}\s?\d{6,}")?,
                reason: "Phone number detected",
            },
            StructuralPattern {
                regex: Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}")?,
                reason: "Email address detected",
            },
            StructuralPattern {
                regex: Regex::new(r"(?i)(?:https?://|www\.)\S+")?,
                reason: "URL/link detected",
            },
            StructuralPattern {
                regex: Regex::new(r"@[a-zA-Z0-9_]{2,}")?,
                reason: "Social media handle detected",
            },
        ];

        let keywords = vec![
            KeywordGroup {
                terms: MESSAGING_APP_TERMS,
                reason: "Messaging/social media app reference",
            },
            KeywordGroup {
                terms: CONTACT_TERMS,
                reason: "Off-platform contact attempt",
            },
            KeywordGroup {
                terms: PAYMENT_TERMS,
                reason: "Off-platform payment attempt",
            },
        ];

        Ok(Self {
            structural,
            keywords,
        })
    }

    /// Scan content for off-platform signals.
    ///
    /// Returns `None` when no pattern matches. That means "inconclusive",
    /// not "allowed": the caller falls through to the semantic classifier.
    pub fn scan(&self, content: &str) -> Option<PatternMatch> {
        for pattern in &self.structural {
            if pattern.regex.is_match(content) {
                return Some(PatternMatch {
                    category: ViolationCategory::OffPlatform,
                    reason: pattern.reason,
                });
            }
        }

        let lower = content.to_lowercase();
        for group in &self.keywords {
            for term in group.terms {
                if lower.contains(term) {
                    return Some(PatternMatch {
                        category: ViolationCategory::OffPlatform,
                        reason: group.reason,
                    });
                }
            }
        }

        None
    }
}
