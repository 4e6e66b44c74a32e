//! Core data models for the moderation pipeline.

use serde::{Deserialize, Serialize};

/// Maximum message length accepted by the send endpoint.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Role of a message sender within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Creator,
    Buyer,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creator => "creator",
            Self::Buyer => "buyer",
        }
    }
}

impl std::str::FromStr for SenderType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "creator" => Ok(Self::Creator),
            "buyer" => Ok(Self::Buyer),
            _ => Err(()),
        }
    }
}

/// Closed taxonomy of policy violations.
///
/// Adding a category requires extending [`ViolationCategory::severity`],
/// which the compiler enforces through the exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    OffPlatform,
    Harassment,
    Coercion,
    IllegalRequest,
    Threats,
    Spam,
    UserReport,
}

impl ViolationCategory {
    /// Static severity table.
    ///
    /// `UserReport` has no intrinsic severity; it is recorded as medium
    /// when logged.
    pub fn severity(self) -> Severity {
        match self {
            Self::OffPlatform => Severity::Medium,
            Self::Harassment => Severity::High,
            Self::Coercion => Severity::Severe,
            Self::IllegalRequest => Severity::Severe,
            Self::Threats => Severity::Severe,
            Self::Spam => Severity::Low,
            Self::UserReport => Severity::Medium,
        }
    }

    /// Categories that block regardless of the sender's warning history.
    pub fn is_hard_block(self) -> bool {
        matches!(
            self,
            Self::Coercion | Self::IllegalRequest | Self::Threats | Self::Harassment
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OffPlatform => "off_platform",
            Self::Harassment => "harassment",
            Self::Coercion => "coercion",
            Self::IllegalRequest => "illegal_request",
            Self::Threats => "threats",
            Self::Spam => "spam",
            Self::UserReport => "user_report",
        }
    }

    /// Parse a category tag, tolerating unknown values.
    ///
    /// The classifier may emit tags outside the taxonomy; those fold into
    /// `off_platform`, the default category for flagged content.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "off_platform" => Self::OffPlatform,
            "harassment" => Self::Harassment,
            "coercion" => Self::Coercion,
            "illegal_request" => Self::IllegalRequest,
            "threats" => Self::Threats,
            "spam" => Self::Spam,
            "user_report" => Self::UserReport,
            _ => Self::OffPlatform,
        }
    }
}

impl std::fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity tier, ordered low to severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Severe,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Severe => "severe",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final action taken on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    Allow,
    Warn,
    Block,
    /// Pre-emptive block of a buyer who exceeded the creator's
    /// accumulated-violation threshold; content is never evaluated.
    AutoBlocked,
}

impl ModerationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Warn => "warn",
            Self::Block => "block",
            Self::AutoBlocked => "auto_blocked",
        }
    }
}

/// A proposed message entering moderation. Immutable once submitted.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub content: String,
    #[serde(rename = "senderType")]
    pub sender_type: SenderType,
    #[serde(rename = "senderName")]
    pub sender_name: String,
}

/// A hit from the pattern filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub category: ViolationCategory,
    pub reason: &'static str,
}

/// Result of the filter/classifier stages, fed into the escalation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub allowed: bool,
    pub reason: Option<String>,
    pub category: Option<ViolationCategory>,
}

impl Classification {
    /// A clean result: no violation found.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            category: None,
        }
    }

    /// A flagged result with a reason and category.
    pub fn violation(category: ViolationCategory, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            category: Some(category),
        }
    }
}

impl From<PatternMatch> for Classification {
    fn from(m: PatternMatch) -> Self {
        Classification::violation(m.category, m.reason)
    }
}

/// The outcome of one moderation evaluation.
///
/// Produced fresh per message and never persisted as an entity; warned and
/// blocked verdicts are written to the audit log by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ViolationCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub action: ModerationAction,
    /// Soft warnings remaining before the sender's next violation blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings_remaining: Option<u32>,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            category: None,
            severity: None,
            action: ModerationAction::Allow,
            warnings_remaining: None,
        }
    }

    pub fn warn(
        category: ViolationCategory,
        reason: impl Into<String>,
        warnings_remaining: u32,
    ) -> Self {
        Self {
            allowed: true,
            reason: Some(reason.into()),
            category: Some(category),
            severity: Some(category.severity()),
            action: ModerationAction::Warn,
            warnings_remaining: Some(warnings_remaining),
        }
    }

    pub fn block(category: ViolationCategory, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            category: Some(category),
            severity: Some(category.severity()),
            action: ModerationAction::Block,
            warnings_remaining: None,
        }
    }

    pub fn auto_blocked(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            category: None,
            severity: None,
            action: ModerationAction::AutoBlocked,
            warnings_remaining: None,
        }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_category() -> impl Strategy<Value = ViolationCategory> {
        prop_oneof![
            Just(ViolationCategory::OffPlatform),
            Just(ViolationCategory::Harassment),
            Just(ViolationCategory::Coercion),
            Just(ViolationCategory::IllegalRequest),
            Just(ViolationCategory::Threats),
            Just(ViolationCategory::Spam),
            Just(ViolationCategory::UserReport),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Every hard-block category maps to high or severe severity; the
        /// warning-budget path only ever sees low/medium violations.
        #[test]
        fn prop_hard_block_implies_elevated_severity(category in arb_category()) {
            if category.is_hard_block() {
                prop_assert!(category.severity() >= Severity::High);
            }
        }

        /// Category tags survive the serde round trip through their
        /// snake_case wire form.
        #[test]
        fn prop_category_tag_round_trip(category in arb_category()) {
            let tag = category.as_str();
            prop_assert_eq!(ViolationCategory::parse_lenient(tag), category);

            let json = serde_json::to_string(&category).expect("serialize");
            let parsed: ViolationCategory = serde_json::from_str(&json).expect("deserialize");
            prop_assert_eq!(parsed, category);
        }
    }
}
