//! Stage 2: LLM-backed semantic classification.
//!
//! Sends message content to an OpenAI-compatible chat-completion endpoint
//! with a fixed moderation taxonomy and parses the strict-JSON reply
//! defensively. Transport and parse failures surface as errors here; the
//! orchestrator maps them to "allowed" at its fail-open boundary.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter as GovRateLimiter};
use serde::{Deserialize, Serialize};

use crate::error::{ChaperoneError, Result};
use crate::models::{Classification, SenderType, ViolationCategory};

/// System prompt describing the fixed violation taxonomy.
const MODERATION_SYSTEM_PROMPT: &str = r#"You are a strict content moderation system for a peer-to-peer creator marketplace. Detect and flag any attempt to take business off the platform, and any abusive conduct between buyers and creators.

You MUST flag messages containing:
- Phone numbers in ANY format (including spelled out like "five five five")
- Email addresses (including disguised like "user at gmail dot com")
- Social media handles or usernames
- References to external messaging apps (WhatsApp, Telegram, Signal, Kik, Snapchat, Instagram DMs, etc.)
- Payment apps for direct payment (Venmo, CashApp, PayPal, Zelle)
- Any invitation to communicate or transact outside this platform
- URLs or links to personal websites/profiles
- Coded language clearly intended to share contact info
- Harassment, threats, coercion, requests for illegal services, or spam

ALLOW messages about:
- Service inquiries, pricing, scheduling on this platform
- Content requests and preferences
- In-person session logistics booked through this platform
- General friendly conversation

Respond with ONLY this exact JSON format, nothing else:
{"allowed":true}
or
{"allowed":false,"reason":"brief reason","category":"off_platform|harassment|coercion|illegal_request|threats|spam"}"#;

/// Rate limiter type alias.
type RateLimiter = GovRateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Semantic classifier backed by an OpenAI-compatible chat-completion API.
pub struct SemanticClassifier {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    rate_limiter: Arc<RateLimiter>,
}

impl SemanticClassifier {
    /// Create a classifier with a bounded request timeout and rate limit.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        timeout_secs: u64,
        requests_per_minute: u32,
    ) -> Result<Self> {
        let quota =
            Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));
        let rate_limiter = Arc::new(GovRateLimiter::direct(quota));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| {
                ChaperoneError::Config(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            api_key,
            base_url,
            model,
            rate_limiter,
        })
    }

    /// Classify a single message.
    ///
    /// Suspends on the rate limiter and the network call; this is the only
    /// I/O suspension point in the moderation path. No retries: a failed
    /// call returns an error once and the caller decides (fail-open).
    pub async fn classify(
        &self,
        content: &str,
        sender_type: SenderType,
    ) -> Result<Classification> {
        self.rate_limiter.until_ready().await;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MODERATION_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!(
                        "Moderate this {} message: \"{}\"",
                        sender_type.as_str(),
                        content
                    ),
                },
            ],
            max_completion_tokens: 100,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);

            return Err(ChaperoneError::RateLimited {
                retry_after_ms: retry_after * 1000,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChaperoneError::ClassifierApi(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let chat_response: ChatResponse = response.json().await?;
        let text = chat_response
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or(r#"{"allowed":true}"#);

        Ok(parse_reply(text))
    }
}

/// Parse the model's reply into a classification.
///
/// Tolerates code-fence wrapping and malformed JSON. The fallback order is
/// the conservative heuristic first (substring search for a refusal), then
/// allow: an unreadable reply must never block platform messaging.
pub fn parse_reply(text: &str) -> Classification {
    let json_text = extract_json(text);

    if let Ok(reply) = serde_json::from_str::<ClassifierReply>(json_text) {
        if reply.allowed {
            return Classification::allow();
        }
        let category = reply
            .category
            .as_deref()
            .map(ViolationCategory::parse_lenient)
            .unwrap_or(ViolationCategory::OffPlatform);
        let reason = reply
            .reason
            .unwrap_or_else(|| "Policy violation detected".to_string());
        return Classification::violation(category, reason);
    }

    let lower = text.to_lowercase();
    if lower.contains(r#""allowed":false"#) || lower.contains(r#""allowed": false"#) {
        return Classification::violation(
            ViolationCategory::OffPlatform,
            "Potential policy violation detected",
        );
    }

    Classification::allow()
}

/// Extract JSON from text that may be wrapped in markdown code fences.
fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let start = start + 7;
        if let Some(end) = text[start..].find("```") {
            return text[start..start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let start = start + 3;
        if let Some(end) = text[start..].find("```") {
            return text[start..start + end].trim();
        }
    }

    text
}

// ============================================================================
// Chat-completion API request/response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_completion_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// The strict reply shape the prompt asks for.
#[derive(Debug, Deserialize)]
struct ClassifierReply {
    allowed: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_plain() {
        let text = r#"{"allowed":true}"#;
        assert_eq!(extract_json(text), text);
    }

    #[test]
    fn extract_json_fenced() {
        let text = "```json\n{\"allowed\":true}\n```";
        assert_eq!(extract_json(text), r#"{"allowed":true}"#);
    }

    #[test]
    fn extract_json_plain_fence() {
        let text = "```\n{\"allowed\":false}\n```";
        assert_eq!(extract_json(text), r#"{"allowed":false}"#);
    }

    #[test]
    fn parse_allowed() {
        assert_eq!(parse_reply(r#"{"allowed":true}"#), Classification::allow());
    }

    #[test]
    fn parse_violation_with_category() {
        let c = parse_reply(r#"{"allowed":false,"reason":"threatening language","category":"threats"}"#);
        assert!(!c.allowed);
        assert_eq!(c.category, Some(ViolationCategory::Threats));
        assert_eq!(c.reason.as_deref(), Some("threatening language"));
    }

    #[test]
    fn parse_violation_without_category_defaults_off_platform() {
        let c = parse_reply(r#"{"allowed":false,"reason":"sharing contact info"}"#);
        assert!(!c.allowed);
        assert_eq!(c.category, Some(ViolationCategory::OffPlatform));
    }

    #[test]
    fn parse_violation_unknown_category_folds_to_off_platform() {
        let c = parse_reply(r#"{"allowed":false,"reason":"x","category":"doxxing"}"#);
        assert_eq!(c.category, Some(ViolationCategory::OffPlatform));
    }

    #[test]
    fn parse_fenced_violation() {
        let c = parse_reply("```json\n{\"allowed\":false,\"reason\":\"url\",\"category\":\"off_platform\"}\n```");
        assert!(!c.allowed);
    }

    #[test]
    fn malformed_with_refusal_substring_is_conservative() {
        let c = parse_reply(r#"Sure! Here is my analysis: "allowed":false because..."#);
        assert!(!c.allowed);
        assert_eq!(c.category, Some(ViolationCategory::OffPlatform));
        assert_eq!(c.reason.as_deref(), Some("Potential policy violation detected"));
    }

    #[test]
    fn malformed_refusal_substring_spaced() {
        let c = parse_reply(r#"{"ALLOWED": FALSE, oops"#);
        assert!(!c.allowed);
    }

    #[test]
    fn malformed_without_signal_fails_open() {
        assert_eq!(
            parse_reply("I cannot determine whether this is acceptable."),
            Classification::allow()
        );
        assert_eq!(parse_reply(""), Classification::allow());
        assert_eq!(parse_reply("{not json at all"), Classification::allow());
    }

    #[test]
    fn missing_reason_gets_default() {
        let c = parse_reply(r#"{"allowed":false,"category":"spam"}"#);
        assert_eq!(c.reason.as_deref(), Some("Policy violation detected"));
        assert_eq!(c.category, Some(ViolationCategory::Spam));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any reply that is not valid JSON and carries no refusal
        /// substring parses as allowed (fail-open).
        #[test]
        fn prop_garbage_replies_fail_open(text in "[a-zA-Z .,!?]{0,120}") {
            prop_assume!(!text.to_lowercase().contains("allowed"));
            prop_assert_eq!(parse_reply(&text), Classification::allow());
        }

        /// A well-formed refusal is never allowed, whatever the reason text.
        #[test]
        fn prop_refusals_never_allowed(reason in "[a-zA-Z ]{1,60}") {
            let json = format!(r#"{{"allowed":false,"reason":"{}"}}"#, reason);
            let c = parse_reply(&json);
            prop_assert!(!c.allowed);
        }
    }
}
