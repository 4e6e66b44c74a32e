//! Moderation orchestrator: runs a message through the auto-block
//! pre-check, the pattern filter, the semantic classifier, and the
//! escalation policy, and writes the audit record.
//!
//! `moderate` never returns an error. Every internal failure degrades to
//! an explicit fail-open or log-and-continue path so moderation problems
//! never take messaging down with them.

use std::sync::Arc;

use crate::classifier::SemanticClassifier;
use crate::database::{Conversation, Database, ModerationEvent};
use crate::filter::PatternFilter;
use crate::models::{Classification, ModerationAction, NewMessage, SenderType, Verdict};
use crate::policy::EscalationPolicy;

const AUTO_BLOCK_REASON: &str =
    "This buyer has accumulated too many policy violations and can no longer message this creator";

pub struct ModerationPipeline {
    filter: PatternFilter,
    classifier: Option<Arc<SemanticClassifier>>,
    policy: Arc<EscalationPolicy>,
    db: Arc<Database>,
}

impl ModerationPipeline {
    pub fn new(
        filter: PatternFilter,
        classifier: Option<Arc<SemanticClassifier>>,
        policy: Arc<EscalationPolicy>,
        db: Arc<Database>,
    ) -> Self {
        Self {
            filter,
            classifier,
            policy,
            db,
        }
    }

    /// Moderate a message before it is persisted.
    pub async fn moderate(&self, message: &NewMessage, conversation: &Conversation) -> Verdict {
        if let Some(verdict) = self.auto_block_check(message, conversation).await {
            self.audit(message, conversation, &verdict).await;
            return verdict;
        }

        let classification = self.classify(message, conversation).await;
        let verdict = self
            .policy
            .decide(&classification, &message.sender_name, conversation.id)
            .await;

        if verdict.action != ModerationAction::Allow {
            self.audit(message, conversation, &verdict).await;
        }

        verdict
    }

    /// Pre-classification gate: a creator may block buyers whose warning
    /// count has already reached their configured threshold. The current
    /// message is not classified and contributes nothing to the count.
    /// Only applies buyer-to-creator.
    async fn auto_block_check(
        &self,
        message: &NewMessage,
        conversation: &Conversation,
    ) -> Option<Verdict> {
        if message.sender_type != SenderType::Buyer {
            return None;
        }

        let threshold = match self.db.get_creator_settings(&conversation.creator_name).await {
            Ok(settings) => settings.auto_block_threshold,
            Err(e) => {
                tracing::warn!(
                    creator = %conversation.creator_name,
                    error = %e,
                    "creator settings unavailable, skipping auto-block check"
                );
                0
            }
        };
        if threshold == 0 {
            return None;
        }

        let count = self
            .policy
            .warning_count_fail_open(&message.sender_name)
            .await;
        if count < threshold {
            return None;
        }

        tracing::info!(
            buyer = %message.sender_name,
            creator = %conversation.creator_name,
            warnings = count,
            threshold,
            "buyer auto-blocked"
        );
        Some(Verdict::auto_blocked(AUTO_BLOCK_REASON))
    }

    async fn classify(&self, message: &NewMessage, conversation: &Conversation) -> Classification {
        if let Some(hit) = self.filter.scan(&message.content) {
            tracing::info!(
                conversation_id = conversation.id,
                sender = %message.sender_name,
                reason = hit.reason,
                "pattern filter violation"
            );
            return Classification::from(hit);
        }

        let Some(classifier) = &self.classifier else {
            // No classifier configured; pattern filtering alone applies.
            return Classification::allow();
        };

        match classifier
            .classify(&message.content, message.sender_type)
            .await
        {
            Ok(classification) => classification,
            Err(e) => {
                // Fail open: an unreachable or erroring classifier must
                // not stop legitimate messages.
                tracing::warn!(
                    conversation_id = conversation.id,
                    sender = %message.sender_name,
                    error = %e,
                    "classifier unavailable, failing open"
                );
                Classification::allow()
            }
        }
    }

    async fn audit(&self, message: &NewMessage, conversation: &Conversation, verdict: &Verdict) {
        let event = ModerationEvent::for_verdict(
            conversation.id,
            &message.content,
            message.sender_type,
            &message.sender_name,
            verdict,
        );
        if let Err(e) = self.db.insert_moderation_log(&event).await {
            tracing::error!(
                conversation_id = conversation.id,
                error = %e,
                "failed to write audit record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::CreatorSettings;
    use crate::ledger::WarningLedger;
    use crate::models::ViolationCategory;

    struct Fixture {
        pipeline: ModerationPipeline,
        db: Arc<Database>,
        conversation: Conversation,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(Database::in_memory().await.expect("should create db"));
        let (conversation, _) = db
            .find_or_create_conversation("Ava", "Sam")
            .await
            .expect("should create conversation");
        let ledger = Arc::new(WarningLedger::new(Arc::clone(&db)));
        let policy = Arc::new(EscalationPolicy::new(ledger));
        let pipeline = ModerationPipeline::new(
            PatternFilter::standard().expect("should compile patterns"),
            None,
            policy,
            Arc::clone(&db),
        );
        Fixture {
            pipeline,
            db,
            conversation,
        }
    }

    fn buyer_message(content: &str) -> NewMessage {
        NewMessage {
            content: content.to_string(),
            sender_type: SenderType::Buyer,
            sender_name: "Sam".to_string(),
        }
    }

    #[tokio::test]
    async fn clean_message_is_allowed_without_audit() {
        let fx = fixture().await;
        let verdict = fx
            .pipeline
            .moderate(&buyer_message("thanks, the piece arrived today"), &fx.conversation)
            .await;

        assert!(verdict.allowed);
        let logs = fx.db.recent_moderation_logs(10).await.expect("should fetch");
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn pattern_hit_warns_and_is_audited() {
        let fx = fixture().await;
        let verdict = fx
            .pipeline
            .moderate(&buyer_message("call me at 555-867-5309"), &fx.conversation)
            .await;

        assert!(verdict.allowed);
        assert_eq!(verdict.action, ModerationAction::Warn);
        assert_eq!(verdict.category, Some(ViolationCategory::OffPlatform));
        assert_eq!(verdict.severity, Some(crate::models::Severity::Medium));
        assert_eq!(verdict.warnings_remaining, Some(1));

        let logs = fx.db.recent_moderation_logs(10).await.expect("should fetch");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action_taken, "warn");
        assert_eq!(logs[0].sender_name, "Sam");
    }

    #[tokio::test]
    async fn no_classifier_means_clean_text_passes() {
        let fx = fixture().await;
        // Text that only a semantic classifier could catch.
        let verdict = fx
            .pipeline
            .moderate(
                &buyer_message("let's take this conversation somewhere private"),
                &fx.conversation,
            )
            .await;
        assert!(verdict.allowed);
        assert_eq!(verdict.action, ModerationAction::Allow);
    }

    #[tokio::test]
    async fn unreachable_classifier_fails_open() {
        let db = Arc::new(Database::in_memory().await.expect("should create db"));
        let (conversation, _) = db
            .find_or_create_conversation("Ava", "Sam")
            .await
            .expect("should create conversation");
        let ledger = Arc::new(WarningLedger::new(Arc::clone(&db)));
        let policy = Arc::new(EscalationPolicy::new(ledger));

        // Nothing listens on port 1; the call errors immediately.
        let classifier = SemanticClassifier::new(
            "test-key".to_string(),
            "http://127.0.0.1:1".to_string(),
            "gpt-5-mini".to_string(),
            1,
            60,
        )
        .expect("should build classifier");
        let pipeline = ModerationPipeline::new(
            PatternFilter::standard().expect("should compile patterns"),
            Some(Arc::new(classifier)),
            policy,
            Arc::clone(&db),
        );

        let verdict = pipeline
            .moderate(
                &buyer_message("let's take this conversation somewhere private"),
                &conversation,
            )
            .await;

        assert!(verdict.allowed);
        assert_eq!(verdict.action, ModerationAction::Allow);
        // Fail-open allows are not audited.
        let logs = db.recent_moderation_logs(10).await.expect("should fetch");
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn auto_block_gates_buyers_at_threshold() {
        let fx = fixture().await;
        fx.db
            .set_creator_settings(&CreatorSettings {
                creator_name: "Ava".to_string(),
                auto_block_threshold: 2,
            })
            .await
            .expect("should set");

        // Two pattern violations put the buyer at the threshold.
        for _ in 0..2 {
            fx.pipeline
                .moderate(&buyer_message("text me on whatsapp"), &fx.conversation)
                .await;
        }

        // A clean message is now rejected before classification.
        let verdict = fx
            .pipeline
            .moderate(&buyer_message("hello again"), &fx.conversation)
            .await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.action, ModerationAction::AutoBlocked);
        assert!(verdict.category.is_none());

        let logs = fx.db.recent_moderation_logs(10).await.expect("should fetch");
        assert_eq!(logs[0].action_taken, "auto_blocked");
    }

    #[tokio::test]
    async fn auto_block_never_applies_to_creators() {
        let fx = fixture().await;
        fx.db
            .set_creator_settings(&CreatorSettings {
                creator_name: "Ava".to_string(),
                auto_block_threshold: 1,
            })
            .await
            .expect("should set");

        // Give the creator a warning on their own record.
        fx.pipeline
            .moderate(
                &NewMessage {
                    content: "reach me at ava@example.com".to_string(),
                    sender_type: SenderType::Creator,
                    sender_name: "Ava".to_string(),
                },
                &fx.conversation,
            )
            .await;

        let verdict = fx
            .pipeline
            .moderate(
                &NewMessage {
                    content: "your order shipped".to_string(),
                    sender_type: SenderType::Creator,
                    sender_name: "Ava".to_string(),
                },
                &fx.conversation,
            )
            .await;
        assert!(verdict.allowed);
    }

    #[tokio::test]
    async fn threshold_zero_disables_auto_block() {
        let fx = fixture().await;

        for _ in 0..5 {
            fx.pipeline
                .moderate(&buyer_message("text me on whatsapp"), &fx.conversation)
                .await;
        }

        // Plenty of warnings, but no threshold configured.
        let verdict = fx
            .pipeline
            .moderate(&buyer_message("hello"), &fx.conversation)
            .await;
        assert!(verdict.allowed);
    }
}
