//! Escalation policy: maps a violation to warn or block using the
//! sender's accumulated warning count.

use std::sync::Arc;

use crate::ledger::WarningLedger;
use crate::models::{Classification, Severity, Verdict, ViolationCategory};

/// Soft warnings a user gets before repeat violations are blocked.
pub const WARNINGS_BEFORE_BLOCK: u32 = 2;

#[derive(Clone)]
pub struct EscalationPolicy {
    ledger: Arc<WarningLedger>,
}

impl EscalationPolicy {
    pub fn new(ledger: Arc<WarningLedger>) -> Self {
        Self { ledger }
    }

    /// Decide the final action for a classified message.
    ///
    /// Every violation is recorded in the ledger, whether the outcome is a
    /// warning or a block. Hard-block categories and severe violations
    /// block immediately regardless of history.
    pub async fn decide(
        &self,
        classification: &Classification,
        sender_name: &str,
        conversation_id: i64,
    ) -> Verdict {
        if classification.allowed {
            return Verdict::allow();
        }

        let category = classification
            .category
            .unwrap_or(ViolationCategory::OffPlatform);
        let reason = classification
            .reason
            .clone()
            .unwrap_or_else(|| "Policy violation detected".to_string());

        if category.is_hard_block() || category.severity() == Severity::Severe {
            self.record_warning(sender_name, conversation_id, category, &reason)
                .await;
            return Verdict::block(category, reason);
        }

        let prior = self.warning_count_fail_open(sender_name).await;
        self.record_warning(sender_name, conversation_id, category, &reason)
            .await;

        if prior >= WARNINGS_BEFORE_BLOCK {
            return Verdict::block(category, reason);
        }

        let remaining = WARNINGS_BEFORE_BLOCK.saturating_sub(prior + 1);
        Verdict::warn(category, reason, remaining)
    }

    /// Read the sender's warning count, treating a ledger failure as zero
    /// so a storage hiccup degrades to a warning instead of a block.
    pub async fn warning_count_fail_open(&self, user_name: &str) -> u32 {
        match self.ledger.count_warnings(user_name).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(user = user_name, error = %e, "warning count unavailable, treating as zero");
                0
            }
        }
    }

    async fn record_warning(
        &self,
        user_name: &str,
        conversation_id: i64,
        category: ViolationCategory,
        reason: &str,
    ) {
        if let Err(e) = self
            .ledger
            .add_warning(user_name, conversation_id, category, reason)
            .await
        {
            tracing::error!(user = user_name, error = %e, "failed to record warning");
        }
    }
}
