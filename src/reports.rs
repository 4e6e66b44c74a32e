//! User reports: either party may flag a stored message for review.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::database::{Database, ModerationEvent};
use crate::error::{ChaperoneError, Result};
use crate::models::{SenderType, Severity, ViolationCategory};

/// A filed report, as returned to the reporter.
#[derive(Debug, Clone, Serialize)]
pub struct MessageReport {
    pub id: String,
    pub message_id: i64,
    pub reporter_name: String,
    pub reporter_role: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Clone)]
pub struct ReportService {
    db: Arc<Database>,
}

impl ReportService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// File a report against a stored message.
    ///
    /// Each reporter may report a given message once; duplicates are
    /// rejected. Accepted reports land in the audit log as `user_report`
    /// events with the reporter's reason preserved verbatim.
    pub async fn report_message(
        &self,
        message_id: i64,
        reporter_name: &str,
        reporter_role: SenderType,
        reason: &str,
        details: Option<&str>,
    ) -> Result<MessageReport> {
        let message = self
            .db
            .get_message(message_id)
            .await?
            .ok_or_else(|| ChaperoneError::NotFound("Message".to_string()))?;

        let report = MessageReport {
            id: Uuid::new_v4().to_string(),
            message_id,
            reporter_name: reporter_name.to_string(),
            reporter_role: reporter_role.as_str().to_string(),
            reason: reason.to_string(),
            details: details.map(|d| d.to_string()),
        };

        let insert = sqlx::query(
            "INSERT INTO message_reports (id, message_id, reporter_name, reporter_role, reason, details)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&report.id)
        .bind(report.message_id)
        .bind(&report.reporter_name)
        .bind(&report.reporter_role)
        .bind(&report.reason)
        .bind(&report.details)
        .execute(self.db.pool())
        .await;

        match insert {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(ChaperoneError::DuplicateReport);
            }
            Err(e) => {
                return Err(ChaperoneError::Database(format!(
                    "failed to store report: {}",
                    e
                )));
            }
        }

        let sender_type = message
            .sender_type
            .parse::<SenderType>()
            .unwrap_or(SenderType::Buyer);
        self.db
            .insert_moderation_log(&ModerationEvent {
                conversation_id: Some(message.conversation_id),
                content: message.content,
                sender_type,
                sender_name: message.sender_name,
                violation_type: reason.to_string(),
                category: Some(ViolationCategory::UserReport),
                severity: Some(Severity::Medium),
                action_taken: "reported".to_string(),
            })
            .await?;

        tracing::info!(
            message_id,
            reporter = reporter_name,
            reason,
            "message reported"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        db: Arc<Database>,
        reports: ReportService,
        message_id: i64,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(Database::in_memory().await.expect("should create db"));
        let (conv, _) = db
            .find_or_create_conversation("Ava", "Sam")
            .await
            .expect("should create conversation");
        let message = db
            .insert_message(conv.id, SenderType::Buyer, "Sam", "rude remark")
            .await
            .expect("should insert message");
        let reports = ReportService::new(Arc::clone(&db));
        Fixture {
            db,
            reports,
            message_id: message.id,
        }
    }

    #[tokio::test]
    async fn report_lands_in_audit_log() {
        let fx = fixture().await;

        let report = fx
            .reports
            .report_message(fx.message_id, "Ava", SenderType::Creator, "harassment", None)
            .await
            .expect("should report");
        assert_eq!(report.message_id, fx.message_id);

        let logs = fx.db.recent_moderation_logs(10).await.expect("should fetch");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action_taken, "reported");
        assert_eq!(logs[0].category.as_deref(), Some("user_report"));
        assert_eq!(logs[0].severity.as_deref(), Some("medium"));
        // The reporter's reason is stored verbatim.
        assert_eq!(logs[0].violation_type, "harassment");
        // The audit record describes the reported message, not the reporter.
        assert_eq!(logs[0].sender_name, "Sam");
    }

    #[tokio::test]
    async fn duplicate_report_by_same_reporter_rejected() {
        let fx = fixture().await;

        fx.reports
            .report_message(fx.message_id, "Ava", SenderType::Creator, "spam", None)
            .await
            .expect("first report should succeed");

        let err = fx
            .reports
            .report_message(fx.message_id, "Ava", SenderType::Creator, "spam again", None)
            .await
            .expect_err("second report should fail");
        assert!(matches!(err, ChaperoneError::DuplicateReport));

        // A different reporter may still report the same message.
        fx.reports
            .report_message(fx.message_id, "Riley", SenderType::Buyer, "spam", None)
            .await
            .expect("different reporter should succeed");
    }

    #[tokio::test]
    async fn reporting_missing_message_is_not_found() {
        let fx = fixture().await;

        let err = fx
            .reports
            .report_message(9999, "Ava", SenderType::Creator, "spam", None)
            .await
            .expect_err("should fail");
        assert!(matches!(err, ChaperoneError::NotFound(_)));
    }
}
