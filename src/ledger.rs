//! Append-only per-user warning ledger.
//!
//! Counts are keyed by user name across all conversations and are never
//! pruned or decayed.

use std::sync::Arc;

use sqlx::Row;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{ChaperoneError, Result};
use crate::models::ViolationCategory;

#[derive(Clone)]
pub struct WarningLedger {
    db: Arc<Database>,
}

impl WarningLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Total warnings ever recorded for a user, across all conversations.
    pub async fn count_warnings(&self, user_name: &str) -> Result<u32> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM warnings WHERE user_name = ?")
            .bind(user_name)
            .fetch_one(self.db.pool())
            .await
            .map_err(|e| ChaperoneError::Database(format!("failed to count warnings: {}", e)))?;

        let count: i64 = row.get("cnt");
        Ok(count as u32)
    }

    /// Record one warning against a user.
    pub async fn add_warning(
        &self,
        user_name: &str,
        conversation_id: i64,
        category: ViolationCategory,
        reason: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO warnings (id, user_name, conversation_id, category, reason)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_name)
        .bind(conversation_id)
        .bind(category.as_str())
        .bind(reason)
        .execute(self.db.pool())
        .await
        .map_err(|e| ChaperoneError::Database(format!("failed to record warning: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ledger() -> WarningLedger {
        let db = Database::in_memory().await.expect("should create db");
        WarningLedger::new(Arc::new(db))
    }

    #[tokio::test]
    async fn counts_start_at_zero() {
        let ledger = ledger().await;
        assert_eq!(
            ledger.count_warnings("Sam").await.expect("should count"),
            0
        );
    }

    #[tokio::test]
    async fn warnings_accumulate_across_conversations() {
        let ledger = ledger().await;

        ledger
            .add_warning("Sam", 1, ViolationCategory::OffPlatform, "Phone number")
            .await
            .expect("should add");
        ledger
            .add_warning("Sam", 2, ViolationCategory::Spam, "Repeated promotion")
            .await
            .expect("should add");

        assert_eq!(
            ledger.count_warnings("Sam").await.expect("should count"),
            2
        );
        // Other users are unaffected.
        assert_eq!(
            ledger.count_warnings("Ava").await.expect("should count"),
            0
        );
    }
}
