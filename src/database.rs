//! SQLite storage for conversations, messages, the audit log, warnings,
//! reports, and creator settings.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::RwLock;

use crate::error::{ChaperoneError, Result};
use crate::models::{SenderType, Severity, ViolationCategory};

/// Maximum number of audit records a single query may return.
pub const MAX_AUDIT_PAGE: u32 = 50;

/// A buyer-creator conversation.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: i64,
    pub creator_name: String,
    pub buyer_name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A conversation with list-view metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub creator_name: String,
    pub buyer_name: String,
    pub created_at: String,
    pub updated_at: String,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    pub message_count: i64,
}

/// A persisted chat message.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_type: String,
    pub sender_name: String,
    pub content: String,
    pub created_at: String,
}

/// One audit-log write, produced by the orchestrator or the report path.
#[derive(Debug, Clone)]
pub struct ModerationEvent {
    pub conversation_id: Option<i64>,
    pub content: String,
    pub sender_type: SenderType,
    pub sender_name: String,
    pub violation_type: String,
    pub category: Option<ViolationCategory>,
    pub severity: Option<Severity>,
    pub action_taken: String,
}

impl ModerationEvent {
    /// Build an audit event for a warned or blocked message.
    pub fn for_verdict(
        conversation_id: i64,
        content: &str,
        sender_type: SenderType,
        sender_name: &str,
        verdict: &crate::models::Verdict,
    ) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            content: content.to_string(),
            sender_type,
            sender_name: sender_name.to_string(),
            violation_type: verdict
                .reason
                .clone()
                .unwrap_or_else(|| "Policy violation".to_string()),
            category: verdict.category,
            severity: verdict.severity,
            action_taken: verdict.action.as_str().to_string(),
        }
    }
}

/// A stored audit-log record.
#[derive(Debug, Clone, Serialize)]
pub struct ModerationLogEntry {
    pub id: i64,
    pub conversation_id: Option<i64>,
    pub message_content: String,
    pub sender_type: String,
    pub sender_name: String,
    pub violation_type: String,
    pub category: Option<String>,
    pub severity: Option<String>,
    pub action_taken: String,
    pub created_at: String,
}

/// Per-creator moderation settings.
#[derive(Debug, Clone, Serialize)]
pub struct CreatorSettings {
    pub creator_name: String,
    /// Warning count at which buyers are pre-emptively blocked; 0 disables.
    pub auto_block_threshold: u32,
}

impl CreatorSettings {
    fn disabled(creator_name: &str) -> Self {
        Self {
            creator_name: creator_name.to_string(),
            auto_block_threshold: 0,
        }
    }
}

/// Database connection pool wrapper with an in-memory settings cache.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    settings_cache: Arc<RwLock<HashMap<String, CreatorSettings>>>,
}

impl Database {
    /// Open (or create) the database file and initialize the schema.
    pub async fn new(path: &str) -> Result<Self> {
        let db_path = Path::new(path);

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ChaperoneError::Database(format!("failed to create database directory: {}", e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| ChaperoneError::Database(format!("failed to connect: {}", e)))?;

        let db = Self {
            pool,
            settings_cache: Arc::new(RwLock::new(HashMap::new())),
        };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Create an in-memory database for testing.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| ChaperoneError::Database(format!("failed to create in-memory db: {}", e)))?;

        let db = Self {
            pool,
            settings_cache: Arc::new(RwLock::new(HashMap::new())),
        };
        db.initialize_schema().await?;

        Ok(db)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| ChaperoneError::Database(format!("failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check if the database is healthy.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ChaperoneError::Database(format!("health check failed: {}", e)))?;

        Ok(())
    }

    // ========== Conversations ==========

    /// Find an existing conversation for the pair or create a new one.
    ///
    /// Returns the conversation and whether it was newly created.
    pub async fn find_or_create_conversation(
        &self,
        creator_name: &str,
        buyer_name: &str,
    ) -> Result<(Conversation, bool)> {
        let existing = sqlx::query(
            "SELECT id, creator_name, buyer_name, created_at, updated_at
             FROM conversations WHERE creator_name = ? AND buyer_name = ?",
        )
        .bind(creator_name)
        .bind(buyer_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChaperoneError::Database(format!("failed to query conversation: {}", e)))?;

        if let Some(row) = existing {
            return Ok((conversation_from_row(&row), false));
        }

        let result = sqlx::query(
            "INSERT INTO conversations (creator_name, buyer_name) VALUES (?, ?)",
        )
        .bind(creator_name)
        .bind(buyer_name)
        .execute(&self.pool)
        .await
        .map_err(|e| ChaperoneError::Database(format!("failed to create conversation: {}", e)))?;

        let id = result.last_insert_rowid();
        let conversation = self
            .get_conversation(id)
            .await?
            .ok_or_else(|| ChaperoneError::Database("created conversation missing".to_string()))?;

        Ok((conversation, true))
    }

    /// Fetch a conversation by id.
    pub async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, creator_name, buyer_name, created_at, updated_at
             FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChaperoneError::Database(format!("failed to get conversation: {}", e)))?;

        Ok(row.map(|r| conversation_from_row(&r)))
    }

    /// List a user's conversations with last-message previews,
    /// newest-updated first.
    pub async fn list_conversations(
        &self,
        user: &str,
        role: SenderType,
    ) -> Result<Vec<ConversationSummary>> {
        let name_column = match role {
            SenderType::Creator => "creator_name",
            SenderType::Buyer => "buyer_name",
        };

        let query = format!(
            "SELECT c.id, c.creator_name, c.buyer_name, c.created_at, c.updated_at,
               (SELECT content FROM messages WHERE conversation_id = c.id
                ORDER BY created_at DESC, id DESC LIMIT 1) AS last_message,
               (SELECT created_at FROM messages WHERE conversation_id = c.id
                ORDER BY created_at DESC, id DESC LIMIT 1) AS last_message_at,
               (SELECT COUNT(*) FROM messages WHERE conversation_id = c.id) AS message_count
             FROM conversations c WHERE c.{} = ? ORDER BY c.updated_at DESC",
            name_column
        );

        let rows = sqlx::query(&query)
            .bind(user)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                ChaperoneError::Database(format!("failed to list conversations: {}", e))
            })?;

        Ok(rows
            .iter()
            .map(|row| ConversationSummary {
                id: row.get("id"),
                creator_name: row.get("creator_name"),
                buyer_name: row.get("buyer_name"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
                last_message: row.get("last_message"),
                last_message_at: row.get("last_message_at"),
                message_count: row.get("message_count"),
            })
            .collect())
    }

    /// Bump a conversation's `updated_at` after a new message.
    pub async fn touch_conversation(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE conversations SET updated_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| ChaperoneError::Database(format!("failed to touch conversation: {}", e)))?;

        Ok(())
    }

    // ========== Messages ==========

    /// Persist an allowed (or soft-warned) message and return the row.
    pub async fn insert_message(
        &self,
        conversation_id: i64,
        sender_type: SenderType,
        sender_name: &str,
        content: &str,
    ) -> Result<StoredMessage> {
        let result = sqlx::query(
            "INSERT INTO messages (conversation_id, sender_type, sender_name, content)
             VALUES (?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(sender_type.as_str())
        .bind(sender_name)
        .bind(content)
        .execute(&self.pool)
        .await
        .map_err(|e| ChaperoneError::Database(format!("failed to insert message: {}", e)))?;

        let id = result.last_insert_rowid();
        self.get_message(id)
            .await?
            .ok_or_else(|| ChaperoneError::Database("inserted message missing".to_string()))
    }

    /// Fetch a message by id.
    pub async fn get_message(&self, id: i64) -> Result<Option<StoredMessage>> {
        let row = sqlx::query(
            "SELECT id, conversation_id, sender_type, sender_name, content, created_at
             FROM messages WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChaperoneError::Database(format!("failed to get message: {}", e)))?;

        Ok(row.map(|r| message_from_row(&r)))
    }

    /// List a conversation's messages oldest-first.
    pub async fn list_messages(&self, conversation_id: i64) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, sender_type, sender_name, content, created_at
             FROM messages WHERE conversation_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChaperoneError::Database(format!("failed to list messages: {}", e)))?;

        Ok(rows.iter().map(message_from_row).collect())
    }

    // ========== Audit log ==========

    /// Append one audit record.
    pub async fn insert_moderation_log(&self, event: &ModerationEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO moderation_logs
               (conversation_id, message_content, sender_type, sender_name,
                violation_type, category, severity, action_taken)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.conversation_id)
        .bind(&event.content)
        .bind(event.sender_type.as_str())
        .bind(&event.sender_name)
        .bind(&event.violation_type)
        .bind(event.category.map(|c| c.as_str()))
        .bind(event.severity.map(|s| s.as_str()))
        .bind(&event.action_taken)
        .execute(&self.pool)
        .await
        .map_err(|e| ChaperoneError::Database(format!("failed to write audit record: {}", e)))?;

        Ok(())
    }

    /// Fetch the most recent audit records, newest-first.
    ///
    /// `limit` is capped at [`MAX_AUDIT_PAGE`].
    pub async fn recent_moderation_logs(&self, limit: u32) -> Result<Vec<ModerationLogEntry>> {
        let limit = limit.min(MAX_AUDIT_PAGE).max(1);

        let rows = sqlx::query(
            "SELECT id, conversation_id, message_content, sender_type, sender_name,
                    violation_type, category, severity, action_taken, created_at
             FROM moderation_logs ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChaperoneError::Database(format!("failed to fetch audit log: {}", e)))?;

        Ok(rows
            .iter()
            .map(|row| ModerationLogEntry {
                id: row.get("id"),
                conversation_id: row.get("conversation_id"),
                message_content: row.get("message_content"),
                sender_type: row.get("sender_type"),
                sender_name: row.get("sender_name"),
                violation_type: row.get("violation_type"),
                category: row.get("category"),
                severity: row.get("severity"),
                action_taken: row.get("action_taken"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    // ========== Creator settings ==========

    /// Get a creator's settings, defaulting to auto-block disabled.
    pub async fn get_creator_settings(&self, creator_name: &str) -> Result<CreatorSettings> {
        {
            let cache = self.settings_cache.read().await;
            if let Some(settings) = cache.get(creator_name) {
                return Ok(settings.clone());
            }
        }

        let row = sqlx::query(
            "SELECT creator_name, auto_block_threshold FROM creator_settings
             WHERE creator_name = ?",
        )
        .bind(creator_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChaperoneError::Database(format!("failed to get creator settings: {}", e)))?;

        let settings = match row {
            Some(row) => CreatorSettings {
                creator_name: row.get("creator_name"),
                auto_block_threshold: row.get::<i64, _>("auto_block_threshold") as u32,
            },
            None => CreatorSettings::disabled(creator_name),
        };

        {
            let mut cache = self.settings_cache.write().await;
            cache.insert(creator_name.to_string(), settings.clone());
        }

        Ok(settings)
    }

    /// Set a creator's auto-block threshold (0 disables).
    pub async fn set_creator_settings(&self, settings: &CreatorSettings) -> Result<()> {
        sqlx::query(
            "INSERT INTO creator_settings (creator_name, auto_block_threshold, updated_at)
             VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(creator_name) DO UPDATE SET
                auto_block_threshold = excluded.auto_block_threshold,
                updated_at = CURRENT_TIMESTAMP",
        )
        .bind(&settings.creator_name)
        .bind(settings.auto_block_threshold as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| ChaperoneError::Database(format!("failed to set creator settings: {}", e)))?;

        {
            let mut cache = self.settings_cache.write().await;
            cache.insert(settings.creator_name.clone(), settings.clone());
        }

        Ok(())
    }
}

fn conversation_from_row(row: &sqlx::sqlite::SqliteRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        creator_name: row.get("creator_name"),
        buyer_name: row.get("buyer_name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> StoredMessage {
    StoredMessage {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_type: row.get("sender_type"),
        sender_name: row.get("sender_name"),
        content: row.get("content"),
        created_at: row.get("created_at"),
    }
}

const SCHEMA: &str = r#"
-- Buyer-creator conversations
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    creator_name TEXT NOT NULL,
    buyer_name TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(creator_name, buyer_name)
);

-- Chat messages (only allowed/soft-warned messages are stored)
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL,
    sender_type TEXT NOT NULL,
    sender_name TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (conversation_id) REFERENCES conversations(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);

-- Audit log of warned/blocked/reported events
CREATE TABLE IF NOT EXISTS moderation_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER,
    message_content TEXT NOT NULL,
    sender_type TEXT NOT NULL,
    sender_name TEXT NOT NULL,
    violation_type TEXT NOT NULL,
    category TEXT,
    severity TEXT,
    action_taken TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- Append-only warning ledger; never pruned
CREATE TABLE IF NOT EXISTS warnings (
    id TEXT PRIMARY KEY,
    user_name TEXT NOT NULL,
    conversation_id INTEGER NOT NULL,
    category TEXT NOT NULL,
    reason TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_warnings_user ON warnings(user_name);

-- User reports, one per (message, reporter)
CREATE TABLE IF NOT EXISTS message_reports (
    id TEXT PRIMARY KEY,
    message_id INTEGER NOT NULL,
    reporter_name TEXT NOT NULL,
    reporter_role TEXT NOT NULL,
    reason TEXT NOT NULL,
    details TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(message_id, reporter_name)
);

-- Per-creator moderation settings
CREATE TABLE IF NOT EXISTS creator_settings (
    creator_name TEXT PRIMARY KEY,
    auto_block_threshold INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);
"#;
