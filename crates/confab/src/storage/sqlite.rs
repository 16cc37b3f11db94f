//! SQLite-backed conversation store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use super::models::{ConversationSnapshot, MessagePatch, MessageRole, MessageStatus, StoredMessage};
use super::traits::ConversationStore;

/// Schema for the conversation database.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    model TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    role TEXT NOT NULL CHECK(role IN ('user', 'assistant', 'system')),
    content TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'complete' CHECK(status IN ('pending', 'complete', 'error')),
    timestamp INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, timestamp);
"#;

/// Conversation store persisted in a local SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    /// Open or create the database at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory: {}", parent.display()))?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .context("parsing database URL")?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(3)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to conversation database: {}", path.display()))?;

        let store = Self { pool };
        store.initialize_schema().await?;

        Ok(store)
    }

    /// Open an in-memory database. Used by tests.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("parsing in-memory database URL")?;

        // A single connection keeps every query on the same memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("connecting to in-memory database")?;

        let store = Self { pool };
        store.initialize_schema().await?;

        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("initializing conversation database schema")?;
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<ConversationSnapshot>> {
        let model = sqlx::query_scalar::<_, Option<String>>(
            "SELECT model FROM conversations WHERE id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(self.pool())
        .await
        .context("fetching conversation")?;

        let rows = sqlx::query_as::<_, StoredMessage>(
            r#"
            SELECT id, conversation_id, role, content, status, timestamp, created_at
            FROM messages
            WHERE conversation_id = ?
            ORDER BY timestamp ASC, rowid ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(self.pool())
        .await
        .context("fetching conversation messages")?;

        if model.is_none() && rows.is_empty() {
            return Ok(None);
        }

        let history = rows
            .into_iter()
            .filter_map(|row| {
                let role: MessageRole = row.role.parse().ok()?;
                Some(super::models::HistoryMessage {
                    role,
                    content: row.content,
                })
            })
            .collect();

        Ok(Some(ConversationSnapshot {
            model: model.flatten(),
            history,
        }))
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        status: MessageStatus,
    ) -> Result<StoredMessage> {
        sqlx::query("INSERT OR IGNORE INTO conversations (id) VALUES (?)")
            .bind(conversation_id)
            .execute(self.pool())
            .await
            .context("ensuring conversation row")?;

        let id = Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content, status, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(role.to_string())
        .bind(content)
        .bind(status.to_string())
        .bind(timestamp)
        .execute(self.pool())
        .await
        .context("inserting message")?;

        sqlx::query_as::<_, StoredMessage>(
            "SELECT id, conversation_id, role, content, status, timestamp, created_at FROM messages WHERE id = ?",
        )
        .bind(&id)
        .fetch_one(self.pool())
        .await
        .context("fetching inserted message")
    }

    async fn update_message(&self, message_id: &str, patch: MessagePatch) -> Result<()> {
        if let Some(content) = patch.content {
            sqlx::query("UPDATE messages SET content = ? WHERE id = ?")
                .bind(&content)
                .bind(message_id)
                .execute(self.pool())
                .await
                .context("updating message content")?;
        }

        if let Some(status) = patch.status {
            sqlx::query("UPDATE messages SET status = ? WHERE id = ?")
                .bind(status.to_string())
                .bind(message_id)
                .execute(self.pool())
                .await
                .context("updating message status")?;
        }

        Ok(())
    }

    async fn set_conversation_model(&self, conversation_id: &str, model: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, model) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET model = excluded.model
            "#,
        )
        .bind(conversation_id)
        .bind(model)
        .execute(self.pool())
        .await
        .context("recording conversation model")?;
        Ok(())
    }
}
