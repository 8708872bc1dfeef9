//! Session and conversation history management.
//!
//! Sessions and messages live in SQLite — the source of truth survives
//! process restarts, and no in-process session state is kept. Messages are
//! append-only; sessions are soft-deleted by flipping their status.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Message, MessageRole, Session, SessionStatus, SourceCitation};

/// Fields for one appended message turn.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub content: String,
    pub related_file_ids: Option<Vec<String>>,
    /// Raw evidence snapshot for auditing.
    pub search_results: Option<serde_json::Value>,
    pub sources: Option<Vec<SourceCitation>>,
    pub latency_ms: Option<i64>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session. A missing or blank name gets a timestamped default.
    async fn create_session(&self, user_id: &str, name: Option<&str>) -> Result<Session>;

    /// Return the session only if it belongs to `user_id` and is active.
    async fn validate_session(&self, session_id: &str, user_id: &str)
        -> Result<Option<Session>>;

    /// Active sessions for a user, most recently updated first.
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>>;

    /// Rename a session. Returns false if it is not accessible to the user.
    async fn rename_session(&self, session_id: &str, user_id: &str, name: &str) -> Result<bool>;

    /// Soft-delete a session. Returns false if it is not accessible to the user.
    async fn delete_session(&self, session_id: &str, user_id: &str) -> Result<bool>;

    /// Append one turn and touch the session's `updated_at`.
    async fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        message: NewMessage,
    ) -> Result<()>;

    /// Last `limit` turns in chronological (oldest-first) order.
    ///
    /// Queried newest-first to bound the read, then reversed.
    async fn recent_turns(&self, session_id: &str, limit: i64) -> Result<Vec<Message>>;

    /// Paginated history in chronological order, with the total turn count.
    async fn history(
        &self,
        session_id: &str,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Message>, i64)>;

    /// Append one row to the search audit log.
    async fn log_search(
        &self,
        user_id: &str,
        query: &str,
        search_type: &str,
        file_ids: Option<&[String]>,
        result_count: usize,
        latency_ms: i64,
    ) -> Result<()>;
}

// ============ SQLite implementation ============

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn session_from_row(row: &sqlx::sqlite::SqliteRow) -> Session {
    let status: String = row.get("status");
    Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Deleted),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> Message {
    let role: String = row.get("role");
    let related: Option<String> = row.get("related_file_ids");
    let results: Option<String> = row.get("search_results");
    let sources: Option<String> = row.get("sources");

    Message {
        id: row.get("id"),
        session_id: row.get("session_id"),
        role: MessageRole::parse(&role).unwrap_or(MessageRole::Assistant),
        content: row.get("content"),
        related_file_ids: related.and_then(|s| serde_json::from_str(&s).ok()),
        search_results: results.and_then(|s| serde_json::from_str(&s).ok()),
        sources: sources.and_then(|s| serde_json::from_str(&s).ok()),
        latency_ms: row.get("latency_ms"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create_session(&self, user_id: &str, name: Option<&str>) -> Result<Session> {
        let now = Utc::now();
        let name = match name {
            Some(n) if !n.trim().is_empty() => n.trim().to_string(),
            _ => format!("Chat {}", now.format("%Y%m%d_%H%M%S")),
        };

        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name,
            status: SessionStatus::Active,
            created_at: now.timestamp_millis(),
            updated_at: now.timestamp_millis(),
        };

        sqlx::query(
            r#"
            INSERT INTO chat_sessions (id, user_id, name, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.name)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    async fn validate_session(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(session_from_row).filter(|s| {
            s.user_id == user_id && s.status == SessionStatus::Active
        }))
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM chat_sessions
            WHERE user_id = ? AND status = 'active'
            ORDER BY updated_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn rename_session(&self, session_id: &str, user_id: &str, name: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE chat_sessions SET name = ?, updated_at = ?
            WHERE id = ? AND user_id = ? AND status = 'active'
            "#,
        )
        .bind(name)
        .bind(Utc::now().timestamp_millis())
        .bind(session_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_session(&self, session_id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE chat_sessions SET status = 'deleted', updated_at = ?
            WHERE id = ? AND user_id = ? AND status = 'active'
            "#,
        )
        .bind(Utc::now().timestamp_millis())
        .bind(session_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        message: NewMessage,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();

        let related = message
            .related_file_ids
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let results = message
            .search_results
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let sources = message
            .sources
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO chat_messages
                (id, session_id, role, content, related_file_ids,
                 search_results, sources, latency_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(session_id)
        .bind(role.as_str())
        .bind(&message.content)
        .bind(related)
        .bind(results)
        .bind(sources)
        .bind(message.latency_ms)
        .bind(now)
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE chat_sessions SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn recent_turns(&self, session_id: &str, limit: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM chat_messages
            WHERE session_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<Message> = rows.iter().map(message_from_row).collect();
        messages.reverse();
        Ok(messages)
    }

    async fn history(
        &self,
        session_id: &str,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Message>, i64)> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);
        let offset = (page - 1) * page_size;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM chat_messages
            WHERE session_id = ?
            ORDER BY created_at ASC, rowid ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(session_id)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows.iter().map(message_from_row).collect(), total))
    }

    async fn log_search(
        &self,
        user_id: &str,
        query: &str,
        search_type: &str,
        file_ids: Option<&[String]>,
        result_count: usize,
        latency_ms: i64,
    ) -> Result<()> {
        let file_ids = file_ids.map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO search_history
                (id, user_id, query, search_type, file_ids, result_count, latency_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(query)
        .bind(search_type)
        .bind(file_ids)
        .bind(result_count as i64)
        .bind(latency_ms)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
