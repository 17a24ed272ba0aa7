//! Conversation turn storage and retrieval
use crate::error::StoreError;
use crate::session::MessageRole;
use crate::session_db::schema::*;
use crate::session_db::{get_conn, immediate, touch_session, SqlitePool};
use rusqlite::{params, Row};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const MESSAGE_COLUMNS: &str =
    "id, session_id, tool_name, message_type, content, metadata, timestamp";

pub struct ConversationStore {
    pool: Arc<SqlitePool>,
}

impl ConversationStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub fn insert(
        &self,
        session_id: &str,
        tool: &str,
        role: MessageRole,
        content: &str,
        metadata: Option<&Value>,
    ) -> Result<ConversationMessage, StoreError> {
        let metadata_json = encode_metadata(metadata)?;
        let (now, now_str) = timestamp_now();

        let id = immediate(&self.pool, |tx| {
            touch_session(tx, session_id, &now_str)?;
            tx.execute(
                "INSERT INTO conversations
                 (session_id, tool_name, message_type, content, metadata, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![session_id, tool, role.as_str(), content, metadata_json, now_str],
            )?;
            Ok(tx.last_insert_rowid())
        })?;

        debug!("Stored {} message {} for session {} ({})", role, id, session_id, tool);
        Ok(ConversationMessage {
            id,
            session_id: session_id.to_string(),
            tool: tool.to_string(),
            role,
            content: content.to_string(),
            metadata: metadata.filter(|m| !m.is_null()).cloned(),
            created_at: now,
        })
    }

    /// The `limit` most recent turns for (session, tool), oldest first.
    pub fn recent(&self, session_id: &str, tool: &str, limit: usize) -> Result<Vec<ConversationMessage>, StoreError> {
        let conn = get_conn(&self.pool)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM conversations
             WHERE session_id = ?1 AND tool_name = ?2
             ORDER BY id DESC LIMIT ?3",
            MESSAGE_COLUMNS
        ))?;
        let mut rows = stmt.query(params![session_id, tool, limit as i64])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(Self::row_to_message(row)?);
        }
        messages.reverse();
        Ok(messages)
    }

    /// Every turn of the session across all tools, in insertion order.
    pub fn all_for_session(&self, session_id: &str) -> Result<Vec<ConversationMessage>, StoreError> {
        let conn = get_conn(&self.pool)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM conversations WHERE session_id = ?1 ORDER BY id",
            MESSAGE_COLUMNS
        ))?;
        let mut rows = stmt.query([session_id])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(Self::row_to_message(row)?);
        }
        Ok(messages)
    }

    pub fn count(&self, session_id: &str, tool: &str) -> Result<usize, StoreError> {
        let conn = get_conn(&self.pool)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conversations WHERE session_id = ?1 AND tool_name = ?2",
            params![session_id, tool],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Delete the session's turns for one tool, or for all tools.
    pub fn delete(&self, session_id: &str, tool: Option<&str>) -> Result<usize, StoreError> {
        let conn = get_conn(&self.pool)?;
        let deleted = match tool {
            Some(tool) => conn.execute(
                "DELETE FROM conversations WHERE session_id = ?1 AND tool_name = ?2",
                params![session_id, tool],
            )?,
            None => conn.execute("DELETE FROM conversations WHERE session_id = ?1", [session_id])?,
        };
        debug!("Deleted {} messages for session {}", deleted, session_id);
        Ok(deleted)
    }

    fn row_to_message(row: &Row) -> Result<ConversationMessage, StoreError> {
        let role: String = row.get(3)?;
        Ok(ConversationMessage {
            id: row.get(0)?,
            session_id: row.get(1)?,
            tool: row.get(2)?,
            role: role.parse()?,
            content: row.get(4)?,
            metadata: decode_metadata(row.get(5)?)?,
            created_at: parse_timestamp(&row.get::<_, String>(6)?)?,
        })
    }
}
