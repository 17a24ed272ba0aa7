//! Usage counter log and its on-read aggregation
use crate::error::StoreError;
use crate::session_db::schema::*;
use crate::session_db::{get_conn, immediate, touch_session, SqlitePool};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct UsageStore {
    pool: Arc<SqlitePool>,
}

impl UsageStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub fn insert(&self, session_id: &str, tool: &str, action: &str) -> Result<(), StoreError> {
        let (_, now_str) = timestamp_now();
        immediate(&self.pool, |tx| {
            touch_session(tx, session_id, &now_str)?;
            tx.execute(
                "INSERT INTO usage_stats (session_id, tool_name, action_type, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, tool, action, now_str],
            )?;
            Ok(())
        })
    }

    /// Totals per tool and per action, read from one snapshot so the three
    /// figures always agree with each other.
    pub fn statistics(&self, session_id: &str) -> Result<UsageStatistics, StoreError> {
        let mut conn = get_conn(&self.pool)?;
        let tx = conn.transaction()?;

        let total: i64 = tx.query_row(
            "SELECT COUNT(*) FROM usage_stats WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        let tool_usage = grouped_counts(&tx, "tool_name", session_id)?;
        let action_usage = grouped_counts(&tx, "action_type", session_id)?;
        tx.commit()?;

        Ok(UsageStatistics {
            session_id: session_id.to_string(),
            total_actions: total as u64,
            tool_usage,
            action_usage,
        })
    }
}

fn grouped_counts(conn: &Connection, column: &str, session_id: &str) -> Result<BTreeMap<String, u64>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {col}, COUNT(*) FROM usage_stats WHERE session_id = ?1 GROUP BY {col}",
        col = column
    ))?;
    let mut rows = stmt.query([session_id])?;
    let mut counts = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        counts.insert(name, count as u64);
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use crate::session_db::SessionDatabase;

    #[test]
    fn test_statistics_groups_by_tool_and_action() {
        let db = SessionDatabase::open_in_memory().unwrap();
        for _ in 0..3 {
            db.usage.insert("s1", "smart_chat", "message_sent").unwrap();
        }
        db.usage.insert("s1", "vision_analysis", "page_visit").unwrap();

        let stats = db.usage.statistics("s1").unwrap();
        assert_eq!(stats.total_actions, 4);
        assert_eq!(stats.tool_usage["smart_chat"], 3);
        assert_eq!(stats.tool_usage["vision_analysis"], 1);
        assert_eq!(stats.action_usage["message_sent"], 3);
        assert_eq!(stats.action_usage["page_visit"], 1);
    }

    #[test]
    fn test_statistics_for_unknown_session_are_empty() {
        let db = SessionDatabase::open_in_memory().unwrap();
        let stats = db.usage.statistics("nobody").unwrap();
        assert_eq!(stats.total_actions, 0);
        assert!(stats.tool_usage.is_empty());
        assert!(stats.action_usage.is_empty());
    }
}
