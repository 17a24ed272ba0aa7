//! Analysis result storage
use crate::error::StoreError;
use crate::session_db::schema::*;
use crate::session_db::{get_conn, immediate, touch_session, SqlitePool};
use rusqlite::{params, Row, ToSql};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const ANALYSIS_COLUMNS: &str =
    "id, session_id, tool_name, analysis_type, input_data, result, metadata, timestamp";

pub struct AnalysisStore {
    pool: Arc<SqlitePool>,
}

impl AnalysisStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub fn insert(
        &self,
        session_id: &str,
        tool: &str,
        category: &str,
        input: Option<&str>,
        result: &str,
        metadata: Option<&Value>,
    ) -> Result<AnalysisRecord, StoreError> {
        let metadata_json = encode_metadata(metadata)?;
        let (now, now_str) = timestamp_now();

        let id = immediate(&self.pool, |tx| {
            touch_session(tx, session_id, &now_str)?;
            tx.execute(
                "INSERT INTO analysis_history
                 (session_id, tool_name, analysis_type, input_data, result, metadata, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![session_id, tool, category, input, result, metadata_json, now_str],
            )?;
            Ok(tx.last_insert_rowid())
        })?;

        debug!("Stored {} analysis {} for session {}", category, id, session_id);
        Ok(AnalysisRecord {
            id,
            session_id: session_id.to_string(),
            tool: tool.to_string(),
            category: category.to_string(),
            input: input.map(str::to_string),
            result: result.to_string(),
            metadata: metadata.filter(|m| !m.is_null()).cloned(),
            created_at: now,
        })
    }

    /// Up to `limit` most recent analyses, newest first, optionally for one tool.
    pub fn recent(&self, session_id: &str, tool: Option<&str>, limit: usize) -> Result<Vec<AnalysisRecord>, StoreError> {
        let conn = get_conn(&self.pool)?;
        let limit = limit as i64;
        let mut query = format!("SELECT {} FROM analysis_history WHERE session_id = ?", ANALYSIS_COLUMNS);
        let mut bindings: Vec<&dyn ToSql> = vec![&session_id];
        if let Some(tool) = tool.as_ref() {
            query.push_str(" AND tool_name = ?");
            bindings.push(tool);
        }
        query.push_str(" ORDER BY id DESC LIMIT ?");
        bindings.push(&limit);

        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(bindings))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(Self::row_to_record(row)?);
        }
        Ok(records)
    }

    /// Every analysis of the session, in insertion order.
    pub fn all_for_session(&self, session_id: &str) -> Result<Vec<AnalysisRecord>, StoreError> {
        let conn = get_conn(&self.pool)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM analysis_history WHERE session_id = ?1 ORDER BY id",
            ANALYSIS_COLUMNS
        ))?;
        let mut rows = stmt.query([session_id])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(Self::row_to_record(row)?);
        }
        Ok(records)
    }

    fn row_to_record(row: &Row) -> Result<AnalysisRecord, StoreError> {
        Ok(AnalysisRecord {
            id: row.get(0)?,
            session_id: row.get(1)?,
            tool: row.get(2)?,
            category: row.get(3)?,
            input: row.get(4)?,
            result: row.get(5)?,
            metadata: decode_metadata(row.get(6)?)?,
            created_at: parse_timestamp(&row.get::<_, String>(7)?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::session_db::SessionDatabase;

    #[test]
    fn test_recent_is_newest_first() {
        let db = SessionDatabase::open_in_memory().unwrap();
        db.analyses.insert("s1", "document_intelligence", "summary", Some("doc"), "first", None).unwrap();
        db.analyses.insert("s1", "document_intelligence", "qa", None, "second", None).unwrap();
        let records = db.analyses.recent("s1", None, 10).unwrap();
        assert_eq!(records[0].result, "second");
        assert_eq!(records[1].result, "first");
        assert_eq!(records[1].input.as_deref(), Some("doc"));
    }

    #[test]
    fn test_recent_with_tool_filter_and_limit() {
        let db = SessionDatabase::open_in_memory().unwrap();
        for i in 0..4 {
            db.analyses.insert("s1", "code_assistant", "review", None, &format!("r{}", i), None).unwrap();
        }
        db.analyses.insert("s1", "data_analyst", "insights", None, "chart", None).unwrap();

        let code = db.analyses.recent("s1", Some("code_assistant"), 2).unwrap();
        assert_eq!(code.len(), 2);
        assert_eq!(code[0].result, "r3");
        assert!(code.iter().all(|r| r.tool == "code_assistant"));

        let other_session = db.analyses.recent("s2", None, 10).unwrap();
        assert!(other_session.is_empty());
    }
}
