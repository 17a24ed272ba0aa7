//! Per-session preferences: one row per (session, key), written by upsert.
use crate::error::StoreError;
use crate::session_db::schema::timestamp_now;
use crate::session_db::{get_conn, immediate, touch_session, SqlitePool};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub struct PreferenceStore {
    pool: Arc<SqlitePool>,
}

impl PreferenceStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Insert or overwrite `key`. Runs in an IMMEDIATE transaction so two
    /// writers to the same key cannot lose an update.
    pub fn upsert(&self, session_id: &str, key: &str, value: &Value) -> Result<(), StoreError> {
        let value_json = serde_json::to_string(value)?;
        let (_, now_str) = timestamp_now();
        immediate(&self.pool, |tx| {
            touch_session(tx, session_id, &now_str)?;
            tx.execute(
                "INSERT INTO user_preferences (session_id, preference_key, preference_value, timestamp)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id, preference_key)
                 DO UPDATE SET preference_value = excluded.preference_value,
                               timestamp = excluded.timestamp",
                params![session_id, key, value_json, now_str],
            )?;
            Ok(())
        })?;
        debug!("Set preference {} for session {}", key, session_id);
        Ok(())
    }

    pub fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let conn = get_conn(&self.pool)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT preference_value FROM user_preferences
                 WHERE session_id = ?1 AND preference_key = ?2",
                params![session_id, key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|text| serde_json::from_str(&text).map_err(StoreError::from))
            .transpose()
    }

    pub fn all(&self, session_id: &str) -> Result<BTreeMap<String, Value>, StoreError> {
        let conn = get_conn(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT preference_key, preference_value FROM user_preferences WHERE session_id = ?1",
        )?;
        let mut rows = stmt.query([session_id])?;
        let mut preferences = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            preferences.insert(key, serde_json::from_str(&value)?);
        }
        Ok(preferences)
    }
}

#[cfg(test)]
mod tests {
    use crate::session_db::SessionDatabase;
    use serde_json::json;

    #[test]
    fn test_upsert_overwrites_without_duplicating() {
        let db = SessionDatabase::open_in_memory().unwrap();
        db.preferences.upsert("s1", "temperature", &json!(0.2)).unwrap();
        db.preferences.upsert("s1", "temperature", &json!(0.9)).unwrap();

        assert_eq!(db.preferences.get("s1", "temperature").unwrap(), Some(json!(0.9)));
        assert_eq!(db.preferences.all("s1").unwrap().len(), 1);
        assert_eq!(db.info().unwrap().table_counts["user_preferences"], 1);
    }

    #[test]
    fn test_missing_key_is_none() {
        let db = SessionDatabase::open_in_memory().unwrap();
        assert_eq!(db.preferences.get("s1", "absent").unwrap(), None);
    }

    #[test]
    fn test_same_key_in_two_sessions_is_independent() {
        let db = SessionDatabase::open_in_memory().unwrap();
        db.preferences.upsert("s1", "style", &json!({"tone": "formal"})).unwrap();
        db.preferences.upsert("s2", "style", &json!({"tone": "casual"})).unwrap();
        assert_eq!(db.preferences.get("s1", "style").unwrap(), Some(json!({"tone": "formal"})));
        assert_eq!(db.preferences.get("s2", "style").unwrap(), Some(json!({"tone": "casual"})));
    }
}
