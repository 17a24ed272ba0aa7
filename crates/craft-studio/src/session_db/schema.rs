//! Record types persisted by the session database, plus the timestamp
//! helpers every store shares.
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::StoreError;
use crate::session::MessageRole;

/// Tables holding per-session records, in the order they are exported and cleared.
pub const RECORD_TABLES: [&str; 5] = [
    "conversations",
    "analysis_history",
    "user_preferences",
    "file_uploads",
    "usage_stats",
];

/// Registry row for a session: first and most recent write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// One conversation turn within a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: i64,
    pub session_id: String,
    pub tool: String,
    pub role: MessageRole,
    pub content: String,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Result of a non-conversational analysis (document Q&A, code review, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: i64,
    pub session_id: String,
    pub tool: String,
    pub category: String,
    pub input: Option<String>,
    pub result: String,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Audit entry for an uploaded file. Never used for content reuse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileUploadRecord {
    pub id: i64,
    pub session_id: String,
    pub tool: String,
    pub filename: String,
    pub file_type: String,
    pub size_bytes: u64,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`FileUploadRecord`] creation.
#[derive(Debug, Clone)]
pub struct NewUpload<'a> {
    pub tool: &'a str,
    pub filename: &'a str,
    pub file_type: &'a str,
    pub size_bytes: u64,
    pub content_hash: Option<&'a str>,
}

/// Aggregated usage counters for one session, computed on read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStatistics {
    pub session_id: String,
    pub total_actions: u64,
    pub tool_usage: BTreeMap<String, u64>,
    pub action_usage: BTreeMap<String, u64>,
}

/// Full dump of everything stored for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub session_id: String,
    pub export_timestamp: DateTime<Utc>,
    pub session: Option<SessionRecord>,
    pub conversations: BTreeMap<String, Vec<ConversationMessage>>,
    pub analysis_history: BTreeMap<String, Vec<AnalysisRecord>>,
    pub preferences: BTreeMap<String, Value>,
    pub file_uploads: Vec<FileUploadRecord>,
    pub usage_statistics: UsageStatistics,
}

impl SessionExport {
    pub fn to_json_pretty(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.session.is_none()
            && self.conversations.is_empty()
            && self.analysis_history.is_empty()
            && self.preferences.is_empty()
            && self.file_uploads.is_empty()
            && self.usage_statistics.total_actions == 0
    }
}

/// Database-wide housekeeping figures.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub database_path: Option<PathBuf>,
    pub database_size_bytes: i64,
    pub schema_version: i32,
    pub total_sessions: i64,
    pub table_counts: BTreeMap<String, i64>,
}

/// Current time and its stored text form.
///
/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that text
/// comparison in SQL matches chronological order.
pub(crate) fn timestamp_now() -> (DateTime<Utc>, String) {
    let now = Utc::now();
    let text = format_timestamp(&now);
    (now, text)
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    // SQLite CURRENT_TIMESTAMP format, for rows written by external tools
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(DateTime::from_naive_utc_and_offset(dt, Utc));
    }
    Err(StoreError::Corrupt(format!("unparseable timestamp: {}", raw)))
}

pub(crate) fn encode_metadata(metadata: Option<&Value>) -> Result<Option<String>, StoreError> {
    match metadata {
        Some(Value::Null) | None => Ok(None),
        Some(value) => Ok(Some(serde_json::to_string(value)?)),
    }
}

pub(crate) fn decode_metadata(raw: Option<String>) -> Result<Option<Value>, StoreError> {
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}
