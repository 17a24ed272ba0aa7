//! Session-scoped handle over the shared [`SessionDatabase`].
//!
//! Every operation is bound to the handle's [`SessionId`]; there is no way to
//! read another session's records through it. SQLite work runs on the
//! blocking pool, and writes for one session go through that session's
//! async mutex so two handles sharing an id (two browser tabs) never
//! interleave.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::metrics;
use crate::session::{MessageRole, SessionId};
use crate::session_db::{
    AnalysisRecord, ConversationMessage, FileUploadRecord, NewUpload, SessionDatabase, SessionExport,
    UsageStatistics,
};
use crate::uploads::UploadDescriptor;

/// Analysis inputs longer than this many characters are stored truncated.
pub const MAX_ANALYSIS_INPUT_CHARS: usize = 2000;

#[derive(Clone)]
pub struct SessionStore {
    session_id: SessionId,
    db: Arc<SessionDatabase>,
}

impl SessionStore {
    pub fn new(db: Arc<SessionDatabase>, session_id: SessionId) -> Self {
        Self { session_id, db }
    }

    /// Handle for a freshly minted session.
    pub fn start(db: Arc<SessionDatabase>) -> Self {
        let session_id = SessionId::new();
        info!("Started session {}", session_id);
        Self::new(db, session_id)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn database(&self) -> &Arc<SessionDatabase> {
        &self.db
    }

    async fn blocking<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&SessionDatabase, &str) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let session_id = self.session_id.clone();
        let result = match tokio::task::spawn_blocking(move || f(&db, session_id.as_str())).await {
            Ok(result) => result,
            Err(e) => Err(StoreError::from(e)),
        };
        match &result {
            Ok(_) => metrics::inc_store_op(op, "ok"),
            Err(e) => {
                warn!("Session store {} failed for session {}: {}", op, self.session_id, e);
                metrics::inc_store_op(op, "error");
            }
        }
        result
    }

    async fn write<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&SessionDatabase, &str) -> Result<T, StoreError> + Send + 'static,
    {
        let lock = self.db.session_lock(self.session_id.as_str());
        let _guard = lock.lock().await;
        self.blocking(op, f).await
    }

    pub async fn record_message(
        &self,
        tool: impl AsRef<str>,
        role: MessageRole,
        content: impl Into<String>,
        metadata: Option<Value>,
    ) -> Result<ConversationMessage, StoreError> {
        let tool = tool.as_ref().to_string();
        let content = content.into();
        self.write("record_message", move |db, sid| {
            db.conversations.insert(sid, &tool, role, &content, metadata.as_ref())
        })
        .await
    }

    /// Up to `limit` most recent turns for `tool`, oldest first.
    pub async fn read_messages(&self, tool: impl AsRef<str>, limit: usize) -> Result<Vec<ConversationMessage>, StoreError> {
        if limit == 0 {
            return Err(StoreError::InvalidArgument("limit must be a positive integer".into()));
        }
        let tool = tool.as_ref().to_string();
        self.blocking("read_messages", move |db, sid| db.conversations.recent(sid, &tool, limit))
            .await
    }

    /// Clear one tool's conversation, or every conversation when `tool` is `None`.
    pub async fn clear_messages(&self, tool: Option<&str>) -> Result<usize, StoreError> {
        let tool = tool.map(str::to_string);
        self.write("clear_messages", move |db, sid| db.conversations.delete(sid, tool.as_deref()))
            .await
    }

    pub async fn record_analysis(
        &self,
        tool: impl AsRef<str>,
        category: impl Into<String>,
        input: Option<&str>,
        result: impl Into<String>,
        metadata: Option<Value>,
    ) -> Result<AnalysisRecord, StoreError> {
        let tool = tool.as_ref().to_string();
        let category = category.into();
        let input = input.map(truncate_input);
        let result = result.into();
        self.write("record_analysis", move |db, sid| {
            db.analyses
                .insert(sid, &tool, &category, input.as_deref(), &result, metadata.as_ref())
        })
        .await
    }

    /// Up to `limit` most recent analyses, newest first.
    pub async fn read_analyses(&self, tool: Option<&str>, limit: usize) -> Result<Vec<AnalysisRecord>, StoreError> {
        if limit == 0 {
            return Err(StoreError::InvalidArgument("limit must be a positive integer".into()));
        }
        let tool = tool.map(str::to_string);
        self.blocking("read_analyses", move |db, sid| db.analyses.recent(sid, tool.as_deref(), limit))
            .await
    }

    pub async fn set_preference<V: Serialize + ?Sized>(&self, key: impl Into<String>, value: &V) -> Result<(), StoreError> {
        let key = key.into();
        let value = serde_json::to_value(value)?;
        self.write("set_preference", move |db, sid| db.preferences.upsert(sid, &key, &value))
            .await
    }

    /// Stored value for `key`, or `default` when the key was never set.
    pub async fn get_preference<T>(&self, key: impl Into<String>, default: T) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let key = key.into();
        let stored = self
            .blocking("get_preference", move |db, sid| db.preferences.get(sid, &key))
            .await?;
        match stored {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(default),
        }
    }

    pub async fn all_preferences(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        self.blocking("all_preferences", |db, sid| db.preferences.all(sid)).await
    }

    pub async fn record_upload(
        &self,
        filename: impl Into<String>,
        file_type: impl Into<String>,
        size_bytes: u64,
        tool: impl AsRef<str>,
        content_hash: Option<String>,
    ) -> Result<FileUploadRecord, StoreError> {
        let filename = filename.into();
        let file_type = file_type.into();
        let tool = tool.as_ref().to_string();
        self.write("record_upload", move |db, sid| {
            db.uploads.insert(
                sid,
                &NewUpload {
                    tool: &tool,
                    filename: &filename,
                    file_type: &file_type,
                    size_bytes,
                    content_hash: content_hash.as_deref(),
                },
            )
        })
        .await
    }

    pub async fn record_upload_descriptor(
        &self,
        tool: impl AsRef<str>,
        descriptor: &UploadDescriptor,
    ) -> Result<FileUploadRecord, StoreError> {
        self.record_upload(
            descriptor.filename.clone(),
            descriptor.category.as_str(),
            descriptor.size_bytes,
            tool,
            Some(descriptor.content_hash.clone()),
        )
        .await
    }

    /// Upload audit entries, newest first.
    pub async fn read_uploads(&self, tool: Option<&str>) -> Result<Vec<FileUploadRecord>, StoreError> {
        let tool = tool.map(str::to_string);
        self.blocking("read_uploads", move |db, sid| db.uploads.list(sid, tool.as_deref()))
            .await
    }

    pub async fn record_usage(&self, tool: impl AsRef<str>, action: impl Into<String>) -> Result<(), StoreError> {
        let tool = tool.as_ref().to_string();
        let action = action.into();
        self.write("record_usage", move |db, sid| db.usage.insert(sid, &tool, &action))
            .await
    }

    pub async fn usage_statistics(&self) -> Result<UsageStatistics, StoreError> {
        self.blocking("usage_statistics", |db, sid| db.usage.statistics(sid)).await
    }

    /// Everything stored for this session. Holds the session's write lock so
    /// the dump never shows a half-applied write from a sibling handle.
    pub async fn export_session(&self) -> Result<SessionExport, StoreError> {
        let export = self
            .write("export_session", |db, sid| {
                let mut conversations: BTreeMap<String, Vec<ConversationMessage>> = BTreeMap::new();
                for message in db.conversations.all_for_session(sid)? {
                    conversations.entry(message.tool.clone()).or_default().push(message);
                }
                let mut analysis_history: BTreeMap<String, Vec<AnalysisRecord>> = BTreeMap::new();
                for record in db.analyses.all_for_session(sid)? {
                    analysis_history.entry(record.tool.clone()).or_default().push(record);
                }
                Ok(SessionExport {
                    session_id: sid.to_string(),
                    export_timestamp: chrono::Utc::now(),
                    session: db.get_session(sid)?,
                    conversations,
                    analysis_history,
                    preferences: db.preferences.all(sid)?,
                    file_uploads: db.uploads.list(sid, None)?,
                    usage_statistics: db.usage.statistics(sid)?,
                })
            })
            .await?;
        debug!("Exported session {}", self.session_id);
        Ok(export)
    }

    /// Irreversibly delete every record of this session.
    pub async fn clear_session(&self) -> Result<usize, StoreError> {
        let deleted = self.write("clear_session", |db, sid| db.clear_session(sid)).await?;
        // the write guard is gone; a sibling handle mid-write keeps its lock
        self.db.release_session_lock(self.session_id.as_str());
        Ok(deleted)
    }
}

fn truncate_input(input: &str) -> String {
    match input.char_indices().nth(MAX_ANALYSIS_INPUT_CHARS) {
        Some((cut, _)) => format!("{}...", &input[..cut]),
        None => input.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Tool;
    use serde_json::json;

    fn store() -> SessionStore {
        SessionStore::start(Arc::new(SessionDatabase::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn test_hello_transcript_reads_back_in_order() {
        let store = store();
        store.record_message("chat", MessageRole::User, "hello", None).await.unwrap();
        store.record_message("chat", MessageRole::Assistant, "hi there", None).await.unwrap();

        let messages = store.read_messages("chat", 10).await.unwrap();
        let turns: Vec<_> = messages.iter().map(|m| (m.role, m.content.as_str())).collect();
        assert_eq!(
            turns,
            vec![(MessageRole::User, "hello"), (MessageRole::Assistant, "hi there")]
        );
    }

    #[tokio::test]
    async fn test_zero_limit_is_rejected() {
        let store = store();
        let err = store.read_messages(Tool::SmartChat, 0).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert!(store.read_analyses(None, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_history_is_not_an_error() {
        let store = store();
        assert!(store.read_messages(Tool::CodeAssistant, 5).await.unwrap().is_empty());
        assert_eq!(store.clear_messages(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_usage_statistics_example() {
        let store = store();
        for _ in 0..3 {
            store.record_usage("smart_chat", "message_sent").await.unwrap();
        }
        store.record_usage("vision_analysis", "page_visit").await.unwrap();

        let stats = store.usage_statistics().await.unwrap();
        assert_eq!(stats.total_actions, 4);
        assert_eq!(
            stats.tool_usage,
            BTreeMap::from([("smart_chat".to_string(), 3), ("vision_analysis".to_string(), 1)])
        );
        assert_eq!(
            stats.action_usage,
            BTreeMap::from([("message_sent".to_string(), 3), ("page_visit".to_string(), 1)])
        );
        assert_eq!(stats.session_id, store.session_id().as_str());
    }

    #[tokio::test]
    async fn test_preference_default_and_upsert() {
        let store = store();
        assert_eq!(store.get_preference("max_tokens", 1000u32).await.unwrap(), 1000);

        store.set_preference("max_tokens", &512u32).await.unwrap();
        store.set_preference("max_tokens", &2048u32).await.unwrap();
        assert_eq!(store.get_preference("max_tokens", 0u32).await.unwrap(), 2048);
        assert_eq!(store.all_preferences().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_preference_type_mismatch_is_serialization_error() {
        let store = store();
        store.set_preference("theme", "dark").await.unwrap();
        let err = store.get_preference("theme", 0u32).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_long_analysis_input_is_truncated() {
        let store = store();
        let input = "x".repeat(MAX_ANALYSIS_INPUT_CHARS + 50);
        let record = store
            .record_analysis(Tool::DocumentIntelligence, "summary", Some(&input), "short", None)
            .await
            .unwrap();
        let stored = record.input.unwrap();
        assert_eq!(stored.len(), MAX_ANALYSIS_INPUT_CHARS + 3);
        assert!(stored.ends_with("..."));
    }

    #[tokio::test]
    async fn test_export_then_clear_session() {
        let store = store();
        store.record_message(Tool::SmartChat, MessageRole::User, "q", None).await.unwrap();
        store
            .record_analysis(Tool::DataAnalyst, "insights", Some("a,b\n1,2"), "trend up", Some(json!({"rows": 1})))
            .await
            .unwrap();
        store.set_preference("language", "en").await.unwrap();
        store.record_upload("data.csv", "data", 8, Tool::DataAnalyst, None).await.unwrap();
        store.record_usage(Tool::DataAnalyst, "analysis_run").await.unwrap();

        let export = store.export_session().await.unwrap();
        assert_eq!(export.conversations["smart_chat"].len(), 1);
        assert_eq!(export.analysis_history["data_analyst"][0].result, "trend up");
        assert_eq!(export.preferences["language"], json!("en"));
        assert_eq!(export.file_uploads.len(), 1);
        assert_eq!(export.usage_statistics.total_actions, 1);
        assert!(export.session.is_some());
        assert!(export.to_json_pretty().unwrap().contains("trend up"));

        store.clear_session().await.unwrap();
        assert!(store.export_session().await.unwrap().is_empty());
        assert!(store.read_messages(Tool::SmartChat, 10).await.unwrap().is_empty());
        assert!(store.read_uploads(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleared_sessions_do_not_accumulate_write_locks() {
        let db = Arc::new(SessionDatabase::open_in_memory().unwrap());
        for _ in 0..200 {
            let store = SessionStore::start(db.clone());
            store.record_usage(Tool::SmartChat, "page_visit").await.unwrap();
            store.clear_session().await.unwrap();
        }
        assert_eq!(db.tracked_session_locks(), 0);
    }

    #[tokio::test]
    async fn test_clear_session_keeps_lock_held_by_sibling() {
        let store = store();
        store.record_usage(Tool::SmartChat, "page_visit").await.unwrap();
        let held = store.database().session_lock(store.session_id().as_str());

        store.clear_session().await.unwrap();
        assert_eq!(store.database().tracked_session_locks(), 1);
        drop(held);
    }

    #[test]
    fn test_truncate_input_respects_char_boundaries() {
        let input = "é".repeat(MAX_ANALYSIS_INPUT_CHARS + 1);
        let out = truncate_input(&input);
        assert_eq!(out.chars().count(), MAX_ANALYSIS_INPUT_CHARS + 3);
    }
}
