use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::session::MessageRole;

pub const DEFAULT_MAX_HISTORY: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A buffered window as written by [`ConversationBuffer::export_json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationExport {
    pub conversation_id: String,
    pub exported_at: DateTime<Utc>,
    pub message_count: usize,
    pub messages: Vec<BufferedMessage>,
}

/// Short-term rolling context, one window per conversation key.
///
/// Nothing here is durable; the session store keeps the full history. Each
/// window holds at most `max_history` messages and drops the oldest first.
#[derive(Clone)]
pub struct ConversationBuffer {
    windows: Arc<DashMap<String, VecDeque<BufferedMessage>>>,
    max_history: usize,
}

impl Default for ConversationBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl ConversationBuffer {
    pub fn new(max_history: usize) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            max_history: max_history.max(1),
        }
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn add_message(
        &self,
        conversation: &str,
        role: MessageRole,
        content: impl Into<String>,
        metadata: Option<Value>,
    ) {
        let mut window = self.windows.entry(conversation.to_string()).or_default();
        window.push_back(BufferedMessage {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata,
        });
        while window.len() > self.max_history {
            window.pop_front();
        }
    }

    /// Buffered messages, oldest first.
    pub fn messages(&self, conversation: &str) -> Vec<BufferedMessage> {
        match self.windows.get(conversation) {
            Some(window) => window.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// The newest `max_messages` messages rendered as `"Role: content"` lines.
    pub fn context(&self, conversation: &str, max_messages: usize) -> String {
        let Some(window) = self.windows.get(conversation) else {
            return String::new();
        };
        let skip = window.len().saturating_sub(max_messages);
        window
            .iter()
            .skip(skip)
            .map(|m| format!("{}: {}\n", m.role.label(), m.content))
            .collect()
    }

    pub fn clear(&self, conversation: &str) {
        self.windows.remove(conversation);
    }

    pub fn export(&self, conversation: &str) -> ConversationExport {
        let messages = self.messages(conversation);
        ConversationExport {
            conversation_id: conversation.to_string(),
            exported_at: Utc::now(),
            message_count: messages.len(),
            messages,
        }
    }

    pub fn export_json(&self, conversation: &str) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.export(conversation))
    }
}
