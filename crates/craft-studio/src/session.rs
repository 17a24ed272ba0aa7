//! Session identity and the vocabulary shared by every record: which tool
//! produced it and who authored a conversation turn.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Opaque per-session token. Minted once from 128 random bits and rendered
/// as 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        let bits: u128 = rand::random();
        Self(format!("{:032x}", bits))
    }

    /// Resume a session from a previously issued token.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(StoreError::InvalidArgument("session id must not be empty".into()));
        }
        if raw.len() > 128 || !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(StoreError::InvalidArgument(format!("malformed session id: {}", raw)));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The functional areas that share the store and the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    SmartChat,
    VisionAnalysis,
    DocumentIntelligence,
    CodeAssistant,
    CreativeWriter,
    DataAnalyst,
}

impl Tool {
    pub const ALL: [Tool; 6] = [
        Tool::SmartChat,
        Tool::VisionAnalysis,
        Tool::DocumentIntelligence,
        Tool::CodeAssistant,
        Tool::CreativeWriter,
        Tool::DataAnalyst,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::SmartChat => "smart_chat",
            Tool::VisionAnalysis => "vision_analysis",
            Tool::DocumentIntelligence => "document_intelligence",
            Tool::CodeAssistant => "code_assistant",
            Tool::CreativeWriter => "creative_writer",
            Tool::DataAnalyst => "data_analyst",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Tool {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for Tool {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tool::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| StoreError::InvalidArgument(format!("unknown tool: {}", s)))
    }
}

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    /// Capitalized label used when rendering a transcript.
    pub fn label(&self) -> &'static str {
        match self {
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(StoreError::Corrupt(format!("unknown message role: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_is_128_bit_hex() {
        let id = SessionId::new();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_session_ids_are_distinct() {
        let ids: std::collections::HashSet<SessionId> = (0..1000).map(|_| SessionId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_session_id_parse_rejects_empty_and_malformed() {
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("   ").is_err());
        assert!(SessionId::parse("abc; DROP TABLE").is_err());
        assert_eq!(SessionId::parse("session_20240101").unwrap().as_str(), "session_20240101");
    }

    #[test]
    fn test_tool_names_round_trip() {
        for tool in Tool::ALL {
            assert_eq!(tool.as_str().parse::<Tool>().unwrap(), tool);
        }
        assert!("spreadsheet".parse::<Tool>().is_err());
    }

    #[test]
    fn test_message_role_parsing() {
        assert_eq!("user".parse::<MessageRole>().unwrap(), MessageRole::User);
        assert_eq!("assistant".parse::<MessageRole>().unwrap(), MessageRole::Assistant);
        assert!("system".parse::<MessageRole>().is_err());
        assert_eq!(MessageRole::Assistant.label(), "Assistant");
    }
}
