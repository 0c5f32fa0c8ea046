//! Chat session and message types for Parlor.
//!
//! These types model persisted conversation history: a `ChatSession` owns an
//! ordered set of `ChatMessage` rows, all scoped to a single `OwnerScope`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

use crate::owner::OwnerScope;

/// Role of a message within a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// A conversation thread scoped to exactly one owner.
///
/// `message_count` and `last_message_at` are denormalized counters bumped on
/// every append; message rows remain the ground truth and a repair pass can
/// recompute both (see parlor-core's repair module). `last_message_at` never
/// decreases, regardless of message arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub session_id: String,
    pub owner: OwnerScope,
    pub title: String,
    /// Which generation backend produced the assistant replies (opaque).
    pub backend: String,
    /// Model identifier within the backend (opaque).
    pub model: String,
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Store-level TTL; rows past this instant vanish without explicit delete.
    pub expires_at: DateTime<Utc>,
}

/// One immutable turn within a session.
///
/// Messages are append-only: there is no edit operation, and rows are
/// destroyed only by the parent session's cascading delete or TTL expiry.
/// Ordering within a session is by `(timestamp, message_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub session_id: String,
    pub message_id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<ToolInvocation>>,
    /// Store-level TTL; rows past this instant vanish without explicit delete.
    pub expires_at: DateTime<Utc>,
}

/// Token accounting for a single message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Record of one tool invocation that contributed to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_roundtrip() {
        for role in [MessageRole::System, MessageRole::User, MessageRole::Assistant] {
            let s = role.to_string();
            let parsed: MessageRole = s.parse().unwrap();
            assert_eq!(role, parsed);
        }
    }

    #[test]
    fn test_message_role_serde() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }

    #[test]
    fn test_chat_session_serialize() {
        let now = Utc::now();
        let session = ChatSession {
            session_id: "s1".to_string(),
            owner: OwnerScope::personal("u1"),
            title: "Test chat".to_string(),
            backend: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            message_count: 5,
            created_at: now,
            updated_at: now,
            last_message_at: now,
            tags: Vec::new(),
            metadata: serde_json::Map::new(),
            expires_at: now,
        };
        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"kind\":\"personal\""));
        // Empty tags/metadata are omitted from the wire shape.
        assert!(!json.contains("\"tags\""));
    }

    #[test]
    fn test_chat_message_optional_fields_omitted() {
        let now = Utc::now();
        let msg = ChatMessage {
            session_id: "s1".to_string(),
            message_id: "m1".to_string(),
            role: MessageRole::User,
            content: "hello".to_string(),
            timestamp: now,
            usage: None,
            context: None,
            expires_at: now,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("usage"));
        assert!(!json.contains("context"));
    }
}
