//! Bus message types.
//!
//! `InboundMessage` is produced by channel adapters and the scheduler;
//! `OutboundMessage` is produced by the agent loop and dispatched to the
//! channel handler registered under its channel name. Both are immutable
//! values; handlers never mutate them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How much system context to assemble for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    #[default]
    Full,
    Minimal,
}

/// Identity carried by a channel adapter alongside a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserBinding {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub channel_user_id: Option<String>,
    #[serde(default)]
    pub channel_username: Option<String>,
}

/// Tenancy dimension for memory retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    User,
    Family,
    /// Unrecognized kinds retrieve only global memory.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    pub kind: ScopeKind,
    pub id: String,
}

impl Scope {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: ScopeKind::User,
            id: id.into(),
        }
    }

    pub fn family(id: impl Into<String>) -> Self {
        Self {
            kind: ScopeKind::Family,
            id: id.into(),
        }
    }
}

/// A message entering the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context_mode: Option<ContextMode>,
    #[serde(default)]
    pub user: Option<UserBinding>,
    #[serde(default)]
    pub scope: Option<Scope>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            author: author.into(),
            timestamp: Utc::now(),
            context_mode: None,
            user: None,
            scope: None,
        }
    }

    /// Synthesize a system-origin message (scheduler, heartbeat).
    pub fn system(chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new("system", chat_id, content, "system")
    }

    /// The session key this message routes to.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

/// Delivery type of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    Message,
    Chunk,
    StreamEnd,
}

/// A message leaving the agent loop toward a channel handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub kind: OutboundKind,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
        kind: OutboundKind,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_joins_channel_and_chat() {
        let msg = InboundMessage::new("telegram", "4242", "hi", "wt");
        assert_eq!(msg.session_key(), "telegram:4242");
    }

    #[test]
    fn system_message_has_system_channel() {
        let msg = InboundMessage::system("cron:7", "[Cron job: backup]\n\nrun backup");
        assert_eq!(msg.channel, "system");
        assert_eq!(msg.author, "system");
    }

    #[test]
    fn unknown_scope_kind_deserializes() {
        let scope: Scope = serde_json::from_str(r#"{"kind":"team","id":"x"}"#).unwrap();
        assert_eq!(scope.kind, ScopeKind::Unknown);
    }

    #[test]
    fn outbound_kind_uses_snake_case() {
        let json = serde_json::to_string(&OutboundKind::StreamEnd).unwrap();
        assert_eq!(json, "\"stream_end\"");
    }
}
