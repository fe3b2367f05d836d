//! Provider-agnostic conversation types.
//!
//! `LlmMessage` is a closed tagged sum: the session log on disk is one
//! JSON object per line with a `role` discriminant, and every provider
//! adapter converts to/from this shape.

use serde::{Deserialize, Serialize};

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One message in a conversation. The four variants are the full set;
/// a `Tool` message is only valid after an `Assistant` that referenced
/// the same `tool_call_id` (see [`strip_orphan_tool_prefix`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum LlmMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    /// The textual content of the message, whatever the variant.
    pub fn content(&self) -> &str {
        match self {
            LlmMessage::System { content }
            | LlmMessage::User { content }
            | LlmMessage::Assistant { content, .. }
            | LlmMessage::Tool { content, .. } => content,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            LlmMessage::System { .. } => "system",
            LlmMessage::User { .. } => "user",
            LlmMessage::Assistant { .. } => "assistant",
            LlmMessage::Tool { .. } => "tool",
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, LlmMessage::System { .. })
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, LlmMessage::Tool { .. })
    }
}

/// Drop any leading run of `tool`-role messages.
///
/// A session log can start with tool results whose assistant pair was lost
/// to a crash mid-iteration; such a prefix would be rejected by providers,
/// so it is discarded before reuse.
pub fn strip_orphan_tool_prefix(messages: &mut Vec<LlmMessage>) -> usize {
    let orphans = messages.iter().take_while(|m| m.is_tool()).count();
    if orphans > 0 {
        messages.drain(..orphans);
    }
    orphans
}

/// A tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// Token usage for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_roundtrips_with_role_tag() {
        let msg = LlmMessage::assistant_with_tools(
            "working on it",
            vec![ToolCall {
                id: "tc_1".into(),
                name: "exec".into(),
                arguments: serde_json::json!({"command": "ls"}),
            }],
        );
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"assistant\""));
        let back: LlmMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn assistant_without_tool_calls_omits_field() {
        let json = serde_json::to_string(&LlmMessage::assistant("hi")).unwrap();
        assert!(!json.contains("tool_calls"));
    }

    #[test]
    fn tool_message_parses_with_call_id() {
        let line = r#"{"role":"tool","content":"ok","tool_call_id":"tc_9"}"#;
        let msg: LlmMessage = serde_json::from_str(line).unwrap();
        assert_eq!(msg.role(), "tool");
        assert_eq!(msg.content(), "ok");
    }

    #[test]
    fn strip_orphans_removes_leading_tool_run() {
        let mut messages = vec![
            LlmMessage::tool_result("tc_1", "stale"),
            LlmMessage::tool_result("tc_2", "stale"),
            LlmMessage::user("hello"),
            LlmMessage::tool_result("tc_3", "kept"),
        ];
        let dropped = strip_orphan_tool_prefix(&mut messages);
        assert_eq!(dropped, 2);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role(), "user");
        // A tool message later in the log is not part of the prefix.
        assert_eq!(messages[1].role(), "tool");
    }

    #[test]
    fn strip_orphans_noop_on_clean_log() {
        let mut messages = vec![LlmMessage::user("hi"), LlmMessage::assistant("hello")];
        assert_eq!(strip_orphan_tool_prefix(&mut messages), 0);
        assert_eq!(messages.len(), 2);
    }
}
