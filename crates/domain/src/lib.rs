//! Shared types for the Janus agent runtime: errors, configuration,
//! conversation messages, bus messages, stream events, and user identity.

pub mod config;
pub mod error;
pub mod llm;
pub mod message;
pub mod stream;
pub mod user;

pub use error::{Error, Result};
pub use llm::{strip_orphan_tool_prefix, LlmMessage, ToolCall, ToolSpec, Usage};
pub use message::{
    ContextMode, InboundMessage, OutboundKind, OutboundMessage, Scope, ScopeKind, UserBinding,
};
pub use stream::{BoxStream, StreamEvent};
