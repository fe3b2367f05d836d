//! The tool contract.
//!
//! Context travels as an argument of `execute` rather than a mutable
//! field on the tool, so concurrent executions can never observe each
//! other's chat or user identity.

use std::path::PathBuf;

use janus_domain::{Result, ToolSpec};

/// Per-invocation context injected by the agent loop.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub workspace_dir: PathBuf,
    pub exec_deny_patterns: Vec<String>,
    /// Per-call shell timeout in milliseconds.
    pub exec_timeout_ms: u64,
    /// Byte cap for fs tool reads and writes.
    pub max_file_size: u64,
    pub chat_id: String,
    pub user_id: Option<String>,
    /// User-level allow list; `None` means everything not denied.
    pub tool_allow: Option<Vec<String>>,
    pub tool_deny: Vec<String>,
    pub content_policy: Option<String>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("."),
            exec_deny_patterns: Vec::new(),
            exec_timeout_ms: 30_000,
            max_file_size: 1_048_576,
            chat_id: String::new(),
            user_id: None,
            tool_allow: None,
            tool_deny: Vec::new(),
            content_policy: None,
        }
    }
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the tool's parameters.
    fn parameters(&self) -> serde_json::Value;

    /// Run the tool. Failures become a leading-`Error:` string at the
    /// registry boundary and are fed back to the model.
    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<String>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}
