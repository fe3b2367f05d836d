//! Tool registry: name-to-tool map with user policy, gate interlock, and
//! error normalization.
//!
//! `execute` enforces, in order: unknown tool, user allow list, user
//! deny list, gate confirmation, then the tool itself. Every failure
//! becomes a string (leading `Error:` for failures, fixed phrases for
//! denials) so the model always receives a tool result it can react to.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use janus_domain::ToolSpec;

use crate::gate::{Confirmer, GatePolicy};
use crate::tool::{Tool, ToolContext};

pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
    gate: RwLock<Option<(GatePolicy, Arc<dyn Confirmer>)>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
            gate: RwLock::new(None),
        }
    }

    /// Registration happens at boot; later registrations replace by name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.write().insert(tool.name().to_string(), tool);
    }

    pub fn set_gate(&self, policy: GatePolicy, confirmer: Arc<dyn Confirmer>) {
        *self.gate.write() = Some((policy, confirmer));
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }

    /// Tool definitions filtered by a user's allow/deny lists, for the
    /// LLM request and the prompt's tool summary.
    pub fn specs_for(
        &self,
        allow: Option<&Vec<String>>,
        deny: &[String],
    ) -> Vec<ToolSpec> {
        self.tools
            .read()
            .values()
            .filter(|t| {
                let name = t.name();
                if let Some(allow) = allow {
                    if !allow.iter().any(|a| a == name) {
                        return false;
                    }
                }
                !deny.iter().any(|d| d == name)
            })
            .map(|t| t.spec())
            .collect()
    }

    pub async fn execute(&self, name: &str, args: serde_json::Value, ctx: &ToolContext) -> String {
        let Some(tool) = self.tools.read().get(name).cloned() else {
            return format!(
                "Error: Unknown tool \"{name}\". Available tools: {}",
                self.names().join(", ")
            );
        };

        if let Some(allow) = &ctx.tool_allow {
            if !allow.iter().any(|a| a == name) {
                return format!("Error: Tool \"{name}\" is not available for this user.");
            }
        }
        if ctx.tool_deny.iter().any(|d| d == name) {
            return format!("Error: Tool \"{name}\" is not available for this user.");
        }

        if let Some(command) = self.gate_match(name, &args) {
            let confirmer = {
                let gate = self.gate.read();
                gate.as_ref().map(|(_, c)| c.clone())
            };
            if let Some(confirmer) = confirmer {
                let prompt = format!("Allow execution of: {command}");
                if !confirmer.confirm(&prompt).await {
                    tracing::info!(tool = name, command = %command, "gate denied tool call");
                    return format!("Action denied by user: {command}");
                }
            }
        }

        match tool.execute(args, ctx).await {
            Ok(result) => result,
            Err(e) => format!("Error: {e}"),
        }
    }

    fn gate_match(&self, name: &str, args: &serde_json::Value) -> Option<String> {
        let gate = self.gate.read();
        let (policy, _) = gate.as_ref()?;
        policy.matches(name, args)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use janus_domain::{Error, Result};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct EchoTool {
        invocations: AtomicUsize,
    }

    impl EchoTool {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                invocations: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "exec"
        }
        fn description(&self) -> &str {
            "echo for tests"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<String> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(format!("ran: {}", args["command"].as_str().unwrap_or("")))
        }
    }

    struct FailingTool;

    #[async_trait::async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: serde_json::Value, _ctx: &ToolContext) -> Result<String> {
            Err(Error::Other("kaput".into()))
        }
    }

    struct ScriptedConfirmer {
        answer: AtomicBool,
        asked: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Confirmer for ScriptedConfirmer {
        async fn confirm(&self, _prompt: &str) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn unknown_tool_lists_available_names() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool::new());
        let result = registry
            .execute("ghost", json!({}), &ToolContext::default())
            .await;
        assert!(result.starts_with("Error: Unknown tool \"ghost\""));
        assert!(result.contains("exec"));
    }

    #[tokio::test]
    async fn user_deny_blocks_without_invoking() {
        let registry = ToolRegistry::new();
        let tool = EchoTool::new();
        registry.register(tool.clone());

        let ctx = ToolContext {
            tool_deny: vec!["exec".into()],
            ..Default::default()
        };
        let result = registry.execute("exec", json!({"command": "ls"}), &ctx).await;
        assert_eq!(result, "Error: Tool \"exec\" is not available for this user.");
        assert_eq!(tool.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn allow_list_excludes_unlisted_tools() {
        let registry = ToolRegistry::new();
        let tool = EchoTool::new();
        registry.register(tool.clone());

        let ctx = ToolContext {
            tool_allow: Some(vec!["read_file".into()]),
            ..Default::default()
        };
        let result = registry.execute("exec", json!({"command": "ls"}), &ctx).await;
        assert_eq!(result, "Error: Tool \"exec\" is not available for this user.");
        assert_eq!(tool.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gate_denial_bypasses_execute() {
        let registry = ToolRegistry::new();
        let tool = EchoTool::new();
        registry.register(tool.clone());

        let confirmer = Arc::new(ScriptedConfirmer {
            answer: AtomicBool::new(false),
            asked: AtomicUsize::new(0),
        });
        registry.set_gate(
            GatePolicy::new(&[r"rm\s".to_string()]),
            confirmer.clone(),
        );

        let result = registry
            .execute("exec", json!({"command": "rm -rf build/"}), &ToolContext::default())
            .await;
        assert!(result.starts_with("Action denied by user:"));
        assert_eq!(confirmer.asked.load(Ordering::SeqCst), 1);
        assert_eq!(tool.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gate_approval_lets_the_call_through() {
        let registry = ToolRegistry::new();
        let tool = EchoTool::new();
        registry.register(tool.clone());

        registry.set_gate(
            GatePolicy::new(&[r"rm\s".to_string()]),
            Arc::new(ScriptedConfirmer {
                answer: AtomicBool::new(true),
                asked: AtomicUsize::new(0),
            }),
        );

        let result = registry
            .execute("exec", json!({"command": "rm old.log"}), &ToolContext::default())
            .await;
        assert_eq!(result, "ran: rm old.log");
        assert_eq!(tool.invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ungated_commands_skip_confirmation() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool::new());
        let confirmer = Arc::new(ScriptedConfirmer {
            answer: AtomicBool::new(false),
            asked: AtomicUsize::new(0),
        });
        registry.set_gate(GatePolicy::new(&[r"rm\s".to_string()]), confirmer.clone());

        let result = registry
            .execute("exec", json!({"command": "cargo check"}), &ToolContext::default())
            .await;
        assert_eq!(result, "ran: cargo check");
        assert_eq!(confirmer.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tool_failures_are_normalized() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));
        let result = registry.execute("broken", json!({}), &ToolContext::default()).await;
        assert_eq!(result, "Error: kaput");
    }

    #[test]
    fn specs_respect_user_policy() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool::new());
        registry.register(Arc::new(FailingTool));

        let all = registry.specs_for(None, &[]);
        assert_eq!(all.len(), 2);

        let denied = registry.specs_for(None, &["exec".to_string()]);
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].name, "broken");

        let allowed = registry.specs_for(Some(&vec!["exec".to_string()]), &[]);
        assert_eq!(allowed.len(), 1);
        assert_eq!(allowed[0].name, "exec");
    }
}
