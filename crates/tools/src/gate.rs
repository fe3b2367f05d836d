//! Safety gate: pattern match plus pluggable confirmation.
//!
//! Current policy gates only `exec` shell invocations, matching the
//! command against configured case-insensitive patterns. Confirmation
//! is channel-provided; the contract is a bool with deny as the
//! default (including on timeout, which the channel adapter enforces).

use regex::Regex;

#[async_trait::async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Headless default: nothing gets through the gate.
pub struct DenyAllConfirmer;

#[async_trait::async_trait]
impl Confirmer for DenyAllConfirmer {
    async fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}

pub struct GatePolicy {
    patterns: Vec<Regex>,
}

impl GatePolicy {
    /// Compile the configured patterns case-insensitively; invalid
    /// patterns are skipped with a warning.
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match Regex::new(&format!("(?i){p}")) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "invalid gate pattern, skipping");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// Returns the gated command when (tool, args) matches the policy.
    pub fn matches(&self, tool_name: &str, args: &serde_json::Value) -> Option<String> {
        if tool_name != "exec" {
            return None;
        }
        let command = args.get("command")?.as_str()?;
        self.patterns
            .iter()
            .any(|re| re.is_match(command))
            .then(|| command.to_string())
    }
}
