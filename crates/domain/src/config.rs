//! Typed configuration snapshot.
//!
//! The full document is a single JSON object; every section has serde
//! defaults so a partial (or absent) file yields a working config.
//! Loading/merging of config files is the embedder's job; this module
//! only defines the shape, the defaults, and environment application.
//! The snapshot is loaded once at startup and passed by value.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM section
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Environment-variable precedence for provider auto-selection.
pub const PROVIDER_ENV_ORDER: &[(&str, &str)] = &[
    ("openrouter", "OPENROUTER_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
    ("deepseek", "DEEPSEEK_API_KEY"),
    ("groq", "GROQ_API_KEY"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LlmConfig {
    /// Active provider name when a single provider is configured inline.
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Additional registry entries; an empty purpose list means wildcard.
    pub providers: Vec<LlmProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            api_key: None,
            api_base: None,
            model: "gpt-4o-mini".into(),
            max_tokens: 4096,
            temperature: 0.7,
            providers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LlmProviderConfig {
    pub name: String,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub model: Option<String>,
    /// Purpose tags this entry serves (e.g. "summarize", "flush").
    pub purposes: Vec<String>,
    /// Lower is tried first.
    pub priority: i32,
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            api_key: None,
            api_base: None,
            model: None,
            purposes: Vec::new(),
            priority: 0,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent section
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmErrorPolicy {
    Stop,
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub summarization_threshold: usize,
    pub token_budget: usize,
    pub context_window: usize,
    pub tool_retries: u32,
    #[serde(rename = "onLLMError")]
    pub on_llm_error: LlmErrorPolicy,
    pub max_subagent_iterations: u32,
    pub max_skills_in_prompt: usize,
    pub max_skills_prompt_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            summarization_threshold: 20,
            token_budget: 100_000,
            context_window: 128_000,
            tool_retries: 2,
            on_llm_error: LlmErrorPolicy::Retry,
            max_subagent_iterations: 5,
            max_skills_in_prompt: 150,
            max_skills_prompt_chars: 30_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace / tools / database sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkspaceConfig {
    pub dir: String,
    pub memory_dir: String,
    pub sessions_dir: String,
    pub skills_dir: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: ".".into(),
            memory_dir: "memory".into(),
            sessions_dir: "sessions".into(),
            skills_dir: "skills".into(),
        }
    }
}

/// Commands that are never run, regardless of gates or confirmation.
fn default_exec_deny_patterns() -> Vec<String> {
    [
        r"rm\s+-rf\s+/(\s|$)",
        r"mkfs(\.|\s)",
        r"dd\s+if=.*\s+of=/dev/",
        r":\(\)\s*\{.*\};\s*:",
        r">\s*/dev/sd",
        r"\bshutdown\b",
        r"\breboot\b",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolsConfig {
    /// Per-call shell timeout in milliseconds.
    pub exec_timeout: u64,
    pub exec_deny_patterns: Vec<String>,
    /// Maximum file size the fs tools will read or write, in bytes.
    pub max_file_size: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            exec_timeout: 30_000,
            exec_deny_patterns: default_exec_deny_patterns(),
            max_file_size: 1_048_576,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: ".janus/janus.db".into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Heartbeat / streaming / gates / memory sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub check_interval_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamingConfig {
    pub enabled: bool,
    pub telegram_throttle_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            telegram_throttle_ms: 500,
        }
    }
}

/// Commands that require interactive confirmation before running.
fn default_gate_patterns() -> Vec<String> {
    [
        r"rm\s+-rf?\b",
        r"\bsudo\b",
        r"git\s+push\s+.*--force",
        r"git\s+reset\s+--hard",
        r"drop\s+table",
        r"truncate\s+table",
        r"mkfs(\.|\s)",
        r"dd\s+if=",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatesConfig {
    pub enabled: bool,
    pub exec_patterns: Vec<String>,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exec_patterns: default_gate_patterns(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryConfig {
    pub vector_search: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Users / family / telegram sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Allow/deny pair. `allow: None` means "everything not denied".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessList {
    pub allow: Option<Vec<String>>,
    pub deny: Vec<String>,
}

impl AccessList {
    pub fn permits(&self, name: &str) -> bool {
        if let Some(allow) = &self.allow {
            if !allow.iter().any(|a| a == name) {
                return false;
            }
        }
        !self.deny.iter().any(|d| d == name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserIdentity {
    pub channel: String,
    pub channel_user_id: Option<String>,
    pub channel_username: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserConfig {
    pub id: String,
    pub display_name: Option<String>,
    pub identities: Vec<UserIdentity>,
    /// Path to the user's profile document (PROFILE.md).
    pub profile_doc: Option<String>,
    pub tools: AccessList,
    pub skills: AccessList,
    pub content_policy: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FamilyConfig {
    pub id: Option<String>,
    pub group_chat_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelegramConfig {
    pub enabled: bool,
    pub token: Option<String>,
    pub allowed_chat_ids: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub workspace: WorkspaceConfig,
    pub tools: ToolsConfig,
    pub database: DatabaseConfig,
    pub heartbeat: HeartbeatConfig,
    pub streaming: StreamingConfig,
    pub gates: GatesConfig,
    pub memory: MemoryConfig,
    pub users: Vec<UserConfig>,
    pub family: FamilyConfig,
    pub telegram: TelegramConfig,
}

impl Config {
    /// Parse a JSON document; unknown fields are ignored, missing
    /// sections take their defaults.
    pub fn from_json(raw: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Apply environment overrides on top of the loaded document.
    ///
    /// `<PROVIDER>_API_KEY` selects the active provider when `llm.apiKey`
    /// is absent, in [`PROVIDER_ENV_ORDER`] precedence. `JANUS_MODEL` and
    /// `JANUS_API_BASE` override model and base URL; `TELEGRAM_BOT_TOKEN`
    /// fills the chat-bot token.
    pub fn apply_env(&mut self) {
        if self.llm.api_key.is_none() {
            for (provider, var) in PROVIDER_ENV_ORDER {
                if let Ok(key) = std::env::var(var) {
                    if !key.is_empty() {
                        self.llm.provider = Some((*provider).to_string());
                        self.llm.api_key = Some(key);
                        break;
                    }
                }
            }
        }
        if let Ok(model) = std::env::var("JANUS_MODEL") {
            if !model.is_empty() {
                self.llm.model = model;
            }
        }
        if let Ok(base) = std::env::var("JANUS_API_BASE") {
            if !base.is_empty() {
                self.llm.api_base = Some(base);
            }
        }
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !token.is_empty() {
                self.telegram.token = Some(token);
            }
        }
    }

    /// The channel/chat a system-origin reply is rerouted to: the chat
    /// bot's first allowlisted chat when enabled, else the terminal.
    pub fn default_user_channel(&self) -> (String, String) {
        if self.telegram.enabled {
            if let Some(chat) = self.telegram.allowed_chat_ids.first() {
                return ("telegram".into(), chat.clone());
            }
        }
        ("cli".into(), "direct".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.llm.max_tokens, 4096);
        assert_eq!(cfg.agent.max_iterations, 20);
        assert_eq!(cfg.agent.summarization_threshold, 20);
        assert_eq!(cfg.agent.token_budget, 100_000);
        assert_eq!(cfg.agent.tool_retries, 2);
        assert_eq!(cfg.agent.on_llm_error, LlmErrorPolicy::Retry);
        assert_eq!(cfg.tools.exec_timeout, 30_000);
        assert_eq!(cfg.tools.max_file_size, 1_048_576);
        assert!(cfg.database.enabled);
        assert_eq!(cfg.database.path, ".janus/janus.db");
        assert!(!cfg.heartbeat.enabled);
        assert!(cfg.streaming.enabled);
        assert!(cfg.gates.enabled);
        assert!(!cfg.memory.vector_search);
        assert!(!cfg.tools.exec_deny_patterns.is_empty());
        assert!(!cfg.gates.exec_patterns.is_empty());
    }

    #[test]
    fn partial_json_takes_defaults() {
        let cfg = Config::from_json(r#"{"agent": {"maxIterations": 3}}"#).unwrap();
        assert_eq!(cfg.agent.max_iterations, 3);
        assert_eq!(cfg.agent.token_budget, 100_000);
        assert_eq!(cfg.workspace.memory_dir, "memory");
    }

    #[test]
    fn on_llm_error_parses_lowercase() {
        let cfg = Config::from_json(r#"{"agent": {"onLLMError": "stop"}}"#).unwrap();
        assert_eq!(cfg.agent.on_llm_error, LlmErrorPolicy::Stop);
    }

    #[test]
    fn access_list_allow_and_deny() {
        let all = AccessList::default();
        assert!(all.permits("exec"));

        let denied = AccessList {
            allow: None,
            deny: vec!["exec".into()],
        };
        assert!(!denied.permits("exec"));
        assert!(denied.permits("read_file"));

        let allow_only = AccessList {
            allow: Some(vec!["read_file".into()]),
            deny: vec![],
        };
        assert!(allow_only.permits("read_file"));
        assert!(!allow_only.permits("exec"));
    }

    #[test]
    fn default_user_channel_prefers_telegram_allowlist() {
        let mut cfg = Config::default();
        assert_eq!(cfg.default_user_channel(), ("cli".into(), "direct".into()));

        cfg.telegram.enabled = true;
        cfg.telegram.allowed_chat_ids = vec!["100".into(), "200".into()];
        assert_eq!(
            cfg.default_user_channel(),
            ("telegram".into(), "100".into())
        );
    }
}
