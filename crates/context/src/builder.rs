//! The system-prompt builder.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use janus_domain::config::UserConfig;
use janus_domain::{ContextMode, InboundMessage, ScopeKind, ToolSpec};
use janus_learner::Learner;
use janus_memory::{recent_daily_notes, today_note_path, MemoryIndex};
use janus_skills::SkillCatalog;

use crate::skills_section::render_skills_section;

const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// How many memory chunks the memory section includes.
const MEMORY_TOP_K: usize = 5;

/// Daily notes included in the no-index fallback.
const FALLBACK_DAILY_NOTES: usize = 3;

/// Filesystem roots the builder reads from. Kept explicit (not global)
/// so tests can point everything at temp directories.
#[derive(Debug, Clone)]
pub struct ContextPaths {
    pub workspace_dir: PathBuf,
    pub memory_dir: PathBuf,
    /// Home-scoped config root (normally `~/.janus`).
    pub janus_home: PathBuf,
}

pub struct ContextBuilder {
    paths: ContextPaths,
    skills: Arc<SkillCatalog>,
    memory: Option<Arc<MemoryIndex>>,
    learner: Arc<Learner>,
    max_skills_in_prompt: usize,
    max_skills_prompt_chars: usize,
    /// Use the hybrid search branch instead of keyword-only.
    hybrid_memory: bool,
}

/// Per-message input to the builder.
pub struct PromptInput<'a> {
    pub message: &'a InboundMessage,
    pub mode: ContextMode,
    pub user: Option<&'a UserConfig>,
    pub tool_specs: &'a [ToolSpec],
    pub session_summary: Option<String>,
}

impl ContextBuilder {
    pub fn new(
        paths: ContextPaths,
        skills: Arc<SkillCatalog>,
        memory: Option<Arc<MemoryIndex>>,
        learner: Arc<Learner>,
        max_skills_in_prompt: usize,
        max_skills_prompt_chars: usize,
        hybrid_memory: bool,
    ) -> Self {
        Self {
            paths,
            skills,
            memory,
            learner,
            max_skills_in_prompt,
            max_skills_prompt_chars,
            hybrid_memory,
        }
    }

    /// Assemble the system prompt for one message.
    pub async fn build(&self, input: &PromptInput<'_>) -> String {
        let full = input.mode == ContextMode::Full;
        let mut sections: Vec<String> = Vec::new();

        sections.push(self.identity_section(input));

        if let Some(section) = self.user_section(input) {
            sections.push(section);
        }

        if full {
            for (label, path) in [
                ("ego", self.paths.janus_home.join("EGO.md")),
                ("agents", self.paths.workspace_dir.join("AGENTS.md")),
                ("heartbeat", self.paths.workspace_dir.join("HEARTBEAT.md")),
                ("project", self.paths.workspace_dir.join("JANUS.md")),
            ] {
                if let Ok(content) = std::fs::read_to_string(&path) {
                    if !content.trim().is_empty() {
                        sections.push(format!("## {label}\n\n{}", content.trim()));
                    }
                }
            }
        }

        sections.push(format!(
            "## skills\n\n{}",
            render_skills_section(
                &self.skills,
                input.user.map(|u| &u.skills),
                self.max_skills_in_prompt,
                self.max_skills_prompt_chars,
            )
        ));

        if full {
            sections.push(self.memory_section(input).await);
            if let Some(section) = self.learner_section(input).await {
                sections.push(section);
            }
        }

        sections.push(self.session_section(input));

        if let Some(summary) = &input.session_summary {
            sections.push(format!("## previous_summary\n\n{summary}"));
        }

        sections.join(SECTION_SEPARATOR)
    }

    fn identity_section(&self, input: &PromptInput<'_>) -> String {
        let mut tools = String::new();
        for spec in input.tool_specs {
            tools.push_str(&format!("- {}: {}\n", spec.name, spec.description));
        }
        if tools.is_empty() {
            tools.push_str("(none)\n");
        }
        format!(
            "## identity\n\nYou are Janus, a personal autonomous agent.\nCurrent time: {}\nWorkspace: {}\n\nAvailable tools:\n{}",
            Utc::now().to_rfc3339(),
            self.paths.workspace_dir.display(),
            tools.trim_end()
        )
    }

    fn user_section(&self, input: &PromptInput<'_>) -> Option<String> {
        let binding = input.message.user.as_ref()?;
        let mut out = String::from("## user\n\n");

        let display = input
            .user
            .and_then(|u| u.display_name.clone())
            .or_else(|| binding.display_name.clone())
            .unwrap_or_else(|| binding.user_id.clone());
        out.push_str(&format!("Talking with: {display} (id: {})\n", binding.user_id));

        let profile_path = input
            .user
            .and_then(|u| u.profile_doc.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                self.paths
                    .janus_home
                    .join("users")
                    .join(&binding.user_id)
                    .join("PROFILE.md")
            });
        if let Ok(profile) = std::fs::read_to_string(profile_path) {
            if !profile.trim().is_empty() {
                out.push('\n');
                out.push_str(profile.trim());
            }
        }
        Some(out)
    }

    async fn memory_section(&self, input: &PromptInput<'_>) -> String {
        let mut out = String::from("## memory\n\n");

        let hits = match &self.memory {
            Some(index) => {
                let scope = input.message.scope.as_ref();
                let query = &input.message.content;
                let result = if self.hybrid_memory {
                    index.search_hybrid(query, MEMORY_TOP_K, scope).await
                } else {
                    index.search_keyword(query, MEMORY_TOP_K, scope).await
                };
                match result {
                    Ok(hits) => hits,
                    Err(e) => {
                        tracing::warn!(error = %e, "memory search failed, using file fallback");
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };

        if hits.is_empty() {
            // Full dump of the persistent memory file plus recent notes.
            if let Ok(content) = std::fs::read_to_string(self.paths.memory_dir.join("MEMORY.md")) {
                if !content.trim().is_empty() {
                    out.push_str(content.trim());
                    out.push('\n');
                }
            }
            for (name, content) in recent_daily_notes(&self.paths.memory_dir, FALLBACK_DAILY_NOTES)
            {
                out.push_str(&format!("\n### {name}\n{}\n", content.trim()));
            }
        } else {
            for hit in &hits {
                out.push_str(&format!(
                    "<memory source=\"{}\" section=\"{}\">\n{}\n</memory>\n",
                    hit.source, hit.heading, hit.content
                ));
            }
            // Today's note always rides along with search results.
            if let Ok(content) = std::fs::read_to_string(today_note_path(&self.paths.memory_dir)) {
                if !content.trim().is_empty() {
                    out.push_str(&format!("\n### today\n{}\n", content.trim()));
                }
            }
        }

        out.trim_end().to_string()
    }

    async fn learner_section(&self, input: &PromptInput<'_>) -> Option<String> {
        let rec = match self.learner.recommend(&input.message.content).await {
            Ok(Some(rec)) => rec,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "learner recommendation failed");
                return None;
            }
        };
        if rec.sample_size <= 3 {
            return None;
        }

        let mut out = format!(
            "## learner\n\nSimilar past tasks ({} samples): avg duration {}ms, avg iterations {}, avg tool calls {}, success rate {}.",
            rec.sample_size,
            rec.avg_duration_ms,
            rec.avg_iterations,
            rec.avg_tool_calls,
            rec.success_rate
        );
        if rec.avg_iterations > 3.0 {
            out.push_str("\nConsider breaking this into smaller steps.");
        }
        if rec.success_rate < 0.7 {
            out.push_str("\nLow success rate on similar tasks - be careful.");
        }
        Some(out)
    }

    fn session_section(&self, input: &PromptInput<'_>) -> String {
        let mut out = format!(
            "## session\n\nChannel: {}\nChat: {}",
            input.message.channel, input.message.chat_id
        );
        if let Some(binding) = &input.message.user {
            out.push_str(&format!("\nUser: {}", binding.user_id));
        }
        if let Some(scope) = &input.message.scope {
            let kind = match scope.kind {
                ScopeKind::User => "user",
                ScopeKind::Family => "family",
                ScopeKind::Unknown => "unknown",
            };
            out.push_str(&format!("\nScope: {kind}:{}", scope.id));
        }
        out
    }
}
