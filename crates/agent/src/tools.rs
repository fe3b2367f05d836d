//! Agent-level tools: child-agent spawning and cron job management.
//!
//! These live here rather than in the tools crate because they need
//! handles the base registry cannot know about (the agent itself, the
//! scheduler's store). The subagent tool holds a `Weak` reference so
//! the agent → registry → tool chain does not form a cycle.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use serde_json::{json, Value};

use janus_domain::{Error, Result, Scope};
use janus_memory::{append_daily_note, MemoryIndex, OWNER_SHARED};
use janus_scheduler::{CronStore, JobPatch, NewJob, ScheduleKind};
use janus_tools::{Tool, ToolContext, ToolRegistry};

use crate::agent::{Agent, DirectOptions};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// spawn_agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SpawnAgentTool {
    agent: Weak<Agent>,
}

#[async_trait::async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        "Delegate a self-contained subtask to a child agent and return its final answer."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": { "type": "string", "description": "Complete description of the subtask" }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let task = args
            .get("task")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Other("spawn_agent requires a 'task' argument".into()))?;

        let agent = self
            .agent
            .upgrade()
            .ok_or_else(|| Error::Other("agent is shutting down".into()))?;

        let opts = DirectOptions {
            channel: "subagent".into(),
            chat_id: format!("sub:{}", uuid::Uuid::new_v4()),
            max_iterations: Some(agent.config().agent.max_subagent_iterations),
            ..Default::default()
        };
        tracing::info!(parent_chat = %ctx.chat_id, "spawning child agent");
        agent.process_direct(task, opts).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// cron
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CronTool {
    store: CronStore,
}

#[async_trait::async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Manage scheduled jobs: list, add, remove, enable, disable, history."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "add", "remove", "enable", "disable", "history"],
                    "description": "Operation to perform"
                },
                "id": { "type": "integer", "description": "Job id (remove/enable/disable/history)" },
                "name": { "type": "string", "description": "Job name (add)" },
                "schedule_kind": { "type": "string", "enum": ["at", "every", "cron"] },
                "schedule_value": { "type": "string", "description": "Timestamp, interval in ms, or 5-field cron" },
                "timezone": { "type": "string", "description": "IANA timezone for cron schedules" },
                "task": { "type": "string", "description": "What the job should do when it fires" },
                "limit": { "type": "integer", "description": "History rows to return (default 10)" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String> {
        let action = args
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Other("cron requires an 'action' argument".into()))?;

        match action {
            "list" => {
                let jobs = self.store.list(true).await?;
                Ok(serde_json::to_string_pretty(&jobs)?)
            }
            "add" => {
                let name = str_arg(&args, "name")?;
                let kind_raw = str_arg(&args, "schedule_kind")?;
                let kind = ScheduleKind::parse(kind_raw).ok_or_else(|| {
                    Error::Other(format!("unknown schedule_kind '{kind_raw}'"))
                })?;
                let value = str_arg(&args, "schedule_value")?;
                let task = str_arg(&args, "task")?;

                let mut job = NewJob::new(name, kind, value, task);
                job.timezone = args
                    .get("timezone")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let added = self.store.upsert_by_name(job).await?;
                Ok(format!(
                    "Scheduled job {} (id {}), next run: {}",
                    added.name,
                    added.id,
                    added
                        .next_run_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".into())
                ))
            }
            "remove" => {
                let id = id_arg(&args)?;
                if self.store.remove(id).await? {
                    Ok(format!("Removed job {id}"))
                } else {
                    Err(Error::Other(format!("no job with id {id}")))
                }
            }
            "enable" | "disable" => {
                let id = id_arg(&args)?;
                let patch = JobPatch {
                    enabled: Some(action == "enable"),
                    ..Default::default()
                };
                match self.store.update(id, patch).await? {
                    Some(job) => Ok(format!("Job {} is now {}", job.name, action_state(action))),
                    None => Err(Error::Other(format!("no job with id {id}"))),
                }
            }
            "history" => {
                let id = id_arg(&args)?;
                let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
                let runs = self.store.run_history(id, limit).await?;
                Ok(serde_json::to_string_pretty(&runs)?)
            }
            other => Err(Error::Other(format!("unknown cron action '{other}'"))),
        }
    }
}

fn action_state(action: &str) -> &'static str {
    if action == "enable" {
        "enabled"
    } else {
        "disabled"
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Other(format!("missing '{key}' argument")))
}

fn id_arg(args: &Value) -> Result<i64> {
    args.get("id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| Error::Other("missing 'id' argument".into()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// memory_search / memory_save
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MemorySearchTool {
    index: Arc<MemoryIndex>,
}

#[async_trait::async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search long-term memory for relevant facts, notes, and decisions."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for" },
                "limit": { "type": "integer", "description": "Max results (default 5)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Other("memory_search requires a 'query' argument".into()))?;
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(5) as usize;

        // The caller's identity bounds what the model can retrieve.
        let scope = ctx.user_id.as_deref().map(Scope::user);
        let hits = self
            .index
            .search_hybrid(query, limit, scope.as_ref())
            .await?;

        if hits.is_empty() {
            return Ok("No matching memories.".into());
        }
        let mut out = String::new();
        for hit in hits {
            out.push_str(&format!(
                "[{} / {}]\n{}\n\n",
                hit.source, hit.heading, hit.content
            ));
        }
        Ok(out.trim_end().to_string())
    }
}

pub struct MemorySaveTool {
    index: Arc<MemoryIndex>,
    memory_dir: PathBuf,
}

#[async_trait::async_trait]
impl Tool for MemorySaveTool {
    fn name(&self) -> &str {
        "memory_save"
    }

    fn description(&self) -> &str {
        "Save a fact or note to today's daily note in long-term memory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "The fact or note to remember" }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String> {
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Other("memory_save requires a 'content' argument".into()))?;

        let note_path = append_daily_note(&self.memory_dir, &format!("## Noted\n{content}"))?;
        let file_name = note_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let full = std::fs::read_to_string(&note_path)?;
        self.index
            .index_file(&file_name, &full, OWNER_SHARED, "global", None)
            .await?;
        Ok(format!("Saved to {file_name}"))
    }
}

/// Register the agent-level tools into the shared registry. Called at
/// boot, after the agent exists.
pub fn register_agent_tools(
    registry: &ToolRegistry,
    agent: &Arc<Agent>,
    cron_store: Option<CronStore>,
    memory: Option<(Arc<MemoryIndex>, PathBuf)>,
) {
    registry.register(Arc::new(SpawnAgentTool {
        agent: Arc::downgrade(agent),
    }));
    if let Some(store) = cron_store {
        registry.register(Arc::new(CronTool { store }));
    }
    if let Some((index, memory_dir)) = memory {
        registry.register(Arc::new(MemorySearchTool {
            index: index.clone(),
        }));
        registry.register(Arc::new(MemorySaveTool { index, memory_dir }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use janus_store::Database;

    fn cron_tool() -> CronTool {
        CronTool {
            store: CronStore::new(Database::open_in_memory().unwrap()),
        }
    }

    #[tokio::test]
    async fn add_list_remove_cycle() {
        let tool = cron_tool();
        let ctx = ToolContext::default();

        let added = tool
            .execute(
                json!({
                    "action": "add",
                    "name": "backup",
                    "schedule_kind": "every",
                    "schedule_value": "3600000",
                    "task": "run the backup"
                }),
                &ctx,
            )
            .await
            .unwrap();
        assert!(added.contains("backup"));

        let listed = tool.execute(json!({"action": "list"}), &ctx).await.unwrap();
        assert!(listed.contains("\"backup\""));

        let removed = tool
            .execute(json!({"action": "remove", "id": 1}), &ctx)
            .await
            .unwrap();
        assert!(removed.contains("Removed"));
    }

    #[tokio::test]
    async fn disable_then_enable() {
        let tool = cron_tool();
        let ctx = ToolContext::default();
        tool.execute(
            json!({
                "action": "add",
                "name": "j",
                "schedule_kind": "every",
                "schedule_value": "60000",
                "task": "t"
            }),
            &ctx,
        )
        .await
        .unwrap();

        let disabled = tool
            .execute(json!({"action": "disable", "id": 1}), &ctx)
            .await
            .unwrap();
        assert!(disabled.contains("disabled"));

        let enabled = tool
            .execute(json!({"action": "enable", "id": 1}), &ctx)
            .await
            .unwrap();
        assert!(enabled.contains("enabled"));
    }

    #[tokio::test]
    async fn bad_action_is_an_error() {
        let tool = cron_tool();
        let err = tool
            .execute(json!({"action": "explode"}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown cron action"));
    }

    #[tokio::test]
    async fn memory_save_then_search_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(MemoryIndex::new(
            janus_store::Database::open_in_memory().unwrap(),
            None,
        ));
        let save = MemorySaveTool {
            index: index.clone(),
            memory_dir: dir.path().to_path_buf(),
        };
        let search = MemorySearchTool { index };
        let ctx = ToolContext::default();

        let saved = save
            .execute(json!({"content": "the router password is in the vault"}), &ctx)
            .await
            .unwrap();
        assert!(saved.starts_with("Saved to"));

        let found = search
            .execute(json!({"query": "router password"}), &ctx)
            .await
            .unwrap();
        assert!(found.contains("router password"));

        let nothing = search
            .execute(json!({"query": "completely unrelated topic"}), &ctx)
            .await
            .unwrap();
        assert_eq!(nothing, "No matching memories.");
    }
}
