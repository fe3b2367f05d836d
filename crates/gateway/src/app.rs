//! Boot wiring: turn a config snapshot into a running set of
//! components, with the documented degradations when the database is
//! unavailable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use janus_agent::{register_agent_tools, Agent, Summarizer};
use janus_bus::{ChannelHandler, MessageBus};
use janus_context::{ContextBuilder, ContextPaths};
use janus_domain::config::Config;
use janus_domain::{OutboundKind, OutboundMessage, Result};
use janus_learner::Learner;
use janus_memory::MemoryIndex;
use janus_providers::{
    mask_secrets, OpenAiCompatProvider, Provider, ProviderEntry, ProviderRegistry,
};
use janus_scheduler::{sync_heartbeat, CronStore, Scheduler};
use janus_sessions::SessionStore;
use janus_skills::SkillCatalog;
use janus_store::Database;
use janus_tools::{
    DenyAllConfirmer, EditFileTool, ExecTool, GatePolicy, ReadFileTool, ToolRegistry,
    WriteFileTool,
};

/// Everything the gateway keeps alive for the process lifetime.
pub struct Runtime {
    pub bus: Arc<MessageBus>,
    pub agent: Arc<Agent>,
    pub scheduler: Arc<Scheduler>,
    /// (store, HEARTBEAT.md path, interval) when heartbeat is enabled
    /// and the store is durable.
    heartbeat: Option<(CronStore, PathBuf, u64)>,
}

/// Prints outbound terminal traffic; chunks stream without newlines
/// until the end marker arrives.
pub struct CliPrintHandler;

#[async_trait::async_trait]
impl ChannelHandler for CliPrintHandler {
    async fn handle(&self, msg: OutboundMessage) -> Result<()> {
        match msg.kind {
            OutboundKind::Chunk => {
                use std::io::Write;
                print!("{}", msg.content);
                let _ = std::io::stdout().flush();
            }
            OutboundKind::StreamEnd => println!(),
            OutboundKind::Message => println!("{}", msg.content),
        }
        Ok(())
    }
}

pub async fn build_runtime(config: Config, janus_home: PathBuf) -> Result<Runtime> {
    let workspace = PathBuf::from(&config.workspace.dir);
    let memory_dir = workspace.join(&config.workspace.memory_dir);
    let sessions_dir = workspace.join(&config.workspace.sessions_dir);

    // ── Persistence (with documented fallbacks) ───────────────────
    let database = if config.database.enabled {
        let db_path = workspace.join(&config.database.path);
        match Database::open(&db_path) {
            Ok(db) => Some(db),
            Err(e) => {
                tracing::warn!(
                    path = %db_path.display(),
                    error = %e,
                    "database unavailable; falling back to file-based stores"
                );
                None
            }
        }
    } else {
        None
    };

    let sessions = Arc::new(SessionStore::new(&sessions_dir));
    let learner = Arc::new(match &database {
        Some(db) => Learner::with_database(db.clone()),
        None => Learner::with_file(workspace.join(".janus/learner.jsonl")),
    });
    let memory = database
        .as_ref()
        .map(|db| Arc::new(MemoryIndex::new(db.clone(), None)));

    // Seed the index from the persistent memory file so retrieval has
    // something to work with on a fresh database.
    if let Some(index) = &memory {
        let memory_file = memory_dir.join("MEMORY.md");
        if let Ok(content) = std::fs::read_to_string(&memory_file) {
            if let Err(e) = index
                .index_file("MEMORY.md", &content, janus_memory::OWNER_SHARED, "global", None)
                .await
            {
                tracing::warn!(error = %e, "failed to index MEMORY.md");
            }
        }
    }

    // ── Providers ─────────────────────────────────────────────────
    let providers = Arc::new(ProviderRegistry::new(build_provider_entries(&config)));
    if providers.is_empty() {
        tracing::warn!("no LLM providers configured; set an API key in config or environment");
    }

    // ── Skills / context ──────────────────────────────────────────
    let skills = Arc::new(SkillCatalog::load(&[
        workspace.join(&config.workspace.skills_dir),
        janus_home.join("skills"),
    ]));
    let context = Arc::new(ContextBuilder::new(
        ContextPaths {
            workspace_dir: workspace.clone(),
            memory_dir: memory_dir.clone(),
            janus_home,
        },
        skills,
        memory.clone(),
        learner.clone(),
        config.agent.max_skills_in_prompt,
        config.agent.max_skills_prompt_chars,
        config.memory.vector_search,
    ));

    // ── Tools ─────────────────────────────────────────────────────
    let tools = Arc::new(ToolRegistry::new());
    tools.register(Arc::new(ExecTool));
    tools.register(Arc::new(ReadFileTool));
    tools.register(Arc::new(WriteFileTool));
    tools.register(Arc::new(EditFileTool));
    if config.gates.enabled {
        tools.set_gate(
            GatePolicy::new(&config.gates.exec_patterns),
            Arc::new(DenyAllConfirmer),
        );
    }

    // ── Bus / agent / scheduler ───────────────────────────────────
    let bus = Arc::new(MessageBus::default());
    bus.register_handler("cli", Arc::new(CliPrintHandler));

    let summarizer = Arc::new(Summarizer::new(
        providers.clone(),
        sessions.clone(),
        memory.clone(),
        memory_dir.clone(),
    ));

    let cron_store = database.map(CronStore::new);
    let agent = Agent::new(
        config.clone(),
        bus.clone(),
        sessions,
        providers,
        tools.clone(),
        context,
        learner,
        summarizer,
    );
    register_agent_tools(
        &tools,
        &agent,
        cron_store.clone(),
        memory.map(|m| (m, memory_dir)),
    );

    let mut heartbeat = None;
    if let Some(store) = &cron_store {
        sync_heartbeat_file(store, &workspace, &config).await;
        if config.heartbeat.enabled {
            heartbeat = Some((
                store.clone(),
                workspace.join("HEARTBEAT.md"),
                config.heartbeat.check_interval_ms,
            ));
        }
    }
    let scheduler = Arc::new(Scheduler::new(cron_store, bus.clone()));

    Ok(Runtime {
        bus,
        agent,
        scheduler,
        heartbeat,
    })
}

fn build_provider_entries(config: &Config) -> Vec<ProviderEntry> {
    let mut entries = Vec::new();

    // Inline single-provider configuration (or env auto-selection).
    if let (Some(name), Some(api_key)) = (&config.llm.provider, &config.llm.api_key) {
        match OpenAiCompatProvider::new(name, api_key, config.llm.api_base.as_deref()) {
            Ok(provider) => entries.push(ProviderEntry {
                name: name.clone(),
                provider: Arc::new(provider) as Arc<dyn Provider>,
                default_model: config.llm.model.clone(),
                purposes: Vec::new(),
                priority: 0,
            }),
            Err(e) => {
                tracing::warn!(
                    provider = %name,
                    error = %mask_secrets(&e.to_string()),
                    "failed to initialize provider, skipping"
                );
            }
        }
    }

    // Explicit registry entries.
    for pc in &config.llm.providers {
        let Some(api_key) = pc.api_key.as_deref().or(config.llm.api_key.as_deref()) else {
            tracing::warn!(provider = %pc.name, "provider entry has no API key, skipping");
            continue;
        };
        match OpenAiCompatProvider::new(&pc.name, api_key, pc.api_base.as_deref()) {
            Ok(provider) => entries.push(ProviderEntry {
                name: pc.name.clone(),
                provider: Arc::new(provider) as Arc<dyn Provider>,
                default_model: pc.model.clone().unwrap_or_else(|| config.llm.model.clone()),
                purposes: pc.purposes.clone(),
                priority: pc.priority,
            }),
            Err(e) => {
                tracing::warn!(
                    provider = %pc.name,
                    error = %mask_secrets(&e.to_string()),
                    "failed to initialize provider, skipping"
                );
            }
        }
    }

    entries
}

async fn sync_heartbeat_file(store: &CronStore, workspace: &Path, config: &Config) {
    if !config.heartbeat.enabled {
        return;
    }
    let path = workspace.join("HEARTBEAT.md");
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            if let Err(e) = sync_heartbeat(store, &content).await {
                tracing::warn!(error = %e, "heartbeat sync failed");
            }
        }
        Err(_) => tracing::debug!("no HEARTBEAT.md in workspace"),
    }
}

/// Run headless until ctrl-c: dispatcher, scheduler, and agent loop.
pub async fn run_gateway(runtime: Runtime) -> Result<()> {
    let cancel = CancellationToken::new();

    let dispatcher = {
        let bus = runtime.bus.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { bus.run_dispatcher(cancel).await })
    };
    let scheduler = {
        let scheduler = runtime.scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };
    let agent = {
        let agent = runtime.agent.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { agent.run(cancel).await })
    };
    if let Some((store, path, interval_ms)) = runtime.heartbeat.clone() {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            janus_scheduler::run_heartbeat_watcher(store, path, interval_ms, cancel).await
        });
    }

    tracing::info!("janus gateway running, ctrl-c to stop");
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
    cancel.cancel();

    let _ = agent.await;
    let _ = scheduler.await;
    let _ = dispatcher.await;
    Ok(())
}
