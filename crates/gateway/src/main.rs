use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use janus_agent::DirectOptions;
use janus_domain::config::Config;
use janus_gateway::app::{build_runtime, run_gateway};

#[derive(Parser, Debug)]
#[command(name = "janus", about = "Personal autonomous agent runtime", version)]
struct Cli {
    /// Process a single message and exit.
    #[arg(short = 'm', long = "message")]
    message: Option<String>,

    /// Workspace directory (defaults to the configured or current dir).
    #[arg(long)]
    workspace: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Config precedence: defaults ← `~/.janus/config.json` ←
/// `<workspace>/janus.json` ← environment.
fn load_config(workspace_override: Option<&PathBuf>, janus_home: &std::path::Path) -> Config {
    let mut config = Config::default();

    for path in [
        janus_home.join("config.json"),
        workspace_override
            .cloned()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("janus.json"),
    ] {
        if let Ok(raw) = std::fs::read_to_string(&path) {
            match Config::from_json(&raw) {
                Ok(parsed) => config = parsed,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring invalid config file");
                }
            }
        }
    }

    if let Some(dir) = workspace_override {
        config.workspace.dir = dir.display().to_string();
    }
    config.apply_env();
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let janus_home = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".janus");
    let config = load_config(cli.workspace.as_ref(), &janus_home);

    let runtime = build_runtime(config, janus_home)
        .await
        .context("failed to initialize runtime")?;

    match cli.message {
        Some(text) => {
            let reply = runtime
                .agent
                .process_direct(
                    &text,
                    DirectOptions {
                        channel: "cli".into(),
                        chat_id: "direct".into(),
                        ..Default::default()
                    },
                )
                .await
                .context("message processing failed")?;
            println!("{reply}");
            Ok(())
        }
        None => run_gateway(runtime).await.context("gateway failed"),
    }
}
