//! Command-line inspector for Keepsake configuration and local state.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use keepsake::config::KeepsakeConfig;
use keepsake::sync::{JsonStateStore, LocalStateStore, OfflineQueue};
use log::debug;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;

/// Command-line options for the inspector.
#[derive(Parser, Debug)]
#[command(name = "keepsake", version)]
struct Cli {
    /// Optional path to a keepsake.json5 config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the local state directory
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Print the effective config and the layers it was merged from
    Config,
    /// Print the persisted local state of a user
    State {
        #[arg(long)]
        user: String,
    },
    /// Inspect or clear a user's offline queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum QueueAction {
    /// Queued operations in replay order
    List {
        #[arg(long)]
        user: String,
    },
    /// Depth, oldest entry and highest retry count
    Stats {
        #[arg(long)]
        user: String,
    },
    /// Drop every queued operation
    Clear {
        #[arg(long)]
        user: String,
    },
}

fn main() -> anyhow::Result<()> {
    keepsake::init_logging();
    let cli = Cli::parse();
    debug!("running command {:?}", cli.command);
    let output = run(&cli)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run(cli: &Cli) -> anyhow::Result<Value> {
    let (config, layers) = load_config(cli)?;
    match &cli.command {
        Command::Config => Ok(json!({ "layers": layers, "config": config })),
        Command::State { user } => {
            let store = open_store(cli, &config)?;
            let state = store
                .load(checked_user(user)?)
                .with_context(|| format!("failed to read local state of {user}"))?;
            Ok(json!({ "path": store.state_path(user), "state": state }))
        }
        Command::Queue { action } => {
            let user = match action {
                QueueAction::List { user }
                | QueueAction::Stats { user }
                | QueueAction::Clear { user } => checked_user(user)?,
            };
            let store: Arc<dyn LocalStateStore> = Arc::new(open_store(cli, &config)?);
            let queue = OfflineQueue::new(user, store, &config.queue, None);
            queue
                .restore()
                .with_context(|| format!("failed to restore offline queue of {user}"))?;
            match action {
                QueueAction::List { .. } => Ok(json!(queue.list())),
                QueueAction::Stats { .. } => Ok(json!(queue.stats())),
                QueueAction::Clear { .. } => {
                    let removed = queue.clear().context("failed to clear offline queue")?;
                    Ok(json!({ "removed": removed }))
                }
            }
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<(KeepsakeConfig, Vec<Value>)> {
    if let Some(path) = &cli.config {
        let config = KeepsakeConfig::load_from_path(path).context("failed to load config")?;
        return Ok((config, vec![json!({ "source": "runtime", "path": path })]));
    }
    let cwd = std::env::current_dir().context("failed to resolve current directory")?;
    let layered = KeepsakeConfig::load_layered(&cwd).context("failed to load layered config")?;
    debug!("layered config loaded (layers={})", layered.layers.len());
    let layers = layered
        .layers
        .iter()
        .map(|layer| {
            json!({
                "source": format!("{:?}", layer.source).to_lowercase(),
                "path": layer.path,
            })
        })
        .collect();
    Ok((layered.config, layers))
}

fn open_store(cli: &Cli, config: &KeepsakeConfig) -> anyhow::Result<JsonStateStore> {
    match &cli.state_dir {
        Some(dir) => JsonStateStore::new(dir),
        None => JsonStateStore::from_config(&config.state),
    }
    .context("failed to open local state directory")
}

fn checked_user(user: &str) -> anyhow::Result<&str> {
    if user.trim().is_empty() {
        bail!("--user must not be empty");
    }
    Ok(user)
}
