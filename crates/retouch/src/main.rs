mod checkpoint;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use retouch_engine::bridge::Bridge;
use retouch_engine::command_agent::CommandAgent;
use retouch_engine::config::{ConfigLoader, RetouchConfig};
use retouch_engine::protocol::{ResponseStatus, SelectionMessage};
use retouch_engine::session::AgentSession;
use retouch_r::{BridgeServer, CorrelatedTransport, ReconnectPolicy};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "retouch", version, about = "Visual edits through a coding agent, with git checkpoints")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to ./retouch.yaml, then ~/.retouch/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project directory the agent edits and checkpoints are taken in
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Machine-readable output
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Accept selections from the preview page and hand them to the agent
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Send one selection message (JSON file) to a running bridge and wait for the result
    Send {
        file: PathBuf,
        /// Bridge URL (defaults to the configured server address)
        #[arg(long)]
        url: Option<String>,
    },
    /// Inspect and move along the checkpoint timeline
    #[command(subcommand)]
    Checkpoint(checkpoint::CheckpointCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = ConfigLoader::load(args.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    match args.command {
        Command::Serve { host, port } => serve(config, args.project, host, port).await,
        Command::Send { file, url } => send(&config, &file, url, args.json).await,
        Command::Checkpoint(cmd) => checkpoint::run(&config, &args.project, cmd, args.json),
    }
}

// Logs go to stderr; stdout is reserved for command output.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn serve(
    config: RetouchConfig,
    project: PathBuf,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let host = host.unwrap_or(config.server.host);
    let port = port.unwrap_or(config.server.port);

    let agent = CommandAgent::from_config(&config.agent, &project)?;
    let session = Arc::new(AgentSession::new(agent));
    let bridge = Arc::new(Bridge::new(session).with_timeout(config.agent.timeout()));

    let server = BridgeServer::bind((host.as_str(), port), bridge)
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;
    info!(
        project = %project.display(),
        "Point the preview page at ws://{}",
        server.local_addr()?
    );

    server
        .serve_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn send(
    config: &RetouchConfig,
    file: &Path,
    url: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let selection: SelectionMessage = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a selection message", file.display()))?;

    let url =
        url.unwrap_or_else(|| format!("ws://{}:{}", config.server.host, config.server.port));
    let transport =
        CorrelatedTransport::connect(url, ReconnectPolicy::from_config(&config.transport));
    transport.wait_connected().await?;

    let envelope = transport.request(selection).await;
    transport.close().await;
    let envelope = envelope?;

    if json {
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else {
        println!(
            "[{}] {:?}: {}",
            envelope.id,
            envelope.status,
            envelope.message().unwrap_or("")
        );
    }

    if envelope.status == ResponseStatus::Error {
        bail!(
            "request {} failed ({})",
            envelope.id,
            envelope.code().unwrap_or("UNKNOWN")
        );
    }
    Ok(())
}
