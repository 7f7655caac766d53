//! CLI: `serve` starts the gateway's HTTP endpoint; `list-tools` and
//! `list-prompts` resolve a single profile one-shot and print its exported
//! descriptors as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use mcp_gateway::{ConnectorRegistry, GatewayConfig, GatewayState, ProfileResolver};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(
    name = "mcp-gateway",
    version,
    about = "Single-endpoint MCP gateway that aggregates upstream servers behind named profiles"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway HTTP endpoint and serve until terminated.
    Serve {
        #[arg(long)]
        config: PathBuf,
        /// Overrides the config file's `listen` address.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Resolve a profile and print its exported tools as JSON.
    ListTools {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        profile: String,
    },
    /// Resolve a profile and print its exported prompts as JSON.
    ListPrompts {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        profile: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config, listen } => run_serve(config, listen).await,
        Command::ListTools { config, profile } => run_list(config, profile, Capability::Tools).await,
        Command::ListPrompts { config, profile } => {
            run_list(config, profile, Capability::Prompts).await
        }
    }
}

async fn run_serve(config_path: PathBuf, listen_override: Option<String>) -> Result<()> {
    let config = GatewayConfig::load(&config_path).context("failed to load gateway config")?;
    let listen = listen_override.unwrap_or_else(|| config.listen.clone());
    let registry = Arc::new(ConnectorRegistry::new(config.mcp_servers.clone()));
    let state = Arc::new(GatewayState {
        config,
        registry: registry.clone(),
    });

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received; closing listener");
            signal_token.cancel();
        }
    });

    let serve_result = mcp_gateway::serve(state, &listen, shutdown).await;

    // Stop accepting connections first (already true once `serve` returns),
    // then dispose every connector, with a fail-safe timeout forcing exit
    // if disposal hangs.
    match tokio::time::timeout(SHUTDOWN_GRACE, registry.dispose_all()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => tracing::error!(error = %error, "connector shutdown reported failures"),
        Err(_) => tracing::error!(
            timeout_secs = SHUTDOWN_GRACE.as_secs(),
            "connector shutdown did not complete in time; forcing exit"
        ),
    }

    serve_result
}

enum Capability {
    Tools,
    Prompts,
}

async fn run_list(config_path: PathBuf, profile: String, capability: Capability) -> Result<()> {
    let config = GatewayConfig::load(&config_path).context("failed to load gateway config")?;
    let registry = ConnectorRegistry::new(config.mcp_servers.clone());
    let mut resolver = ProfileResolver::new(&config, &registry);
    let resolved = resolver.resolve(&profile).await?;

    // A server whose ensure-ready failed is silently absent here too, the
    // same as from the resolved profile's listTools/listPrompts.
    match capability {
        Capability::Tools => {
            let descriptors: Vec<_> = resolved.tools.iter().map(|(_, entry)| &entry.descriptor).collect();
            println!("{}", serde_json::to_string_pretty(&descriptors)?);
        }
        Capability::Prompts => {
            let descriptors: Vec<_> = resolved.prompts.iter().map(|(_, entry)| &entry.descriptor).collect();
            println!("{}", serde_json::to_string_pretty(&descriptors)?);
        }
    }

    registry.dispose_all().await?;
    Ok(())
}
