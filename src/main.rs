// src/main.rs
// kiro-recall - semantic memory over Kiro conversation history

mod cli;

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env from ~/.kiro-recall/.env only (never from CWD — a malicious
    // repo could override the embedding endpoint)
    if let Some(home) = dirs::home_dir()
        && let Err(e) = dotenvy::from_path(home.join(".kiro-recall/.env"))
    {
        tracing::debug!("Failed to load global .env file: {}", e);
    }

    let cli = Cli::parse();

    let log_level = match &cli.command {
        // Quiet for MCP stdio
        None | Some(Commands::Serve) => Level::WARN,
        Some(Commands::Index) => Level::INFO,
        Some(Commands::Search { .. }) => Level::WARN,
        Some(Commands::Stats) => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match cli.command {
        None | Some(Commands::Serve) => {
            cli::serve::run_mcp_server().await?;
        }
        Some(Commands::Index) => {
            cli::run_index().await?;
        }
        Some(Commands::Search {
            query,
            limit,
            threshold,
            source,
            workspace,
            json,
        }) => {
            cli::run_search(query, limit, threshold, source, workspace, json).await?;
        }
        Some(Commands::Stats) => {
            cli::run_stats()?;
        }
    }

    Ok(())
}
