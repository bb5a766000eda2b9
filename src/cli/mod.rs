// src/cli/mod.rs
// CLI argument definitions and debug commands

pub mod serve;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use kiro_recall::config::RecallConfig;
use kiro_recall::model::SourceKind;
use kiro_recall::search::{self, SearchFilters, SearchParams};
use kiro_recall::sources;
use kiro_recall::utils::truncate;

#[derive(Parser)]
#[command(
    name = "kiro-recall",
    about = "Total Recall - semantic memory over Kiro conversation history",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the MCP server over stdio (default)
    Serve,
    /// Force an index refresh and report what it did
    Index,
    /// One-shot semantic search from the shell
    Search {
        /// Natural-language query
        query: String,
        /// Maximum results
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Minimum cosine similarity in [0, 1]
        #[arg(long, default_value_t = 0.2)]
        threshold: f32,
        /// Restrict to one source (cli or ide)
        #[arg(long)]
        source: Option<String>,
        /// Restrict to one workspace path
        #[arg(long)]
        workspace: Option<String>,
        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },
    /// Summarize the corpus without touching the embedder
    Stats,
}

/// `kiro-recall index`: refresh and print a report.
pub async fn run_index() -> Result<()> {
    let (_, index) = serve::build_index();
    let report = index.refresh().await?;

    println!(
        "Indexed {} message(s) across {} session(s)",
        report.messages, report.sessions
    );
    println!("  newly embedded:    {}", report.newly_embedded);
    println!("  cache entries:     {}", report.cache_entries);
    println!("  excluded sessions: {}", report.excluded_sessions);
    if report.unchanged {
        println!("  (corpus unchanged since last refresh)");
    }
    Ok(())
}

/// `kiro-recall search`: one-shot query for debugging.
pub async fn run_search(
    query: String,
    limit: usize,
    threshold: f32,
    source: Option<String>,
    workspace: Option<String>,
    json: bool,
) -> Result<()> {
    let source = match source.as_deref() {
        Some(raw) => match SourceKind::parse(raw) {
            Some(s) => Some(s),
            None => bail!("unknown source {raw:?}; expected cli or ide"),
        },
        None => None,
    };

    let (config, index) = serve::build_index();
    let params = SearchParams {
        query,
        filters: SearchFilters {
            after: None,
            before: None,
            workspace,
            source,
        },
        context_size: config.search.default_context_window,
        threshold,
        max_results: limit,
        offset: 0,
    };

    let response = search::run_search(&index, &params).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("{}", response.hint);
    for hit in &response.results {
        let m = &hit.matched_message;
        println!(
            "\n[{:.2}] {} {} ({} @ {})",
            hit.score,
            m.timestamp.format("%Y-%m-%d %H:%M"),
            m.role,
            m.source,
            if m.workspace.is_empty() { "-" } else { &m.workspace },
        );
        println!("  {}", truncate(&m.content, 200));
    }
    Ok(())
}

/// `kiro-recall stats`: corpus summary per source and workspace.
pub fn run_stats() -> Result<()> {
    let config = RecallConfig::load();
    let corpus = sources::load_corpus(&config.sources, config.search.max_content_chars);

    let mut by_source: std::collections::BTreeMap<String, usize> = Default::default();
    let mut by_workspace: std::collections::BTreeMap<String, usize> = Default::default();
    for message in &corpus.messages {
        *by_source.entry(message.source.to_string()).or_default() += 1;
        let workspace = if message.workspace.is_empty() {
            "(none)".to_string()
        } else {
            message.workspace.clone()
        };
        *by_workspace.entry(workspace).or_default() += 1;
    }

    println!(
        "{} message(s) in {} session(s)",
        corpus.messages.len(),
        corpus.sessions.len()
    );
    println!("\nBy source:");
    for (source, count) in &by_source {
        println!("  {source:>4}: {count}");
    }
    println!("\nBy workspace:");
    for (workspace, count) in &by_workspace {
        println!("  {count:>6}  {workspace}");
    }
    Ok(())
}
