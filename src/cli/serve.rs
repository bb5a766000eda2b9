// src/cli/serve.rs
// MCP server initialization and main loop

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use kiro_recall::config::RecallConfig;
use kiro_recall::embeddings::OllamaEmbedder;
use kiro_recall::http::create_shared_client;
use kiro_recall::index::EmbeddingIndex;
use kiro_recall::mcp::RecallServer;

/// Load configuration and build the shared index handle.
pub fn build_index() -> (RecallConfig, Arc<EmbeddingIndex>) {
    let config = RecallConfig::load();
    let http_client = create_shared_client();
    let embedder = Arc::new(OllamaEmbedder::from_config(&config.embedding, http_client));
    let index = Arc::new(EmbeddingIndex::new(&config, embedder));
    (config, index)
}

/// Run the MCP server with stdio transport
pub async fn run_mcp_server() -> Result<()> {
    let (config, index) = build_index();

    let current_workspace = std::env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    info!(
        model = %config.embedding.model,
        endpoint = %config.embedding.endpoint,
        workspace = %current_workspace,
        "Starting kiro-recall MCP server"
    );

    let server = RecallServer::new(index, config.search.clone(), current_workspace);

    let transport = rmcp::transport::io::stdio();
    let service = rmcp::serve_server(server, transport).await?;
    service.waiting().await?;

    Ok(())
}
