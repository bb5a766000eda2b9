// src/mcp/mod.rs
// MCP server: four scoped semantic-search tools over conversation history

use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, tool::ToolCallContext, wrapper::Parameters},
    model::{
        CallToolRequestParam, CallToolResult, ListToolsResult, PaginatedRequestParam,
        ServerCapabilities, ServerInfo,
    },
    schemars,
    service::{RequestContext, RoleServer},
    tool, tool_router, ErrorData, ServerHandler,
};
use serde::Deserialize;
use tracing::debug;

use crate::config::SearchConfig;
use crate::index::EmbeddingIndex;
use crate::model::SourceKind;
use crate::search::{self, parse_time_bound, SearchFilters, SearchParams};

/// MCP server state: one explicit index handle, no hidden singletons.
#[derive(Clone)]
pub struct RecallServer {
    pub index: Arc<EmbeddingIndex>,
    pub defaults: SearchConfig,
    /// Workspace used by search_project_history; the server CWD at startup.
    pub current_workspace: String,
    tool_router: ToolRouter<Self>,
}

impl RecallServer {
    pub fn new(index: Arc<EmbeddingIndex>, defaults: SearchConfig, current_workspace: String) -> Self {
        Self {
            index,
            defaults,
            current_workspace,
            tool_router: Self::tool_router(),
        }
    }

    /// Shared body of all four tools: build params, search, serialize.
    async fn scoped_search(
        &self,
        req: SearchRequest,
        workspace: Option<String>,
        source: Option<SourceKind>,
    ) -> Result<String, String> {
        let filters = SearchFilters {
            after: req
                .after
                .as_deref()
                .map(parse_time_bound)
                .transpose()
                .map_err(|e| e.to_user_string())?,
            before: req
                .before
                .as_deref()
                .map(parse_time_bound)
                .transpose()
                .map_err(|e| e.to_user_string())?,
            workspace,
            source,
        };

        let params = SearchParams {
            query: req.query,
            filters,
            context_size: req
                .context_size
                .unwrap_or(self.defaults.default_context_window),
            threshold: req.threshold.unwrap_or(self.defaults.default_threshold),
            max_results: req
                .max_results
                .unwrap_or(self.defaults.default_max_results),
            offset: req.offset.unwrap_or(0),
        };

        let response = search::run_search(&self.index, &params)
            .await
            .map_err(|e| e.to_user_string())?;
        serde_json::to_string(&response).map_err(|e| e.to_string())
    }
}

/// Common parameters of every search tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchRequest {
    #[schemars(description = "Natural-language query; matched by meaning, not keyword")]
    pub query: String,
    #[schemars(description = "Only messages at or after this time (YYYY-MM-DD or RFC 3339)")]
    pub after: Option<String>,
    #[schemars(description = "Only messages before this time (YYYY-MM-DD or RFC 3339)")]
    pub before: Option<String>,
    #[schemars(description = "Conversation messages to include around each hit (default 3)")]
    pub context_size: Option<usize>,
    #[schemars(description = "Minimum cosine similarity in [0, 1] (default 0.2)")]
    pub threshold: Option<f32>,
    #[schemars(description = "Maximum results per page (default 10)")]
    pub max_results: Option<usize>,
    #[schemars(description = "Pagination offset (default 0)")]
    pub offset: Option<usize>,
}

/// Project-scoped search adds an optional workspace override.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ProjectSearchRequest {
    #[schemars(description = "Natural-language query; matched by meaning, not keyword")]
    pub query: String,
    #[schemars(description = "Workspace path to scope to (default: the server's working directory)")]
    pub workspace: Option<String>,
    #[schemars(description = "Only messages at or after this time (YYYY-MM-DD or RFC 3339)")]
    pub after: Option<String>,
    #[schemars(description = "Only messages before this time (YYYY-MM-DD or RFC 3339)")]
    pub before: Option<String>,
    #[schemars(description = "Conversation messages to include around each hit (default 3)")]
    pub context_size: Option<usize>,
    #[schemars(description = "Minimum cosine similarity in [0, 1] (default 0.2)")]
    pub threshold: Option<f32>,
    #[schemars(description = "Maximum results per page (default 10)")]
    pub max_results: Option<usize>,
    #[schemars(description = "Pagination offset (default 0)")]
    pub offset: Option<usize>,
}

impl ProjectSearchRequest {
    fn split(self) -> (SearchRequest, Option<String>) {
        (
            SearchRequest {
                query: self.query,
                after: self.after,
                before: self.before,
                context_size: self.context_size,
                threshold: self.threshold,
                max_results: self.max_results,
                offset: self.offset,
            },
            self.workspace,
        )
    }
}

#[tool_router]
impl RecallServer {
    #[tool(
        description = "Search past conversations scoped to the current project workspace. Returns matches with surrounding conversation context."
    )]
    async fn search_project_history(
        &self,
        Parameters(req): Parameters<ProjectSearchRequest>,
    ) -> Result<String, String> {
        let (req, workspace) = req.split();
        let workspace = workspace.unwrap_or_else(|| self.current_workspace.clone());
        self.scoped_search(req, Some(workspace), None).await
    }

    #[tool(
        description = "Search all past conversations across every project and source by meaning."
    )]
    async fn search_global_history(
        &self,
        Parameters(req): Parameters<SearchRequest>,
    ) -> Result<String, String> {
        self.scoped_search(req, None, None).await
    }

    #[tool(description = "Search past Kiro CLI conversations by meaning.")]
    async fn search_cli_history(
        &self,
        Parameters(req): Parameters<SearchRequest>,
    ) -> Result<String, String> {
        self.scoped_search(req, None, Some(SourceKind::Cli)).await
    }

    #[tool(description = "Search past Kiro IDE chat sessions by meaning.")]
    async fn search_ide_history(
        &self,
        Parameters(req): Parameters<SearchRequest>,
    ) -> Result<String, String> {
        self.scoped_search(req, None, Some(SourceKind::Ide)).await
    }
}

impl ServerHandler for RecallServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: rmcp::model::Implementation {
                name: "kiro-recall".into(),
                title: Some("Total Recall - semantic memory over Kiro conversations".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Search your own past conversations by meaning. Use search_project_history for \
                 the current project, search_global_history for everything, and the cli/ide \
                 variants to scope by source."
                    .into(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult {
            tools: self.tool_router.list_all(),
            next_cursor: None,
            meta: None,
        }))
    }

    #[allow(clippy::manual_async_fn)]
    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            let tool_name = request.name.to_string();
            let start = std::time::Instant::now();

            let ctx = ToolCallContext::new(self, request, context);
            let result = self.tool_router.call(ctx).await;

            debug!(
                tool = %tool_name,
                duration_ms = start.elapsed().as_millis() as u64,
                success = result.is_ok(),
                "Tool call finished"
            );
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::budget::MemoryBudget;
    use crate::testing::{fixture_config, seed_cli_store, seed_ide_doc, HashEmbedder};

    fn request(query: &str) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            after: None,
            before: None,
            context_size: None,
            threshold: None,
            max_results: None,
            offset: None,
        }
    }

    fn server(dir: &std::path::Path, current_workspace: &str) -> RecallServer {
        let config = fixture_config(dir);
        let index = Arc::new(EmbeddingIndex::with_budget(
            &config,
            Arc::new(HashEmbedder::new(32)),
            MemoryBudget::fixed(None),
        ));
        RecallServer::new(index, config.search.clone(), current_workspace.to_string())
    }

    #[tokio::test]
    async fn test_project_scope_uses_current_workspace() {
        let dir = tempfile::tempdir().unwrap();
        seed_cli_store(
            dir.path(),
            &[("/w1", &["shared words"]), ("/w2", &["shared words"])],
        );
        let server = server(dir.path(), "/w1");

        let mut req = request("shared words");
        req.threshold = Some(0.0);
        let workspace = server.current_workspace.clone();
        let raw = server
            .scoped_search(req, Some(workspace), None)
            .await
            .unwrap();

        let response: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let results = response["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["matched_message"]["workspace"], "/w1");
    }

    #[test]
    fn test_project_request_split_preserves_fields() {
        let req = ProjectSearchRequest {
            query: "q".to_string(),
            workspace: Some("/override".to_string()),
            after: Some("2025-01-01".to_string()),
            before: None,
            context_size: Some(5),
            threshold: Some(0.4),
            max_results: Some(3),
            offset: Some(6),
        };
        let (base, workspace) = req.split();
        assert_eq!(workspace.as_deref(), Some("/override"));
        assert_eq!(base.query, "q");
        assert_eq!(base.after.as_deref(), Some("2025-01-01"));
        assert_eq!(base.context_size, Some(5));
        assert_eq!(base.max_results, Some(3));
        assert_eq!(base.offset, Some(6));
    }

    #[tokio::test]
    async fn test_source_scope_filters() {
        let dir = tempfile::tempdir().unwrap();
        seed_cli_store(dir.path(), &[("/w", &["cli words"])]);
        seed_ide_doc(
            dir.path(),
            "%2Fw",
            "s.chat",
            r#"{"messages": [{"role": "user", "content": "ide words", "timestamp": "2025-01-15T11:00:00Z"}]}"#,
        );
        let server = server(dir.path(), "/w");

        let mut req = request("words");
        req.threshold = Some(0.0);
        let raw = server
            .scoped_search(req, None, Some(SourceKind::Cli))
            .await
            .unwrap();
        let response: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let results = response["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["matched_message"]["source"], "cli");
    }

    #[tokio::test]
    async fn test_invalid_bound_is_a_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        seed_cli_store(dir.path(), &[("/w", &["anything"])]);
        let server = server(dir.path(), "/w");

        let mut req = request("anything");
        req.after = Some("not a date".to_string());
        let result = server.scoped_search(req, None, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_response_shape() {
        let dir = tempfile::tempdir().unwrap();
        seed_cli_store(dir.path(), &[("/w", &["find this text"])]);
        let server = server(dir.path(), "/w");

        let raw = server
            .scoped_search(request("find this text"), None, None)
            .await
            .unwrap();
        let response: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert!(response["results"].is_array());
        assert_eq!(response["query"], "find this text");
        assert!(response["total_matches"].is_u64());
        assert_eq!(response["offset"], 0);
        assert!(response["has_more"].is_boolean());
        assert!(response["hint"].is_string());

        let hit = &response["results"][0];
        assert!(hit["score"].is_number());
        for field in ["role", "content", "timestamp", "workspace", "session_id", "uuid", "source"] {
            assert!(!hit["matched_message"][field].is_null(), "missing {field}");
        }
        assert_eq!(hit["context"][0]["is_match"], true);
    }
}
