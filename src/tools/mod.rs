pub mod feedback_history;
pub mod run_feedback_cycle;
pub mod search_knowledge;
pub mod system_status;

use chrono::{DateTime, Utc};
use feedback_history::FeedbackHistoryParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use run_feedback_cycle::RunFeedbackCycleParams;
use search_knowledge::SearchKnowledgeParams;
use std::sync::Arc;
use system_status::{RepairSystemParams, SystemStatusParams};

use crate::context::AppContext;
use crate::knowledge::NodeFilter;

/// MCP tool handler over the shared [`AppContext`].
#[derive(Clone)]
pub struct TrilogyTools {
    tool_router: ToolRouter<Self>,
    ctx: Arc<AppContext>,
}

#[tool_router]
impl TrilogyTools {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            ctx,
        }
    }

    /// Rank knowledge graph nodes against a query.
    #[tool(description = "Search the knowledge graph. Uses embedding similarity when available, keyword overlap otherwise; results are re-ranked by recency and connectivity.")]
    async fn search_knowledge(
        &self,
        Parameters(params): Parameters<SearchKnowledgeParams>,
    ) -> Result<String, String> {
        if params.query.trim().is_empty() {
            return Err("query must not be empty".into());
        }
        if params.limit == Some(0) {
            return Err("limit must be at least 1".into());
        }
        let since = params
            .since
            .as_deref()
            .map(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| format!("invalid 'since' timestamp: {e}"))
            })
            .transpose()?;
        let filter = NodeFilter {
            tags: params.tags.unwrap_or_default(),
            since,
        };

        tracing::info!(query = %params.query, "search_knowledge called");

        let retriever = Arc::clone(&self.ctx.retriever);
        let keyword_only = params.keyword_only.unwrap_or(false);
        let query = params.query;
        let limit = params.limit;
        // Embedding and SQLite reads are blocking.
        let response = tokio::task::spawn_blocking(move || {
            if keyword_only {
                retriever.search_keywords(&query, &filter, limit)
            } else {
                retriever.search(&query, &filter, limit)
            }
        })
        .await
        .map_err(|e| format!("search task failed: {e}"))?
        .map_err(|e| format!("search failed: {e:#}"))?;

        serde_json::to_string(&response).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Run one feedback cycle now.
    #[tool(description = "Run one feedback-loop cycle immediately and return per-endpoint results.")]
    async fn run_feedback_cycle(
        &self,
        Parameters(params): Parameters<RunFeedbackCycleParams>,
    ) -> Result<String, String> {
        tracing::info!("run_feedback_cycle called");
        let mut cycle = self.ctx.feedback.run_now().await;
        if !params.include_responses.unwrap_or(false) {
            for endpoint in &mut cycle.endpoints {
                endpoint.response = None;
            }
        }
        serde_json::to_string(&cycle).map_err(|e| format!("serialization failed: {e}"))
    }

    #[tool(description = "Return retained feedback-loop cycles, oldest first.")]
    async fn feedback_history(
        &self,
        Parameters(params): Parameters<FeedbackHistoryParams>,
    ) -> Result<String, String> {
        let mut history = self.ctx.feedback.history();
        if let Some(limit) = params.limit {
            let skip = history.len().saturating_sub(limit);
            history.drain(..skip);
        }
        serde_json::to_string(&history).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Component health plus feedback-loop and cache status.
    #[tool(description = "Report component health (operational/missing/error/degraded), feedback loop status and embedding cache statistics.")]
    async fn system_status(
        &self,
        Parameters(params): Parameters<SystemStatusParams>,
    ) -> Result<String, String> {
        let components = if params.refresh.unwrap_or(false) {
            self.ctx.health.check_components().await
        } else {
            self.ctx.health.components()
        };
        Ok(serde_json::json!({
            "components": components,
            "feedback": self.ctx.feedback.status(),
            "cache": self.ctx.retriever.cache_stats(),
        })
        .to_string())
    }

    #[tool(description = "Repair components in error/missing state: re-read credentials, re-instantiate clients, restart agents. Requires confirm=true.")]
    async fn repair_system(
        &self,
        Parameters(params): Parameters<RepairSystemParams>,
    ) -> Result<String, String> {
        if !params.confirm {
            return Err("repair_system requires confirm=true".into());
        }
        let outcomes = self.ctx.health.repair_system().await;
        serde_json::to_string(&outcomes).map_err(|e| format!("serialization failed: {e}"))
    }
}

#[tool_handler]
impl ServerHandler for TrilogyTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Trilogy Brain exposes a knowledge graph and service monitoring. Use \
                 search_knowledge to query notes, run_feedback_cycle to poll endpoints, \
                 and system_status to check component health."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, TrilogyConfig};

    fn tools(dir: &tempfile::TempDir) -> TrilogyTools {
        let mut config = TrilogyConfig::default();
        config.storage.db_path = dir.path().join("graph.db").to_string_lossy().into_owned();
        config.embedding.provider = "none".into();
        config.feedback.config_path = dir.path().join("mcp.json").to_string_lossy().into_owned();
        config.health.config_path = dir.path().join("health.json").to_string_lossy().into_owned();
        let ctx =
            AppContext::build_with_credentials(config, Arc::new(Credentials::default)).unwrap();
        TrilogyTools::new(Arc::new(ctx))
    }

    fn params(query: &str, limit: Option<usize>) -> SearchKnowledgeParams {
        SearchKnowledgeParams {
            query: query.into(),
            tags: None,
            since: None,
            limit,
            keyword_only: None,
        }
    }

    #[tokio::test]
    async fn search_rejects_zero_limit() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(&dir);

        let err = tools
            .search_knowledge(Parameters(params("rust", Some(0))))
            .await
            .unwrap_err();
        assert!(err.contains("limit must be at least 1"), "{err}");

        let ok = tools
            .search_knowledge(Parameters(params("rust", Some(1))))
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&ok).unwrap();
        assert_eq!(body["results"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn repair_requires_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(&dir);
        let err = tools
            .repair_system(Parameters(RepairSystemParams { confirm: false }))
            .await
            .unwrap_err();
        assert!(err.contains("confirm=true"));
    }
}
