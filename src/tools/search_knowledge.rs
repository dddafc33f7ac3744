//! MCP `search_knowledge` tool parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchKnowledgeParams {
    /// Free-text query.
    #[schemars(description = "Free-text query to rank knowledge graph nodes against")]
    pub query: String,

    /// Only nodes carrying at least one of these tags.
    #[schemars(description = "Only return nodes carrying at least one of these tags")]
    pub tags: Option<Vec<String>>,

    /// RFC 3339 timestamp; only nodes active since then.
    #[schemars(description = "Only nodes created or updated since this RFC 3339 timestamp")]
    pub since: Option<String>,

    #[schemars(description = "Maximum number of results. Defaults to the configured max_results.")]
    pub limit: Option<usize>,

    #[schemars(description = "If true, skip embeddings and rank by keyword overlap only")]
    pub keyword_only: Option<bool>,
}
