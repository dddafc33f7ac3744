//! Dashboard events, accepted over `POST /api/events` and the WebSocket.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::error::ApiError;
use crate::clients::claude::ClaudeClient;
use crate::clients::perplexity::PerplexityClient;
use crate::clients::CallError;
use crate::context::AppContext;
use crate::knowledge::NodeFilter;

pub const FEEDBACK_NODE: &str = "feedback_loop";
pub const HEALTH_NODE: &str = "health_monitor";

/// Knowledge hits included as context for chat messages.
const CHAT_CONTEXT_HITS: usize = 3;
const CHAT_MAX_TOKENS: u32 = 1024;

/// `{"event": "...", "data": {...}}`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum DashboardEvent {
    ChatMessage {
        message: String,
        #[serde(default)]
        use_knowledge: Option<bool>,
        #[serde(default)]
        provider: ChatProvider,
    },
    StartNode {
        node: String,
    },
    StopNode {
        node: String,
    },
    ConnectTool {
        tool: String,
    },
}

/// Service answering a chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatProvider {
    #[default]
    Claude,
    Perplexity,
}

impl DashboardEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChatMessage { .. } => "chat_message",
            Self::StartNode { .. } => "start_node",
            Self::StopNode { .. } => "stop_node",
            Self::ConnectTool { .. } => "connect_tool",
        }
    }
}

pub async fn handle_event(ctx: &AppContext, event: DashboardEvent) -> Result<Value, ApiError> {
    let name = event.name();
    tracing::debug!(event = name, "dashboard event");

    let result = match event {
        DashboardEvent::ChatMessage {
            message,
            use_knowledge,
            provider,
        } => chat(ctx, &message, use_knowledge.unwrap_or(true), provider).await?,
        DashboardEvent::StartNode { node } => set_node(ctx, &node, true).await?,
        DashboardEvent::StopNode { node } => set_node(ctx, &node, false).await?,
        DashboardEvent::ConnectTool { tool } => {
            let gateway = ctx
                .health
                .mcp()
                .ok_or_else(|| CallError::MissingCredential("MCP_GATEWAY_URL".into()))?;
            let response = gateway.connect_tool(&tool).await?;
            json!({"tool": tool, "response": response})
        }
    };

    ctx.broadcast(json!({"type": format!("{name}_result"), "data": result}));
    Ok(result)
}

enum ChatClient {
    Claude(Arc<ClaudeClient>),
    Perplexity(Arc<PerplexityClient>),
}

async fn chat(
    ctx: &AppContext,
    message: &str,
    use_knowledge: bool,
    provider: ChatProvider,
) -> Result<Value, ApiError> {
    if message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }
    // Resolve the client first so a missing key fails before any search.
    let client = match provider {
        ChatProvider::Claude => ChatClient::Claude(
            ctx.health
                .claude()
                .ok_or_else(|| CallError::MissingCredential("ANTHROPIC_API_KEY".into()))?,
        ),
        ChatProvider::Perplexity => ChatClient::Perplexity(
            ctx.health
                .perplexity()
                .ok_or_else(|| CallError::MissingCredential("PERPLEXITY_API_KEY".into()))?,
        ),
    };

    let mut sources = Vec::new();
    let system = if use_knowledge {
        let retriever = Arc::clone(&ctx.retriever);
        let query = message.to_string();
        // Embedding and SQLite reads are blocking.
        let hits = tokio::task::spawn_blocking(move || {
            retriever.search(&query, &NodeFilter::default(), Some(CHAT_CONTEXT_HITS))
        })
        .await
        .map_err(|e| anyhow::anyhow!("knowledge search task failed: {e}"))??;
        let context: Vec<String> = hits
            .results
            .iter()
            .map(|hit| format!("## {}\n{}", hit.title, hit.content))
            .collect();
        sources = hits.results.iter().map(|hit| hit.id.clone()).collect();
        (!context.is_empty()).then(|| {
            format!(
                "Relevant notes from the knowledge graph:\n\n{}",
                context.join("\n\n")
            )
        })
    } else {
        None
    };

    let completion = match client {
        ChatClient::Claude(claude) => {
            claude
                .complete(message, system.as_deref(), CHAT_MAX_TOKENS)
                .await?
        }
        ChatClient::Perplexity(perplexity) => perplexity.ask(message, system.as_deref()).await?,
    };
    Ok(json!({
        "reply": completion.text,
        "model": completion.model,
        "provider": provider,
        "sources": sources,
    }))
}

async fn set_node(ctx: &AppContext, node: &str, run: bool) -> Result<Value, ApiError> {
    let changed = match (node, run) {
        (FEEDBACK_NODE, true) => ctx.feedback.start(),
        (FEEDBACK_NODE, false) => {
            let was_running = ctx.feedback.is_running();
            ctx.feedback.stop().await;
            was_running
        }
        (HEALTH_NODE, true) => ctx.health.start(),
        (HEALTH_NODE, false) => {
            let was_running = ctx.health.is_running();
            ctx.health.stop().await;
            was_running
        }
        _ => return Err(ApiError::not_found(format!("unknown node {node:?}"))),
    };
    tracing::info!(node, running = run, changed, "node state requested");
    Ok(json!({"node": node, "running": run, "changed": changed}))
}
