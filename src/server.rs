//! MCP server over stdio.

use crate::context::AppContext;
use crate::tools::TrilogyTools;
use anyhow::Result;
use rmcp::ServiceExt;
use std::sync::Arc;

/// Start the MCP server on stdio; background loops run for its lifetime.
pub async fn serve_stdio(ctx: Arc<AppContext>) -> Result<()> {
    tracing::info!("starting Trilogy MCP server on stdio");

    ctx.start_background();
    let tools = TrilogyTools::new(Arc::clone(&ctx));
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    tracing::info!("MCP server shut down");

    ctx.shutdown().await;
    Ok(())
}
