//! HTTP dashboard: JSON API, WebSocket events and the static UI.

pub mod error;
pub mod events;
pub mod routes;
pub mod ws;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::context::AppContext;

/// Build the dashboard router. The static UI is mounted as a fallback when
/// `dashboard.static_dir` exists.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let static_dir = crate::config::expand_tilde(&ctx.config.dashboard.static_dir);

    let mut app = Router::new()
        .merge(routes::status_routes())
        .merge(routes::retrieval_routes())
        .merge(routes::event_routes())
        .route("/ws", get(ws::upgrade))
        .with_state(ctx);

    if Path::new(&static_dir).is_dir() {
        info!(dir = %static_dir.display(), "serving dashboard UI");
        app = app.fallback_service(ServeDir::new(static_dir));
    }

    app.layer(TraceLayer::new_for_http())
}

/// Serve until Ctrl-C, then stop the background loops.
pub async fn serve(ctx: Arc<AppContext>, host: &str, port: u16) -> Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("dashboard listening on http://{}", listener.local_addr()?);

    ctx.start_background();
    let app = router(Arc::clone(&ctx));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    ctx.shutdown().await;
    Ok(())
}
