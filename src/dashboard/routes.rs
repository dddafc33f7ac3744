//! Dashboard JSON API.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::error::ApiError;
use super::events::{self, DashboardEvent};
use crate::config::RetrievalConfig;
use crate::context::AppContext;
use crate::db;
use crate::feedback::FeedbackStatus;
use crate::health::ComponentHealth;
use crate::knowledge::CacheStats;

type Ctx = Arc<AppContext>;

pub fn status_routes() -> Router<Ctx> {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/metrics", get(metrics))
}

pub fn retrieval_routes() -> Router<Ctx> {
    Router::new()
        .route("/api/clear-cache", post(clear_cache))
        .route("/api/settings", get(get_settings).post(update_settings))
}

pub fn event_routes() -> Router<Ctx> {
    Router::new()
        .route("/api/notifications", get(list_notifications).post(receive_notification))
        .route("/api/events", post(post_event))
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
    started_at: chrono::DateTime<chrono::Utc>,
    uptime_secs: i64,
    components: Vec<ComponentHealth>,
    feedback: FeedbackStatus,
    retrieval: RetrievalStatus,
}

#[derive(Serialize)]
struct RetrievalStatus {
    embedding_backend: String,
    semantic_available: bool,
}

async fn status(State(ctx): State<Ctx>) -> Json<StatusResponse> {
    let components = ctx.health.components();
    let healthy = components.iter().all(|c| c.status.is_healthy());
    Json(StatusResponse {
        status: if healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        started_at: ctx.started_at,
        uptime_secs: (chrono::Utc::now() - ctx.started_at).num_seconds(),
        components,
        feedback: ctx.feedback.status(),
        retrieval: RetrievalStatus {
            embedding_backend: ctx.retriever.embedding_backend().to_string(),
            semantic_available: ctx.retriever.semantic_available(),
        },
    })
}

#[derive(Serialize)]
struct MetricsResponse {
    cache: CacheStats,
    feedback: FeedbackMetrics,
    graph: Option<db::GraphCounts>,
    notifications_received: usize,
}

#[derive(Serialize)]
struct FeedbackMetrics {
    cycles_run: u64,
    history_len: usize,
    last_cycle_succeeded: Option<usize>,
    last_cycle_endpoints: Option<usize>,
    avg_duration_secs: Option<f64>,
}

async fn metrics(State(ctx): State<Ctx>) -> Result<Json<MetricsResponse>, ApiError> {
    let history = ctx.feedback.history();
    let last = history.last();
    let durations: Vec<f64> = history
        .iter()
        .flat_map(|c| c.endpoints.iter().map(|e| e.duration))
        .collect();

    // SQLite reads block, so they run off the async workers.
    let conn = Arc::clone(&ctx.graph);
    let counts = tokio::task::spawn_blocking(move || {
        let conn = conn
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
        db::graph_counts(&conn)
    })
    .await
    .map_err(|e| anyhow::anyhow!("graph count task failed: {e}"))?;
    let graph = match counts {
        Ok(counts) => Some(counts),
        Err(e) => {
            tracing::warn!(error = %e, "graph count query failed");
            None
        }
    };

    Ok(Json(MetricsResponse {
        cache: ctx.retriever.cache_stats(),
        feedback: FeedbackMetrics {
            cycles_run: ctx.feedback.status().cycles_run,
            history_len: history.len(),
            last_cycle_succeeded: last.map(|c| c.succeeded()),
            last_cycle_endpoints: last.map(|c| c.endpoints.len()),
            avg_duration_secs: (!durations.is_empty())
                .then(|| durations.iter().sum::<f64>() / durations.len() as f64),
        },
        graph,
        notifications_received: ctx.notifications.recent().len(),
    }))
}

async fn clear_cache(State(ctx): State<Ctx>) -> Result<Json<Value>, ApiError> {
    let cleared = ctx.retriever.clear_cache()?;
    Ok(Json(json!({"cleared": cleared})))
}

async fn get_settings(State(ctx): State<Ctx>) -> Json<RetrievalConfig> {
    Json(ctx.retriever.settings())
}

/// Partial update: keys present in the body override current settings.
async fn update_settings(
    State(ctx): State<Ctx>,
    Json(patch): Json<Value>,
) -> Result<Json<RetrievalConfig>, ApiError> {
    let Value::Object(patch) = patch else {
        return Err(ApiError::bad_request("settings must be a JSON object"));
    };
    let mut merged = serde_json::to_value(ctx.retriever.settings())
        .map_err(|e| anyhow::anyhow!("failed to serialize settings: {e}"))?;
    if let Value::Object(current) = &mut merged {
        for (key, value) in patch {
            if !current.contains_key(&key) {
                return Err(ApiError::bad_request(format!("unknown setting {key:?}")));
            }
            current.insert(key, value);
        }
    }
    let settings: RetrievalConfig = serde_json::from_value(merged)
        .map_err(|e| ApiError::bad_request(format!("invalid settings: {e}")))?;
    ctx.retriever
        .update_settings(settings)
        .map_err(|e| ApiError::bad_request(format!("{e:#}")))?;
    Ok(Json(ctx.retriever.settings()))
}

async fn list_notifications(State(ctx): State<Ctx>) -> Json<Vec<Value>> {
    Json(ctx.notifications.recent())
}

async fn receive_notification(
    State(ctx): State<Ctx>,
    Json(notification): Json<Value>,
) -> (StatusCode, Json<Value>) {
    tracing::debug!("notification received");
    ctx.notifications.push(notification.clone());
    ctx.broadcast(json!({"type": "notification", "data": notification}));
    (StatusCode::ACCEPTED, Json(json!({"received": true})))
}

async fn post_event(
    State(ctx): State<Ctx>,
    Json(event): Json<DashboardEvent>,
) -> Result<Json<Value>, ApiError> {
    let result = events::handle_event(&ctx, event).await?;
    Ok(Json(result))
}
