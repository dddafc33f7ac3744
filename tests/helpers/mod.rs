#![allow(dead_code)]

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::routing::{any, get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use trilogy_brain::clients::HttpPolicy;
use trilogy_brain::config::{Credentials, TrilogyConfig};
use trilogy_brain::context::AppContext;
use trilogy_brain::knowledge::{KnowledgeNode, Link};

/// A local HTTP server standing in for polled endpoints and notification sinks.
pub struct MockServer {
    pub base: String,
    /// Bodies POSTed to `/notify`, in arrival order.
    pub received: Arc<Mutex<Vec<Value>>>,
}

impl MockServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }
}

/// Routes:
/// - `GET /ok` returns `{"status": "ok", "count": 5}`
/// - `GET /fail` returns 500
/// - `/echo` (any method) returns the raw query string and JSON body
/// - `POST /notify` records its body
/// - `GET /limited` returns 429 with `Retry-After: 0`
/// - `GET /slow` answers after a minute
/// - `POST /v1/messages` and `POST /chat/completions` answer like Claude and
///   Perplexity, echoing the system prompt and user message
pub async fn mock_server() -> MockServer {
    let received = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/ok", get(|| async { Json(json!({"status": "ok", "count": 5})) }))
        .route(
            "/fail",
            get(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "boom"})),
                )
            }),
        )
        .route(
            "/echo",
            any(|RawQuery(query): RawQuery, body: String| async move {
                let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
                Json(json!({"query": query, "body": body}))
            }),
        )
        .route(
            "/limited",
            get(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [("retry-after", "0")],
                    Json(json!({"error": "slow down"})),
                )
            }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Json(json!({"status": "late"}))
            }),
        )
        .route(
            "/v1/messages",
            post(|Json(body): Json<Value>| async move {
                let text = format!(
                    "system: {} | user: {}",
                    body["system"].as_str().unwrap_or(""),
                    body["messages"][0]["content"].as_str().unwrap_or("")
                );
                Json(json!({
                    "content": [{"type": "text", "text": text}],
                    "model": "mock-claude",
                    "usage": {"input_tokens": 12, "output_tokens": 4}
                }))
            }),
        )
        .route(
            "/chat/completions",
            post(|Json(body): Json<Value>| async move {
                let text = format!(
                    "system: {} | user: {}",
                    body["messages"][0]["content"].as_str().unwrap_or(""),
                    body["messages"][1]["content"].as_str().unwrap_or("")
                );
                Json(json!({
                    "model": "mock-sonar",
                    "choices": [{"message": {"content": text}}]
                }))
            }),
        )
        .route(
            "/notify",
            post(
                |State(received): State<Arc<Mutex<Vec<Value>>>>, Json(body): Json<Value>| async move {
                    received.lock().unwrap().push(body);
                    StatusCode::ACCEPTED
                },
            ),
        )
        .with_state(Arc::clone(&received));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockServer {
        base: format!("http://{addr}"),
        received,
    }
}

/// Short timeouts and no retries so failing calls return quickly.
pub fn test_policy() -> HttpPolicy {
    HttpPolicy {
        timeout: std::time::Duration::from_secs(5),
        max_retries: 0,
        backoff_base: std::time::Duration::from_millis(10),
        backoff_max: std::time::Duration::from_millis(50),
    }
}

pub fn node(id: &str, title: &str, content: &str, tags: &[&str], age_days: i64) -> KnowledgeNode {
    let ts = Utc::now() - Duration::days(age_days);
    KnowledgeNode {
        id: id.into(),
        title: title.into(),
        content: content.into(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        metadata: None,
        created_at: ts,
        updated_at: ts,
    }
}

pub fn link(id: &str, source: &str, target: &str) -> Link {
    Link {
        id: id.into(),
        source_id: source.into(),
        target_id: target.into(),
        link_type: "related".into(),
        created_at: Utc::now(),
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Config with every file under `dir`, no embedding backend and no retries.
pub fn test_config(dir: &TempDir) -> TrilogyConfig {
    let mut config = TrilogyConfig::default();
    config.storage.db_path = path_str(&dir.path().join("graph.db"));
    config.embedding.provider = "none".into();
    config.http.max_retries = 0;
    config.feedback.config_path = path_str(&dir.path().join("mcp.json"));
    config.health.config_path = path_str(&dir.path().join("health.json"));
    config.dashboard.static_dir = path_str(&dir.path().join("static"));
    std::fs::write(
        dir.path().join("health.json"),
        json!({"log_dir": path_str(&dir.path().join("logs"))}).to_string(),
    )
    .unwrap();
    config
}

/// Context with no credentials, built over [`test_config`].
pub fn test_context(dir: &TempDir) -> AppContext {
    test_context_with(test_config(dir))
}

pub fn test_context_with(config: TrilogyConfig) -> AppContext {
    test_context_with_credentials(config, Credentials::default())
}

pub fn test_context_with_credentials(config: TrilogyConfig, creds: Credentials) -> AppContext {
    AppContext::build_with_credentials(config, Arc::new(move || creds.clone())).unwrap()
}
