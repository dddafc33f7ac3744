//! Process-wide state, built once at startup and shared by `Arc`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;

use crate::clients::HttpPolicy;
use crate::config::{Credentials, TrilogyConfig};
use crate::db;
use crate::embedding;
use crate::feedback::{FeedbackLoop, FeedbackLoopConfig};
use crate::health::{CredentialSource, HealthMonitor, HealthMonitorConfig};
use crate::knowledge::{KnowledgeRetriever, SqliteGraph};

/// Capacity of the event broadcast channel feeding WebSocket clients.
const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct AppContext {
    pub config: TrilogyConfig,
    pub policy: HttpPolicy,
    pub graph: Arc<Mutex<Connection>>,
    pub retriever: Arc<KnowledgeRetriever>,
    pub feedback: Arc<FeedbackLoop>,
    pub health: Arc<HealthMonitor>,
    pub notifications: NotificationLog,
    /// Outgoing events pushed to every WebSocket client.
    pub events: broadcast::Sender<Value>,
    pub started_at: DateTime<Utc>,
}

impl AppContext {
    /// Build everything from config, reading credentials from the environment.
    pub fn build(config: TrilogyConfig) -> Result<Self> {
        Self::build_with_credentials(config, Arc::new(Credentials::from_env))
    }

    pub fn build_with_credentials(
        config: TrilogyConfig,
        credentials: CredentialSource,
    ) -> Result<Self> {
        let policy = HttpPolicy::from_config(&config.http);

        let db_path = config.resolved_db_path();
        let conn = db::open_database(&db_path)
            .with_context(|| format!("failed to open graph database {}", db_path.display()))?;
        let graph = Arc::new(Mutex::new(conn));

        let embedder = embedding::create_provider(&config.embedding);
        let retriever = KnowledgeRetriever::new(
            Arc::new(SqliteGraph::new(Arc::clone(&graph))),
            embedder,
            config.retrieval.clone(),
        )?;

        let feedback_config = FeedbackLoopConfig::load(
            crate::config::expand_tilde(&config.feedback.config_path),
            &config.feedback,
        )?;
        let feedback = FeedbackLoop::new(feedback_config, policy.clone())?;

        let health_config =
            HealthMonitorConfig::load(crate::config::expand_tilde(&config.health.config_path))?;
        let health = HealthMonitor::new(
            health_config,
            &config.health,
            config.clients.clone(),
            policy.clone(),
            credentials,
        )
        .with_graph(Arc::clone(&graph));

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            notifications: NotificationLog::new(config.dashboard.notification_history),
            config,
            policy,
            graph,
            retriever: Arc::new(retriever),
            feedback: Arc::new(feedback),
            health: Arc::new(health),
            events,
            started_at: Utc::now(),
        })
    }

    /// Start the background loops the configuration enables.
    pub fn start_background(&self) {
        if self.feedback.config().enabled {
            self.feedback.start();
        } else {
            tracing::info!("feedback loop disabled");
        }
        self.health.start();
    }

    pub async fn shutdown(&self) {
        self.feedback.stop().await;
        self.health.stop().await;
    }

    /// Push an event to WebSocket subscribers; dropped when nobody listens.
    pub fn broadcast(&self, event: Value) {
        let _ = self.events.send(event);
    }
}

/// Bounded log of notifications received from feedback loops.
pub struct NotificationLog {
    capacity: usize,
    entries: RwLock<VecDeque<Value>>,
}

impl NotificationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(VecDeque::new()),
        }
    }

    pub fn push(&self, entry: Value) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<Value> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .rev()
            .cloned()
            .collect()
    }
}
