//! Component health tracking and self-repair.
//!
//! The monitor owns the external-service clients. A check records one
//! [`ComponentHealth`] per component:
//!
//! - services (`claude`, `perplexity`, `mcp`): `missing` without credentials,
//!   `error` when the client could not be built, `degraded` when a probe
//!   failed, `operational` otherwise
//! - `agent:<name>` for each expected agent process
//! - `memory_graph` when a graph database is attached
//!
//! [`HealthMonitor::repair_system`] re-reads credentials and rebuilds clients
//! for components in `error`/`missing`, and restarts missing agents.

pub mod agents;
pub mod config;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::io::Write;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use config::HealthMonitorConfig;

use crate::clients::claude::ClaudeClient;
use crate::clients::mcp::McpGateway;
use crate::clients::perplexity::PerplexityClient;
use crate::clients::{CallError, CallResult, HttpPolicy};
use crate::config::{ClientsConfig, Credentials, HealthSettings};
use crate::db;

pub const CLAUDE: &str = "claude";
pub const PERPLEXITY: &str = "perplexity";
pub const MCP: &str = "mcp";
pub const MEMORY_GRAPH: &str = "memory_graph";
const AGENT_PREFIX: &str = "agent:";

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of fresh credentials, consulted on every repair.
pub type CredentialSource = Arc<dyn Fn() -> Credentials + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Operational,
    Missing,
    Error,
    Degraded,
}

impl ComponentStatus {
    pub fn is_healthy(self) -> bool {
        self == Self::Operational
    }

    pub fn needs_repair(self) -> bool {
        matches!(self, Self::Missing | Self::Error)
    }
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Operational => "operational",
            Self::Missing => "missing",
            Self::Error => "error",
            Self::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: ComponentStatus,
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairOutcome {
    pub component: String,
    pub repaired: bool,
    pub message: String,
}

/// A client plus the status its construction produced.
struct Slot<T> {
    client: Option<Arc<T>>,
    status: ComponentStatus,
    message: Option<String>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            status: self.status,
            message: self.message.clone(),
        }
    }
}

impl<T> Slot<T> {
    fn build(result: CallResult<T>) -> Self {
        match result {
            Ok(client) => Self {
                client: Some(Arc::new(client)),
                status: ComponentStatus::Operational,
                message: None,
            },
            Err(CallError::MissingCredential(what)) => Self {
                client: None,
                status: ComponentStatus::Missing,
                message: Some(format!("{what} is not set")),
            },
            Err(e) => Self {
                client: None,
                status: ComponentStatus::Error,
                message: Some(e.to_string()),
            },
        }
    }
}

#[derive(Clone)]
struct ServiceClients {
    claude: Slot<ClaudeClient>,
    perplexity: Slot<PerplexityClient>,
    mcp: Slot<McpGateway>,
}

type Observation = (String, ComponentStatus, Option<String>);

pub struct HealthMonitor {
    config: HealthMonitorConfig,
    probe_components: Vec<String>,
    clients_config: ClientsConfig,
    policy: HttpPolicy,
    credentials: CredentialSource,
    graph: Option<Arc<Mutex<Connection>>>,
    clients: RwLock<ServiceClients>,
    components: RwLock<BTreeMap<String, ComponentHealth>>,
    task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl HealthMonitor {
    /// Build every service client once from the current credentials.
    pub fn new(
        config: HealthMonitorConfig,
        settings: &HealthSettings,
        clients_config: ClientsConfig,
        policy: HttpPolicy,
        credentials: CredentialSource,
    ) -> Self {
        let clients = build_clients(&credentials(), &clients_config, &policy);
        Self {
            config,
            probe_components: settings.probe_components.clone(),
            clients_config,
            policy,
            credentials,
            graph: None,
            clients: RwLock::new(clients),
            components: RwLock::new(BTreeMap::new()),
            task: Mutex::new(None),
        }
    }

    /// Include the memory graph database in checks.
    pub fn with_graph(mut self, conn: Arc<Mutex<Connection>>) -> Self {
        self.graph = Some(conn);
        self
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    pub fn claude(&self) -> Option<Arc<ClaudeClient>> {
        read(&self.clients).claude.client.clone()
    }

    pub fn perplexity(&self) -> Option<Arc<PerplexityClient>> {
        read(&self.clients).perplexity.client.clone()
    }

    pub fn mcp(&self) -> Option<Arc<McpGateway>> {
        read(&self.clients).mcp.client.clone()
    }

    /// Results of the latest check, sorted by component name.
    pub fn components(&self) -> Vec<ComponentHealth> {
        read(&self.components).values().cloned().collect()
    }

    pub fn is_healthy(&self) -> bool {
        read(&self.components)
            .values()
            .all(|c| c.status.is_healthy())
    }

    fn should_probe(&self, component: &str) -> bool {
        self.probe_components.iter().any(|c| c == component)
    }

    /// Check every component and record the results.
    pub async fn check_components(&self) -> Vec<ComponentHealth> {
        let clients = read(&self.clients).clone();
        let mut observed: Vec<Observation> = Vec::new();

        let status = probe(&clients.claude, self.should_probe(CLAUDE), |c| async move {
            c.ping().await
        })
        .await;
        observed.push((CLAUDE.into(), status.0, status.1));

        let status = probe(&clients.perplexity, self.should_probe(PERPLEXITY), |c| async move {
            c.ping().await
        })
        .await;
        observed.push((PERPLEXITY.into(), status.0, status.1));

        let status = probe(&clients.mcp, self.should_probe(MCP), |c| async move {
            c.ping().await
        })
        .await;
        observed.push((MCP.into(), status.0, status.1));

        if let Some(conn) = &self.graph {
            // The integrity scan reads every page.
            let conn = Arc::clone(conn);
            let (status, message) = tokio::task::spawn_blocking(move || check_graph(&conn))
                .await
                .unwrap_or_else(|e| {
                    (ComponentStatus::Error, Some(format!("graph check task failed: {e}")))
                });
            observed.push((MEMORY_GRAPH.into(), status, message));
        }

        if !self.config.expected_agents.is_empty() {
            let processes = match tokio::task::spawn_blocking(agents::running_processes).await {
                Ok(processes) => processes,
                Err(e) => {
                    tracing::warn!(error = %e, "process scan failed");
                    Default::default()
                }
            };
            for agent in &self.config.expected_agents {
                let observation = if agents::is_running(agent, &processes) {
                    (ComponentStatus::Operational, None)
                } else {
                    (ComponentStatus::Missing, Some("process not running".to_string()))
                };
                observed.push((format!("{AGENT_PREFIX}{agent}"), observation.0, observation.1));
            }
        }

        self.record(observed)
    }

    fn record(&self, observed: Vec<Observation>) -> Vec<ComponentHealth> {
        let now = Utc::now();
        let mut to_alert = Vec::new();
        let snapshot = {
            let mut components = write(&self.components);
            for (name, status, message) in observed {
                let previous = components
                    .get(&name)
                    .map(|c| c.consecutive_failures)
                    .unwrap_or(0);
                let consecutive_failures = if status.is_healthy() { 0 } else { previous + 1 };
                let health = ComponentHealth {
                    name: name.clone(),
                    status,
                    message,
                    checked_at: now,
                    consecutive_failures,
                };
                if consecutive_failures == self.config.alert_threshold {
                    to_alert.push(health.clone());
                }
                components.insert(name, health);
            }
            components.values().cloned().collect::<Vec<_>>()
        };

        for component in &to_alert {
            self.raise_alert(component);
        }
        let unhealthy = snapshot.iter().filter(|c| !c.status.is_healthy()).count();
        tracing::info!(components = snapshot.len(), unhealthy, "health check complete");
        snapshot
    }

    fn raise_alert(&self, component: &ComponentHealth) {
        tracing::warn!(
            component = %component.name,
            status = %component.status,
            failures = component.consecutive_failures,
            "component alert threshold reached"
        );
        let path = self.config.alert_log_path();
        let line = serde_json::json!({
            "timestamp": Utc::now(),
            "component": component.name,
            "status": component.status,
            "message": component.message,
            "consecutive_failures": component.consecutive_failures,
        });
        let written = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            writeln!(file, "{line}")
        })();
        if let Err(e) = written {
            tracing::warn!(path = %path.display(), error = %e, "failed to write alert log");
        }
    }

    /// Repair every component in `error`/`missing`. Never fails; outcomes
    /// say what happened per component.
    pub async fn repair_system(&self) -> Vec<RepairOutcome> {
        if read(&self.components).is_empty() {
            self.check_components().await;
        }
        let targets: Vec<String> = read(&self.components)
            .values()
            .filter(|c| c.status.needs_repair())
            .map(|c| c.name.clone())
            .collect();
        if targets.is_empty() {
            return Vec::new();
        }

        let creds = (self.credentials)();
        let mut outcomes = Vec::with_capacity(targets.len());
        for name in targets {
            let outcome = match name.as_str() {
                CLAUDE => {
                    let slot = Slot::build(ClaudeClient::new(
                        creds.anthropic_api_key.as_deref(),
                        &self.clients_config,
                        &self.policy,
                    ));
                    let outcome = self.apply_rebuild(&name, &slot);
                    write(&self.clients).claude = slot;
                    outcome
                }
                PERPLEXITY => {
                    let slot = Slot::build(PerplexityClient::new(
                        creds.perplexity_api_key.as_deref(),
                        &self.clients_config,
                        &self.policy,
                    ));
                    let outcome = self.apply_rebuild(&name, &slot);
                    write(&self.clients).perplexity = slot;
                    outcome
                }
                MCP => {
                    let slot = Slot::build(McpGateway::new(
                        gateway_url(&creds, &self.clients_config),
                        creds.composio_api_key.as_deref(),
                        &self.policy,
                    ));
                    let outcome = self.apply_rebuild(&name, &slot);
                    write(&self.clients).mcp = slot;
                    outcome
                }
                other => match other.strip_prefix(AGENT_PREFIX) {
                    Some(agent) => self.restart_agent(other, agent),
                    None => RepairOutcome {
                        component: other.to_string(),
                        repaired: false,
                        message: "no repair action available".into(),
                    },
                },
            };

            if outcome.repaired {
                tracing::info!(component = %outcome.component, message = %outcome.message, "component repaired");
            } else {
                tracing::warn!(component = %outcome.component, message = %outcome.message, "repair failed");
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Record the status of a rebuilt client.
    fn apply_rebuild<T>(&self, name: &str, slot: &Slot<T>) -> RepairOutcome {
        let repaired = slot.client.is_some();
        let mut components = write(&self.components);
        if let Some(component) = components.get_mut(name) {
            component.status = slot.status;
            component.message = slot.message.clone();
            component.checked_at = Utc::now();
            if repaired {
                component.consecutive_failures = 0;
            }
        }
        RepairOutcome {
            component: name.to_string(),
            repaired,
            message: if repaired {
                "client re-instantiated".into()
            } else {
                slot.message.clone().unwrap_or_else(|| "client unavailable".into())
            },
        }
    }

    fn restart_agent(&self, component: &str, agent: &str) -> RepairOutcome {
        let (repaired, message) = match self.config.agent_commands.get(agent) {
            None => (false, "no restart command configured".to_string()),
            Some(command) => match agents::spawn_agent(command) {
                Ok(pid) => (true, format!("restart command spawned (pid {pid})")),
                Err(e) => (false, format!("{e:#}")),
            },
        };
        RepairOutcome {
            component: component.to_string(),
            repaired,
            message,
        }
    }

    pub fn is_running(&self) -> bool {
        match self.task.lock() {
            Ok(slot) => slot.as_ref().is_some_and(|(_, handle)| !handle.is_finished()),
            Err(poisoned) => poisoned
                .into_inner()
                .as_ref()
                .is_some_and(|(_, handle)| !handle.is_finished()),
        }
    }

    /// Spawn the periodic check task. Returns `false` if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut slot = match self.task.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return false;
        }
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(Arc::clone(self), rx));
        *slot = Some((tx, handle));
        tracing::info!(
            interval_secs = self.config.check_interval,
            self_healing = self.config.self_healing_enabled,
            "health monitor started"
        );
        true
    }

    pub async fn stop(&self) {
        let task = match self.task.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some((tx, handle)) = task else {
            return;
        };
        let _ = tx.send(true);
        let abort = handle.abort_handle();
        if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
            tracing::warn!("health monitor did not stop in time, aborting");
            abort.abort();
        }
    }
}

async fn run_loop(monitor: Arc<HealthMonitor>, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(monitor.config.check_interval.max(1));
    loop {
        if *shutdown.borrow() {
            break;
        }
        let components = monitor.check_components().await;
        if monitor.config.self_healing_enabled
            && components.iter().any(|c| c.status.needs_repair())
        {
            monitor.repair_system().await;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("health monitor task exiting");
}

fn build_clients(
    creds: &Credentials,
    config: &ClientsConfig,
    policy: &HttpPolicy,
) -> ServiceClients {
    ServiceClients {
        claude: Slot::build(ClaudeClient::new(
            creds.anthropic_api_key.as_deref(),
            config,
            policy,
        )),
        perplexity: Slot::build(PerplexityClient::new(
            creds.perplexity_api_key.as_deref(),
            config,
            policy,
        )),
        mcp: Slot::build(McpGateway::new(
            gateway_url(creds, config),
            creds.composio_api_key.as_deref(),
            policy,
        )),
    }
}

fn gateway_url<'a>(creds: &'a Credentials, config: &'a ClientsConfig) -> Option<&'a str> {
    creds
        .mcp_gateway_url
        .as_deref()
        .or(config.mcp_gateway_url.as_deref())
}

/// Status of a service slot, probing the client when asked to.
async fn probe<T, F, Fut>(
    slot: &Slot<T>,
    enabled: bool,
    ping: F,
) -> (ComponentStatus, Option<String>)
where
    F: FnOnce(Arc<T>) -> Fut,
    Fut: Future<Output = CallResult<()>>,
{
    let Some(client) = &slot.client else {
        return (slot.status, slot.message.clone());
    };
    if !enabled {
        return (ComponentStatus::Operational, None);
    }
    match ping(Arc::clone(client)).await {
        Ok(()) => (ComponentStatus::Operational, None),
        Err(e) => (ComponentStatus::Degraded, Some(e.to_string())),
    }
}

fn check_graph(conn: &Mutex<Connection>) -> (ComponentStatus, Option<String>) {
    let conn = match conn.lock() {
        Ok(conn) => conn,
        Err(e) => return (ComponentStatus::Error, Some(format!("db lock poisoned: {e}"))),
    };
    match db::check_graph_health(&conn) {
        Ok(health) if health.integrity_ok => (ComponentStatus::Operational, None),
        Ok(health) => (ComponentStatus::Error, Some(health.integrity_details)),
        Err(e) => (ComponentStatus::Error, Some(format!("{e:#}"))),
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
