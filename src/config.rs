use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TrilogyConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub http: HttpConfig,
    pub clients: ClientsConfig,
    pub feedback: FeedbackSettings,
    pub health: HealthSettings,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding the memory graph.
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"local"` (ONNX, needs the `local-embeddings` feature) or `"none"`.
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
}

/// Knowledge retriever knobs. Also the payload of the dashboard settings API.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub use_embeddings: bool,
    pub minimum_similarity: f64,
    pub max_results: usize,
    pub rerank_enabled: bool,
    pub recency_weight: f64,
    pub connectivity_weight: f64,
    pub cache_size: usize,
    pub cache_expiry_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClientsConfig {
    pub claude_base_url: String,
    pub claude_model: String,
    pub perplexity_base_url: String,
    pub perplexity_model: String,
    pub mcp_gateway_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedbackSettings {
    /// JSON file with a `feedbackLoop` key.
    pub config_path: String,
    /// Overrides `feedbackLoop.enabled` when set.
    pub enabled: Option<bool>,
    /// Overrides `feedbackLoop.interval` when set.
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HealthSettings {
    pub config_path: String,
    /// Components probed with a live request during checks.
    pub probe_components: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub static_dir: String,
    /// How many received notifications the dashboard keeps.
    pub notification_history: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            host: "127.0.0.1".into(),
            port: 5678,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_trilogy_dir()
            .join("memory_graph.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_trilogy_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            use_embeddings: true,
            minimum_similarity: 0.6,
            max_results: 10,
            rerank_enabled: true,
            recency_weight: 0.2,
            connectivity_weight: 0.1,
            cache_size: 1000,
            cache_expiry_secs: 3600,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_max_secs: 30,
        }
    }
}

impl Default for ClientsConfig {
    fn default() -> Self {
        Self {
            claude_base_url: "https://api.anthropic.com".into(),
            claude_model: "claude-3-5-sonnet-latest".into(),
            perplexity_base_url: "https://api.perplexity.ai".into(),
            perplexity_model: "sonar".into(),
            mcp_gateway_url: None,
        }
    }
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            config_path: "config/mcp.json".into(),
            enabled: None,
            interval_secs: None,
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            config_path: "config/health_monitor.json".into(),
            probe_components: vec!["mcp".into()],
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            static_dir: "static".into(),
            notification_history: 50,
        }
    }
}

impl RetrievalConfig {
    /// Reject weight combinations the re-ranker cannot blend.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.recency_weight),
            "recency_weight must be in [0, 1], got {}",
            self.recency_weight
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.connectivity_weight),
            "connectivity_weight must be in [0, 1], got {}",
            self.connectivity_weight
        );
        anyhow::ensure!(
            self.recency_weight + self.connectivity_weight <= 1.0 + f64::EPSILON,
            "recency_weight + connectivity_weight must not exceed 1.0"
        );
        anyhow::ensure!(
            (-1.0..=1.0).contains(&self.minimum_similarity),
            "minimum_similarity must be in [-1, 1]"
        );
        anyhow::ensure!(self.cache_size > 0, "cache_size must be at least 1");
        anyhow::ensure!(self.max_results > 0, "max_results must be at least 1");
        Ok(())
    }
}

/// API keys and service URLs, read from the environment (after `.env`).
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub anthropic_api_key: Option<String>,
    pub perplexity_api_key: Option<String>,
    pub composio_api_key: Option<String>,
    pub mcp_gateway_url: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: non_empty_env("ANTHROPIC_API_KEY"),
            perplexity_api_key: non_empty_env("PERPLEXITY_API_KEY"),
            composio_api_key: non_empty_env("COMPOSIO_API_KEY"),
            mcp_gateway_url: non_empty_env("MCP_GATEWAY_URL"),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Returns `~/.trilogy/`
pub fn default_trilogy_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".trilogy")
}

/// Returns the default config file path: `~/.trilogy/config.toml`
pub fn default_config_path() -> PathBuf {
    default_trilogy_dir().join("config.toml")
}

impl TrilogyConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            TrilogyConfig::default()
        };

        config.apply_env_overrides();
        config
            .retrieval
            .validate()
            .context("invalid [retrieval] section")?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TRILOGY_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("TRILOGY_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("MCP_GATEWAY_URL") {
            if !val.trim().is_empty() {
                self.clients.mcp_gateway_url = Some(val);
            }
        }
        if let Ok(val) = std::env::var("FEEDBACK_LOOP_ENABLED") {
            self.feedback.enabled = parse_bool(&val);
        }
        if let Ok(val) = std::env::var("FEEDBACK_LOOP_INTERVAL") {
            match val.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.feedback.interval_secs = Some(secs),
                _ => tracing::warn!(value = %val, "ignoring invalid FEEDBACK_LOOP_INTERVAL"),
            }
        }
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
