use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Contents of `config/health_monitor.json`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthMonitorConfig {
    /// Seconds between checks.
    pub check_interval: u64,
    pub self_healing_enabled: bool,
    /// Consecutive failed checks before a component is alerted on.
    pub alert_threshold: u32,
    /// Process names expected to be running.
    pub expected_agents: Vec<String>,
    /// Command line used to restart each agent.
    pub agent_commands: BTreeMap<String, String>,
    pub log_dir: String,
    pub alert_log_file: String,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: 60,
            self_healing_enabled: false,
            alert_threshold: 3,
            expected_agents: Vec::new(),
            agent_commands: BTreeMap::new(),
            log_dir: "logs".into(),
            alert_log_file: "health_alerts.log".into(),
        }
    }
}

impl HealthMonitorConfig {
    /// Parse `path`; a missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "no health monitor config, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("invalid health monitor config in {}", path.display()))?;
        if config.check_interval == 0 {
            config.check_interval = 1;
        }
        if config.alert_threshold == 0 {
            config.alert_threshold = 1;
        }
        Ok(config)
    }

    pub fn alert_log_path(&self) -> PathBuf {
        crate::config::expand_tilde(&self.log_dir).join(&self.alert_log_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health_monitor.json");
        std::fs::write(
            &path,
            r#"{"check_interval": 30, "expected_agents": ["memory-agent"],
                "agent_commands": {"memory-agent": "memory-agent --daemon"}}"#,
        )
        .unwrap();

        let config = HealthMonitorConfig::load(&path).unwrap();
        assert_eq!(config.check_interval, 30);
        assert_eq!(config.alert_threshold, 3);
        assert_eq!(config.expected_agents, vec!["memory-agent"]);
        assert_eq!(config.agent_commands["memory-agent"], "memory-agent --daemon");
        assert_eq!(
            config.alert_log_path(),
            PathBuf::from("logs").join("health_alerts.log")
        );
    }

    #[test]
    fn missing_file_is_default() {
        let config = HealthMonitorConfig::load("/nonexistent/health.json").unwrap();
        assert_eq!(config, HealthMonitorConfig::default());
    }
}
