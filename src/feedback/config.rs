//! `feedbackLoop` section of the MCP JSON config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::config::FeedbackSettings;

/// Post-processing applied to an endpoint's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Processor {
    Alert,
    Memory,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

/// `{field, operator, value}`. `field` is `success`, `status_code`,
/// `duration`, a JSON pointer (`/data/count`) or a top-level response key.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AlertCondition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AlertConfig {
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            severity: default_severity(),
            message: None,
        }
    }
}

fn default_severity() -> String {
    "warning".into()
}

/// One HTTP call made every cycle.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub processor: Option<Processor>,
    #[serde(default)]
    pub alert_condition: Option<AlertCondition>,
    #[serde(default)]
    pub alert_config: Option<AlertConfig>,
}

fn default_method() -> String {
    "GET".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Dashboard,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NotificationChannel {
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedbackLoopConfig {
    pub enabled: bool,
    /// Seconds between cycles.
    pub interval: u64,
    pub max_history: usize,
    pub endpoints: Vec<EndpointConfig>,
    pub notification_channels: Vec<NotificationChannel>,
}

impl Default for FeedbackLoopConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 300,
            max_history: 10,
            endpoints: Vec::new(),
            notification_channels: Vec::new(),
        }
    }
}

impl FeedbackLoopConfig {
    /// Read the `feedbackLoop` key of `path`; a missing file or key yields
    /// defaults. `settings` overrides `enabled`/`interval` afterwards.
    pub fn load(path: impl AsRef<Path>, settings: &FeedbackSettings) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_json_str(&raw)
                .with_context(|| format!("invalid feedback config in {}", path.display()))?
        } else {
            tracing::info!(path = %path.display(), "no feedback config, using defaults");
            Self::default()
        };

        if let Some(enabled) = settings.enabled {
            config.enabled = enabled;
        }
        if let Some(interval) = settings.interval_secs {
            config.interval = interval;
        }
        config.normalize();
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let mut doc: Value = serde_json::from_str(raw)?;
        match doc.get_mut("feedbackLoop") {
            Some(section) => Ok(serde_json::from_value(section.take())?),
            None => Ok(Self::default()),
        }
    }

    fn normalize(&mut self) {
        if self.interval == 0 {
            tracing::warn!("feedback interval of 0s raised to 1s");
            self.interval = 1;
        }
        if self.max_history == 0 {
            tracing::warn!("feedback maxHistory of 0 raised to 1");
            self.max_history = 1;
        }
        for endpoint in &self.endpoints {
            if endpoint.processor == Some(Processor::Unknown) {
                tracing::warn!(endpoint = %endpoint.name, "unknown processor, results will not be post-processed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "mcpServers": {},
        "feedbackLoop": {
            "enabled": true,
            "interval": 60,
            "endpoints": [
                {"name": "ping", "url": "http://x/status", "method": "GET"},
                {
                    "name": "errors",
                    "url": "http://x/errors",
                    "method": "post",
                    "params": {"window": "1h"},
                    "processor": "alert",
                    "alertCondition": {"field": "/count", "operator": "gt", "value": 5},
                    "alertConfig": {"severity": "critical", "message": "error spike"}
                },
                {"name": "odd", "url": "http://x/odd", "processor": "telepathy"}
            ],
            "notificationChannels": [
                {"type": "dashboard", "url": "http://localhost:5678/api/notifications"}
            ]
        }
    }"#;

    #[test]
    fn parses_camel_case_section() {
        let config = FeedbackLoopConfig::from_json_str(SAMPLE).unwrap();
        assert!(config.enabled);
        assert_eq!(config.interval, 60);
        assert_eq!(config.max_history, 10, "default applies");
        assert_eq!(config.endpoints.len(), 3);

        let errors = &config.endpoints[1];
        assert_eq!(errors.processor, Some(Processor::Alert));
        let cond = errors.alert_condition.as_ref().unwrap();
        assert_eq!(cond.operator, Operator::Gt);
        assert_eq!(cond.value, serde_json::json!(5));
        assert_eq!(errors.alert_config.as_ref().unwrap().severity, "critical");

        assert_eq!(config.endpoints[0].method, "GET");
        assert_eq!(config.endpoints[2].method, "GET");
        assert_eq!(config.endpoints[2].processor, Some(Processor::Unknown));
        assert_eq!(config.notification_channels[0].kind, ChannelKind::Dashboard);
    }

    #[test]
    fn missing_section_gives_defaults() {
        let config = FeedbackLoopConfig::from_json_str(r#"{"mcpServers": {}}"#).unwrap();
        assert_eq!(config, FeedbackLoopConfig::default());
    }

    #[test]
    fn settings_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let settings = FeedbackSettings {
            config_path: path.to_string_lossy().into_owned(),
            enabled: Some(false),
            interval_secs: Some(15),
        };
        let config = FeedbackLoopConfig::load(&path, &settings).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.interval, 15);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config =
            FeedbackLoopConfig::load("/nonexistent/mcp.json", &FeedbackSettings::default())
                .unwrap();
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn zero_interval_is_raised() {
        let mut config = FeedbackLoopConfig {
            interval: 0,
            max_history: 0,
            ..Default::default()
        };
        config.normalize();
        assert_eq!(config.interval, 1);
        assert_eq!(config.max_history, 1);
    }
}
