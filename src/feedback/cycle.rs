//! One feedback cycle: call each endpoint, then post-process its result.

use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;

use super::config::{AlertCondition, EndpointConfig, Operator, Processor};
use crate::clients::{read_body, validate_url, CallError, CallResult, HttpPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleResult {
    pub timestamp: DateTime<Utc>,
    pub endpoints: Vec<EndpointResult>,
}

impl CycleResult {
    pub fn succeeded(&self) -> usize {
        self.endpoints.iter().filter(|e| e.success).count()
    }

    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.endpoints.iter().filter_map(|e| match &e.processed {
            Some(Processed::Alert(alert)) => Some(alert),
            _ => None,
        })
    }

    pub fn memory_notes(&self) -> impl Iterator<Item = &MemoryNote> {
        self.endpoints.iter().filter_map(|e| match &e.processed {
            Some(Processed::Memory(note)) => Some(note),
            _ => None,
        })
    }
}

/// Outcome of one endpoint call. `duration` is in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointResult {
    pub name: String,
    pub url: String,
    pub status_code: Option<u16>,
    pub duration: f64,
    pub success: bool,
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<Processed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Processed {
    Alert(Alert),
    Memory(MemoryNote),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub endpoint: String,
    pub severity: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryNote {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub metadata: Value,
}

/// Call one endpoint. Never fails: errors land in `EndpointResult::error`.
pub async fn execute_endpoint(
    http: &Client,
    policy: &HttpPolicy,
    endpoint: &EndpointConfig,
) -> EndpointResult {
    let started = Instant::now();
    let outcome = send(http, policy, endpoint).await;
    let duration = started.elapsed().as_secs_f64();

    let mut result = EndpointResult {
        name: endpoint.name.clone(),
        url: endpoint.url.clone(),
        status_code: None,
        duration,
        success: false,
        response: None,
        error: None,
        processed: None,
    };

    match outcome {
        Ok((status, body)) => {
            result.status_code = Some(status);
            result.success = (200..300).contains(&status);
            result.response = Some(body);
            if !result.success {
                result.error = Some(format!("HTTP {status}"));
            }
        }
        Err(e) => {
            tracing::warn!(endpoint = %endpoint.name, kind = e.kind(), error = %e, "endpoint call failed");
            result.error = Some(e.to_string());
        }
    }

    tracing::debug!(
        endpoint = %endpoint.name,
        status = ?result.status_code,
        duration_ms = (duration * 1000.0) as u64,
        success = result.success,
        "endpoint executed"
    );
    result
}

async fn send(
    http: &Client,
    policy: &HttpPolicy,
    endpoint: &EndpointConfig,
) -> CallResult<(u16, Value)> {
    let method = Method::from_bytes(endpoint.method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| CallError::InvalidConfig(format!("invalid method {:?}", endpoint.method)))?;
    let mut url = validate_url(&endpoint.url)?;

    let body_method = matches!(method, Method::POST | Method::PUT | Method::PATCH);
    if !body_method {
        append_query(&mut url, endpoint.params.as_ref());
    }

    let response = policy
        .send_keep_status(|| {
            let builder = http.request(method.clone(), url.clone());
            match (&endpoint.params, body_method) {
                (Some(params), true) => builder.json(params),
                _ => builder,
            }
        })
        .await?;

    let status = response.status().as_u16();
    Ok((status, read_body(response).await?))
}

/// Add an object's entries as query parameters; strings go in unquoted.
fn append_query(url: &mut Url, params: Option<&Value>) {
    let Some(Value::Object(map)) = params else {
        return;
    };
    if map.is_empty() {
        return;
    }
    let mut pairs = url.query_pairs_mut();
    for (key, value) in map {
        match value {
            Value::String(s) => pairs.append_pair(key, s),
            Value::Null => pairs.append_pair(key, ""),
            other => pairs.append_pair(key, &other.to_string()),
        };
    }
}

/// Apply the endpoint's processor to its result.
pub fn process_result(
    endpoint: &EndpointConfig,
    result: &EndpointResult,
    now: DateTime<Utc>,
) -> Option<Processed> {
    match endpoint.processor? {
        Processor::Alert => {
            let triggered = match &endpoint.alert_condition {
                Some(condition) => evaluate(condition, result),
                None => !result.success,
            };
            triggered.then(|| Processed::Alert(build_alert(endpoint, result)))
        }
        Processor::Memory => Some(Processed::Memory(build_note(endpoint, result, now))),
        Processor::Unknown => None,
    }
}

fn build_alert(endpoint: &EndpointConfig, result: &EndpointResult) -> Alert {
    let config = endpoint.alert_config.clone().unwrap_or_default();
    let message = config.message.unwrap_or_else(|| match &result.error {
        Some(err) => format!("{} failed: {err}", endpoint.name),
        None => format!("{} matched its alert condition", endpoint.name),
    });
    tracing::warn!(endpoint = %endpoint.name, severity = %config.severity, %message, "feedback alert");
    Alert {
        endpoint: endpoint.name.clone(),
        severity: config.severity,
        message,
    }
}

fn build_note(endpoint: &EndpointConfig, result: &EndpointResult, now: DateTime<Utc>) -> MemoryNote {
    let status = result
        .status_code
        .map(|s| s.to_string())
        .unwrap_or_else(|| "no response".into());
    MemoryNote {
        title: format!("Feedback: {}", endpoint.name),
        content: format!(
            "{} {} -> {} in {:.3}s",
            endpoint.method.to_ascii_uppercase(),
            endpoint.url,
            status,
            result.duration
        ),
        tags: vec!["feedback".into(), endpoint.name.clone()],
        metadata: json!({
            "endpoint": endpoint.name,
            "url": endpoint.url,
            "status_code": result.status_code,
            "success": result.success,
            "duration": result.duration,
            "timestamp": now,
        }),
    }
}

/// Evaluate an alert condition; a missing field never triggers.
pub fn evaluate(condition: &AlertCondition, result: &EndpointResult) -> bool {
    let Some(actual) = lookup(&condition.field, result) else {
        return false;
    };
    let expected = &condition.value;

    match condition.operator {
        Operator::Eq => loosely_equal(&actual, expected),
        Operator::Ne => !loosely_equal(&actual, expected),
        Operator::Gt => compare(&actual, expected).is_some_and(|o| o.is_gt()),
        Operator::Gte => compare(&actual, expected).is_some_and(|o| o.is_ge()),
        Operator::Lt => compare(&actual, expected).is_some_and(|o| o.is_lt()),
        Operator::Lte => compare(&actual, expected).is_some_and(|o| o.is_le()),
        Operator::Contains => match (&actual, expected) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|i| loosely_equal(i, needle)),
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            _ => false,
        },
    }
}

fn lookup(field: &str, result: &EndpointResult) -> Option<Value> {
    match field {
        "success" => Some(Value::Bool(result.success)),
        "status_code" => result.status_code.map(Value::from),
        "duration" => Some(Value::from(result.duration)),
        pointer if pointer.starts_with('/') => {
            result.response.as_ref()?.pointer(pointer).cloned()
        }
        key => result.response.as_ref()?.get(key).cloned(),
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}
