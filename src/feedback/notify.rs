use reqwest::Client;
use serde_json::{json, Value};

use super::config::{ChannelKind, NotificationChannel};
use super::cycle::CycleResult;
use crate::clients::{validate_url, CallError, CallResult, HttpPolicy};

/// One-line summary of a cycle, e.g.
/// `Feedback cycle 2025-01-01T00:00:00Z: 2/3 endpoints succeeded, 1 alert(s)`.
pub fn summarize(cycle: &CycleResult) -> String {
    let failed: Vec<&str> = cycle
        .endpoints
        .iter()
        .filter(|e| !e.success)
        .map(|e| e.name.as_str())
        .collect();
    let mut summary = format!(
        "Feedback cycle {}: {}/{} endpoints succeeded, {} alert(s)",
        cycle.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        cycle.succeeded(),
        cycle.endpoints.len(),
        cycle.alerts().count()
    );
    if !failed.is_empty() {
        summary.push_str(&format!("; failed: {}", failed.join(", ")));
    }
    summary
}

/// Body posted to a channel.
pub fn payload(kind: ChannelKind, cycle: &CycleResult) -> Value {
    let summary = summarize(cycle);
    match kind {
        ChannelKind::Dashboard => json!({
            "type": "feedback_cycle",
            "timestamp": cycle.timestamp,
            "summary": summary,
            "alerts": cycle.alerts().collect::<Vec<_>>(),
        }),
        ChannelKind::Memory => json!({
            "type": "feedback_cycle",
            "timestamp": cycle.timestamp,
            "summary": summary,
            "notes": cycle.memory_notes().collect::<Vec<_>>(),
        }),
    }
}

/// Post the cycle summary to every channel. Failures are logged only.
pub async fn send_notifications(
    http: &Client,
    policy: &HttpPolicy,
    channels: &[NotificationChannel],
    cycle: &CycleResult,
) {
    for channel in channels {
        if let Err(e) = post(http, policy, channel, cycle).await {
            tracing::warn!(
                channel = ?channel.kind,
                url = %channel.url,
                kind = e.kind(),
                error = %e,
                "notification failed"
            );
        }
    }
}

async fn post(
    http: &Client,
    policy: &HttpPolicy,
    channel: &NotificationChannel,
    cycle: &CycleResult,
) -> CallResult<()> {
    let url = validate_url(&channel.url)?;
    let body = payload(channel.kind, cycle);
    let response = policy
        .send(|| http.post(url.clone()).json(&body))
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CallError::Status {
            status: status.as_u16(),
            body: String::new(),
        });
    }
    tracing::debug!(channel = ?channel.kind, "notification sent");
    Ok(())
}
