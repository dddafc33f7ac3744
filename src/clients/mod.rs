//! Outbound HTTP plumbing shared by every external-service client.
//!
//! All calls go through [`HttpPolicy`]: a request timeout on the client, a
//! bounded number of retries with exponential backoff for transport failures,
//! and waits for rate-limit windows (`Retry-After`, `X-RateLimit-Reset`).
//! Every wrapper returns [`CallResult`], a tagged `Result<T, CallError>`.

pub mod claude;
pub mod mcp;
pub mod perplexity;

use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config::HttpConfig;

/// Longest body excerpt carried inside a [`CallError::Status`].
const ERROR_BODY_LIMIT: usize = 512;

/// Failure of a call to an external service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    #[error("missing credential: {0}")]
    MissingCredential(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl CallError {
    /// Short machine-readable tag, used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential(_) => "missing_credential",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::RateLimited { .. } => "rate_limited",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}

pub type CallResult<T> = Result<T, CallError>;

/// Timeout + retry/backoff policy applied to every outbound request.
#[derive(Debug, Clone)]
pub struct HttpPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for HttpPolicy {
    fn default() -> Self {
        Self::from_config(&HttpConfig::default())
    }
}

impl HttpPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_secs(config.backoff_max_secs),
        }
    }

    /// Build a `reqwest::Client` carrying this policy's timeout.
    pub fn build_client(&self) -> CallResult<Client> {
        Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("trilogy-brain/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CallError::InvalidConfig(format!("failed to build HTTP client: {e}")))
    }

    /// Delay before retry number `attempt + 1`: `base * 2^attempt`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }

    /// Send a request, retrying transport failures and rate-limited responses.
    ///
    /// `make` is called once per attempt since a `RequestBuilder` is consumed
    /// by `send`. Non-2xx responses other than rate limits are returned as-is;
    /// callers decide what a status means. A rate limit that outlasts the
    /// retries is returned as [`CallError::RateLimited`].
    pub async fn send<F>(&self, make: F) -> CallResult<Response>
    where
        F: FnMut() -> RequestBuilder,
    {
        self.dispatch(make, false).await
    }

    /// Like [`send`](Self::send), but a rate-limited response that outlasts
    /// the retries is returned as-is so its status and body can be recorded.
    pub async fn send_keep_status<F>(&self, make: F) -> CallResult<Response>
    where
        F: FnMut() -> RequestBuilder,
    {
        self.dispatch(make, true).await
    }

    async fn dispatch<F>(&self, mut make: F, keep_final: bool) -> CallResult<Response>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = match make().send().await {
                Ok(response) => {
                    let now = chrono::Utc::now().timestamp();
                    match rate_limit_wait(response.status(), response.headers(), now) {
                        None => return Ok(response),
                        Some(_) if keep_final && attempt >= self.max_retries => {
                            tracing::debug!(
                                status = %response.status(),
                                "rate limit outlasted retries"
                            );
                            return Ok(response);
                        }
                        Some(wait) => CallError::RateLimited {
                            retry_after: Some(wait),
                        },
                    }
                }
                Err(e) => self.classify(e),
            };

            let retryable = outcome.is_retryable() || matches!(outcome, CallError::RateLimited { .. });
            if !retryable || attempt >= self.max_retries {
                return Err(outcome);
            }

            let delay = match &outcome {
                CallError::RateLimited {
                    retry_after: Some(wait),
                } => (*wait).max(self.backoff(attempt)).min(self.backoff_max),
                _ => self.backoff(attempt),
            };
            tracing::debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %outcome,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn classify(&self, e: reqwest::Error) -> CallError {
        if e.is_timeout() {
            CallError::Timeout(self.timeout)
        } else {
            CallError::Transport(e.to_string())
        }
    }
}

/// How long to wait when a response signals a rate limit, or `None` if it
/// does not.
///
/// A response is rate-limited when it is HTTP 429, or HTTP 403 with
/// `X-RateLimit-Remaining: 0`. The wait comes from `Retry-After` (seconds),
/// then `X-RateLimit-Reset` (epoch seconds), else zero.
pub fn rate_limit_wait(status: StatusCode, headers: &HeaderMap, now_epoch: i64) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };

    let exhausted = header("x-ratelimit-remaining") == Some("0");
    if status != StatusCode::TOO_MANY_REQUESTS && !(status == StatusCode::FORBIDDEN && exhausted) {
        return None;
    }

    if let Some(secs) = header("retry-after").and_then(|v| v.parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs));
    }
    if let Some(reset) = header("x-ratelimit-reset").and_then(|v| v.parse::<i64>().ok()) {
        return Some(Duration::from_secs((reset - now_epoch).max(0) as u64));
    }
    Some(Duration::ZERO)
}

/// Read a body as JSON, falling back to a JSON string holding the raw text.
pub async fn read_body(response: Response) -> CallResult<serde_json::Value> {
    let text = response
        .text()
        .await
        .map_err(|e| CallError::Transport(format!("error reading body: {e}")))?;
    Ok(parse_body(&text))
}

pub fn parse_body(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

/// Require a 2xx status and decode the body into `T`.
pub async fn expect_json<T: DeserializeOwned>(response: Response) -> CallResult<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| CallError::Transport(format!("error reading body: {e}")))?;

    if !status.is_success() {
        return Err(CallError::Status {
            status: status.as_u16(),
            body: truncate(&text, ERROR_BODY_LIMIT),
        });
    }

    serde_json::from_str(&text).map_err(|e| CallError::Decode(e.to_string()))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Validate that `url` is an absolute http(s) URL.
pub fn validate_url(url: &str) -> CallResult<reqwest::Url> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| CallError::InvalidConfig(format!("invalid URL {url:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(CallError::InvalidConfig(format!(
            "unsupported URL scheme {other:?} in {url:?}"
        ))),
    }
}

/// Text of a model completion, shared by the chat-style clients.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = HttpPolicy {
            timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(350));
        assert_eq!(policy.backoff(30), Duration::from_millis(350));
    }

    #[test]
    fn ok_response_is_not_rate_limited() {
        let headers = HeaderMap::new();
        assert_eq!(rate_limit_wait(StatusCode::OK, &headers, 0), None);
        assert_eq!(rate_limit_wait(StatusCode::FORBIDDEN, &headers, 0), None);
    }

    #[test]
    fn retry_after_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("7"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1000"));
        assert_eq!(
            rate_limit_wait(StatusCode::TOO_MANY_REQUESTS, &headers, 0),
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn exhausted_quota_waits_until_reset() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1060"));
        assert_eq!(
            rate_limit_wait(StatusCode::FORBIDDEN, &headers, 1000),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn plain_text_body_falls_back_to_string() {
        assert_eq!(parse_body("{\"ok\":true}")["ok"], true);
        assert_eq!(parse_body("pong"), serde_json::Value::String("pong".into()));
    }

    #[test]
    fn url_validation_rejects_other_schemes() {
        assert!(validate_url("https://gateway.example.com/mcp").is_ok());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("not a url").is_err());
    }

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(CallError::MissingCredential("x".into()).kind(), "missing_credential");
        assert_eq!(
            CallError::Status { status: 500, body: String::new() }.kind(),
            "status"
        );
    }
}
