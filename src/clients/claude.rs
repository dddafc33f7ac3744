//! Anthropic Messages API client.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{expect_json, validate_url, CallError, CallResult, Completion, HttpPolicy};
use crate::config::ClientsConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct ClaudeClient {
    http: Client,
    policy: HttpPolicy,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl ClaudeClient {
    /// Build a client. Fails with `MissingCredential` when no key is given.
    pub fn new(
        api_key: Option<&str>,
        settings: &ClientsConfig,
        policy: &HttpPolicy,
    ) -> CallResult<Self> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CallError::MissingCredential("ANTHROPIC_API_KEY".into()))?;
        validate_url(&settings.claude_base_url)?;

        Ok(Self {
            http: policy.build_client()?,
            policy: policy.clone(),
            base_url: settings.claude_base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: settings.claude_model.clone(),
        })
    }

    /// Send a single-turn prompt and return the concatenated text blocks.
    pub async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
        max_tokens: u32,
    ) -> CallResult<Completion> {
        let url = format!("{}/v1/messages", self.base_url);
        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        info!(model = %self.model, prompt_len = prompt.len(), "sending Claude request");

        let response = self
            .policy
            .send(|| {
                self.http
                    .post(&url)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&request)
            })
            .await?;
        let body: MessagesResponse = expect_json(response).await?;

        let text = body
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        let usage = body.usage.unwrap_or(Usage {
            input_tokens: 0,
            output_tokens: 0,
        });

        Ok(Completion {
            text,
            model: body.model.unwrap_or_else(|| self.model.clone()),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        })
    }

    /// Authenticated liveness probe against the models listing.
    pub async fn ping(&self) -> CallResult<()> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .policy
            .send(|| {
                self.http
                    .get(&url)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
            })
            .await?;
        let _: serde_json::Value = expect_json(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_reported() {
        let err = ClaudeClient::new(None, &ClientsConfig::default(), &HttpPolicy::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), "missing_credential");

        let err = ClaudeClient::new(Some(""), &ClientsConfig::default(), &HttpPolicy::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), "missing_credential");
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        let settings = ClientsConfig {
            claude_base_url: "not-a-url".into(),
            ..Default::default()
        };
        let err = ClaudeClient::new(Some("sk-test"), &settings, &HttpPolicy::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), "invalid_config");
    }

    #[test]
    fn request_serializes_without_empty_system() {
        let request = MessagesRequest {
            model: "m",
            max_tokens: 16,
            system: None,
            messages: vec![Message {
                role: "user",
                content: "hi",
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][0]["content"], "hi");
    }
}
