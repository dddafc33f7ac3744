//! Perplexity chat-completions client (OpenAI-compatible wire format).

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{expect_json, validate_url, CallError, CallResult, Completion, HttpPolicy};
use crate::config::ClientsConfig;

const DEFAULT_SYSTEM_PROMPT: &str = "Be precise and concise.";

pub struct PerplexityClient {
    http: Client,
    policy: HttpPolicy,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl PerplexityClient {
    pub fn new(
        api_key: Option<&str>,
        settings: &ClientsConfig,
        policy: &HttpPolicy,
    ) -> CallResult<Self> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CallError::MissingCredential("PERPLEXITY_API_KEY".into()))?;
        validate_url(&settings.perplexity_base_url)?;

        Ok(Self {
            http: policy.build_client()?,
            policy: policy.clone(),
            base_url: settings.perplexity_base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: settings.perplexity_model.clone(),
        })
    }

    /// Ask a research question; returns the first choice. `system` replaces
    /// the default system prompt.
    pub async fn ask(&self, query: &str, system: Option<&str>) -> CallResult<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.unwrap_or(DEFAULT_SYSTEM_PROMPT),
                },
                ChatMessage {
                    role: "user",
                    content: query,
                },
            ],
        };

        let response = self
            .policy
            .send(|| {
                self.http
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&request)
            })
            .await?;
        let body: ChatResponse = expect_json(response).await?;

        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CallError::Decode("response had no choices".into()))?;
        let (input_tokens, output_tokens) = body
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(Completion {
            text,
            model: body.model.unwrap_or_else(|| self.model.clone()),
            input_tokens,
            output_tokens,
        })
    }

    /// Reachability probe: any HTTP answer below 500 counts as reachable.
    pub async fn ping(&self) -> CallResult<()> {
        let response = self
            .policy
            .send(|| self.http.get(&self.base_url).bearer_auth(&self.api_key))
            .await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(CallError::Status {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_reported() {
        let err = PerplexityClient::new(None, &ClientsConfig::default(), &HttpPolicy::default())
            .err()
            .unwrap();
        assert!(matches!(err, CallError::MissingCredential(ref k) if k == "PERPLEXITY_API_KEY"));
    }

    #[test]
    fn response_decodes_first_choice() {
        let body: ChatResponse = serde_json::from_str(
            r#"{"model":"sonar","choices":[{"message":{"role":"assistant","content":"42"}}],
                "usage":{"prompt_tokens":3,"completion_tokens":1}}"#,
        )
        .unwrap();
        assert_eq!(body.choices[0].message.content, "42");
        assert_eq!(body.usage.unwrap().completion_tokens, 1);
    }
}
