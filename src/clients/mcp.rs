//! MCP gateway client: a single HTTP proxy in front of third-party tools
//! (GitHub, Perplexity, Firecrawl, ...).

use reqwest::{Client, Url};
use serde::Serialize;

use super::{expect_json, validate_url, CallError, CallResult, HttpPolicy};

pub struct McpGateway {
    http: Client,
    policy: HttpPolicy,
    base_url: Url,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConnectRequest<'a> {
    tool: &'a str,
}

impl McpGateway {
    /// Build a gateway client. The URL is mandatory and must be http(s).
    pub fn new(url: Option<&str>, api_key: Option<&str>, policy: &HttpPolicy) -> CallResult<Self> {
        let url = url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| CallError::MissingCredential("MCP_GATEWAY_URL".into()))?;
        let base_url = validate_url(url)?;

        Ok(Self {
            http: policy.build_client()?,
            policy: policy.clone(),
            base_url,
            api_key: api_key.map(str::to_string),
        })
    }

    fn endpoint(&self, path: &str) -> CallResult<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path)
            .map_err(|e| CallError::InvalidConfig(format!("bad gateway path {path:?}: {e}")))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    /// Reachability probe: any HTTP answer below 500 counts as reachable.
    pub async fn ping(&self) -> CallResult<()> {
        let response = self
            .policy
            .send(|| self.authorize(self.http.get(self.base_url.clone())))
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

    /// Ask the gateway to open a connection to `tool`; returns its JSON answer.
    pub async fn connect_tool(&self, tool: &str) -> CallResult<serde_json::Value> {
        let url = self.endpoint("connect")?;
        let request = ConnectRequest { tool };
        let response = self
            .policy
            .send(|| self.authorize(self.http.post(url.clone()).json(&request)))
            .await?;
        expect_json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_url_is_missing_credential() {
        let err = McpGateway::new(None, None, &HttpPolicy::default()).err().unwrap();
        assert_eq!(err.kind(), "missing_credential");
        let err = McpGateway::new(Some("  "), None, &HttpPolicy::default()).err().unwrap();
        assert_eq!(err.kind(), "missing_credential");
    }

    #[test]
    fn malformed_url_is_config_error() {
        let err = McpGateway::new(Some("localhost:3000"), None, &HttpPolicy::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), "invalid_config");
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let gateway =
            McpGateway::new(Some("http://localhost:3000/mcp"), None, &HttpPolicy::default())
                .unwrap();
        assert_eq!(
            gateway.endpoint("connect").unwrap().as_str(),
            "http://localhost:3000/mcp/connect"
        );
    }
}
