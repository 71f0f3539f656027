use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};
use tracing::debug;

use super::parse::extract_json_object;
use super::{CapabilityOracle, OracleError};
use crate::models::Role;

const MAX_ERROR_BODY_CHARS: usize = 400;

/// Connection settings for an OpenAI-compatible chat-completions service.
/// Setting `api_version` switches to Azure deployment URLs and the
/// `api-key` header.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletionsConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub api_version: Option<String>,
    pub temperature: f32,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ChatCompletionsOracle {
    client: reqwest::Client,
    config: ChatCompletionsConfig,
}

impl ChatCompletionsOracle {
    pub fn new(config: ChatCompletionsConfig) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .default_headers(default_headers(&config)?)
            .build()
            .map_err(|error| OracleError::Transport(error.to_string()))?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn completions_url(&self) -> String {
        let endpoint = self.config.endpoint.trim_end_matches('/');
        match &self.config.api_version {
            Some(version) => format!(
                "{endpoint}/openai/deployments/{}/chat/completions?api-version={version}",
                self.config.model
            ),
            None => format!("{endpoint}/chat/completions"),
        }
    }

    fn request_body(&self, instructions: &str, input: &Value) -> Value {
        json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": instructions},
                {"role": "user", "content": input.to_string()},
            ],
        })
    }
}

fn default_headers(config: &ChatCompletionsConfig) -> Result<HeaderMap, OracleError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Some(key) = config.api_key.as_deref().filter(|key| !key.is_empty()) {
        let (name, value) = if config.api_version.is_some() {
            (HeaderName::from_static("api-key"), key.to_string())
        } else {
            (AUTHORIZATION, format!("Bearer {key}"))
        };
        let mut value = HeaderValue::from_str(&value)
            .map_err(|_| OracleError::Transport("api key is not a valid header value".into()))?;
        value.set_sensitive(true);
        headers.insert(name, value);
    }
    Ok(headers)
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body.to_string();
    }
    let prefix = body.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();
    format!("{prefix}...")
}

#[async_trait]
impl CapabilityOracle for ChatCompletionsOracle {
    async fn invoke(
        &self,
        role: Role,
        instructions: &str,
        input: &Value,
    ) -> Result<Value, OracleError> {
        debug!(%role, model = %self.config.model, "calling chat completions");
        let response = self
            .client
            .post(self.completions_url())
            .json(&self.request_body(instructions, input))
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    OracleError::Timeout(self.config.request_timeout.as_millis())
                } else {
                    OracleError::Transport(error.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| OracleError::MalformedOutput(error.to_string()))?;
        let content = payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or(OracleError::EmptyResponse)?;

        extract_json_object(content)
    }
}
