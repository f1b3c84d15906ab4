//! Anthropic Messages API adapter.

use std::time::Duration;

use async_trait::async_trait;
use orchestration::{ProviderClient, ProviderError};
use serde_json::Value;

use super::{classify_transport, http_client, malformed, status_error};
use crate::error::WorkerError;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 2048;

pub struct AnthropicClient {
    client: reqwest::Client,
    name: String,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(
        name: &str,
        base_url: &str,
        model: &str,
        api_key: String,
        max_tokens: Option<u32>,
    ) -> Result<Self, WorkerError> {
        Ok(Self {
            client: http_client(name)?,
            name: name.to_string(),
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        })
    }
}

/// Concatenated `text` blocks of the response content.
fn completion_text(body: &Value) -> Option<String> {
    let text = body["content"]
        .as_array()?
        .iter()
        .filter(|block| block["type"].as_str().unwrap_or("text") == "text")
        .filter_map(|block| block["text"].as_str())
        .collect::<Vec<_>>()
        .join("");
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, ProviderError> {
        let request_body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{
                "role": "user",
                "content": prompt
            }]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        if !response.status().is_success() {
            let err = status_error(response).await;
            tracing::debug!(provider = %self.name, error = %err, "messages request rejected");
            return Err(err);
        }

        let body: Value = response.json().await.map_err(|e| classify_transport(&e))?;
        completion_text(&body).ok_or_else(|| malformed("no text content blocks"))
    }
}
