//! OpenAI-compatible `/chat/completions` adapter (llama.cpp, vLLM, OpenAI).

use std::time::Duration;

use async_trait::async_trait;
use orchestration::{ProviderClient, ProviderError};
use serde_json::Value;

use super::{classify_transport, http_client, malformed, status_error};
use crate::error::WorkerError;

pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    name: String,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_tokens: Option<u32>,
}

impl OpenAiCompatibleClient {
    pub fn new(
        name: &str,
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        max_tokens: Option<u32>,
    ) -> Result<Self, WorkerError> {
        Ok(Self {
            client: http_client(name)?,
            name: name.to_string(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
            max_tokens,
        })
    }
}

/// `choices[0].message.content`, rejecting empty strings.
fn completion_text(body: &Value) -> Option<String> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl ProviderClient for OpenAiCompatibleClient {
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, ProviderError> {
        let mut request_body = serde_json::json!({
            "model": self.model,
            "temperature": 0.0,
            "messages": [{
                "role": "user",
                "content": prompt
            }]
        });
        if let Some(max_tokens) = self.max_tokens {
            request_body["max_tokens"] = max_tokens.into();
        }

        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&request_body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| classify_transport(&e))?;
        if !response.status().is_success() {
            let err = status_error(response).await;
            tracing::debug!(provider = %self.name, error = %err, "completion request rejected");
            return Err(err);
        }

        let body: Value = response.json().await.map_err(|e| classify_transport(&e))?;
        completion_text(&body).ok_or_else(|| malformed("missing choices[0].message.content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_server::serve_once;
    use orchestration::{AttemptOutcome, TransientKind};

    #[tokio::test]
    async fn returns_first_choice_content() {
        let (base, request) = serve_once(
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":" PASS "}}]}"#,
        )
        .await;
        let client =
            OpenAiCompatibleClient::new("local", &base, "tiny", Some("sk-test".into()), Some(256))
                .unwrap();

        let text = client.generate("hello", Duration::from_secs(5)).await.unwrap();
        assert_eq!(text, "PASS");

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /chat/completions"));
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer sk-test"));
        assert!(raw.contains(r#""max_tokens":256"#));
    }

    #[tokio::test]
    async fn rate_limit_is_transient() {
        let (base, _) = serve_once(429, r#"{"error":"slow down"}"#).await;
        let client = OpenAiCompatibleClient::new("local", &base, "tiny", None, None).unwrap();
        let err = client.generate("hi", Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.outcome(), AttemptOutcome::RateLimited);
    }

    #[tokio::test]
    async fn unauthorized_is_permanent() {
        let (base, _) = serve_once(401, r#"{"error":"bad key"}"#).await;
        let client = OpenAiCompatibleClient::new("local", &base, "tiny", None, None).unwrap();
        let err = client.generate("hi", Duration::from_secs(5)).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.outcome(), AttemptOutcome::AuthFailure);
    }

    #[tokio::test]
    async fn empty_completion_is_transient_server_error() {
        let (base, _) = serve_once(200, r#"{"choices":[]}"#).await;
        let client = OpenAiCompatibleClient::new("local", &base, "tiny", None, None).unwrap();
        let err = client.generate("hi", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Transient {
                kind: TransientKind::Server,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn connection_refused_is_transient_network() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client =
            OpenAiCompatibleClient::new("local", &format!("http://127.0.0.1:{port}"), "tiny", None, None)
                .unwrap();
        let err = client.generate("hi", Duration::from_secs(5)).await.unwrap_err();
        assert!(err.is_transient());
    }
}
