//! HTTP adapters implementing [`ProviderClient`].
//!
//! Both adapters share the same failure classification:
//!
//! | Condition                         | Error                         |
//! |-----------------------------------|-------------------------------|
//! | 408, 429, 5xx                     | transient (timeout/rate/server) |
//! | 401, 403                          | permanent auth                |
//! | other 4xx                         | permanent invalid request     |
//! | request timeout                   | transient timeout             |
//! | connect / transport failure       | transient network             |
//! | 2xx with no usable completion     | transient server              |

pub mod anthropic;
pub mod openai;

use std::sync::Arc;

use orchestration::{ProviderClient, ProviderError, RoutedProvider, TransientKind};

use crate::config::{ProviderEntry, ProviderKind};
use crate::error::WorkerError;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiCompatibleClient;

/// Classify a transport-level reqwest failure.
pub(crate) fn classify_transport(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(err.to_string())
    } else if err.is_decode() {
        ProviderError::transient(TransientKind::Server, format!("undecodable body: {err}"))
    } else {
        ProviderError::transient(TransientKind::Network, err.to_string())
    }
}

/// Turn a non-success response into a classified error, keeping a body preview.
pub(crate) async fn status_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let preview: String = body.chars().take(300).collect();
    ProviderError::from_status(status, preview)
}

pub(crate) fn malformed(what: &str) -> ProviderError {
    ProviderError::transient(TransientKind::Server, format!("malformed completion: {what}"))
}

pub(crate) fn http_client(provider: &str) -> Result<reqwest::Client, WorkerError> {
    reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| WorkerError::Http {
            provider: provider.to_string(),
            message: e.to_string(),
        })
}

/// Build the adapter for one configured provider.
pub fn build_client(entry: &ProviderEntry) -> Result<Arc<dyn ProviderClient>, WorkerError> {
    let api_key = entry.resolve_api_key()?;
    Ok(match entry.kind {
        ProviderKind::Openai => Arc::new(OpenAiCompatibleClient::new(
            &entry.name,
            &entry.base_url,
            &entry.model,
            api_key,
            entry.max_tokens,
        )?) as Arc<dyn ProviderClient>,
        ProviderKind::Anthropic => {
            let api_key = api_key.ok_or_else(|| {
                WorkerError::Config(format!("provider '{}' needs an API key", entry.name))
            })?;
            Arc::new(AnthropicClient::new(
                &entry.name,
                &entry.base_url,
                &entry.model,
                api_key,
                entry.max_tokens,
            )?) as Arc<dyn ProviderClient>
        }
    })
}

/// Adapters for every configured provider, with their routing identity.
pub fn build_providers(entries: &[ProviderEntry]) -> Result<Vec<RoutedProvider>, WorkerError> {
    entries
        .iter()
        .map(|entry| Ok(RoutedProvider::new(entry.spec(), build_client(entry)?)))
        .collect()
}
