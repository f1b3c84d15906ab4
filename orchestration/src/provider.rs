//! Capability-uniform seam over one model backend.
//!
//! Concrete adapters (HTTP clients) live outside this crate; the router only
//! needs text in, text or a classified [`ProviderError`] out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::ProviderSpec;

/// One model backend.
///
/// Implementations must classify failures: timeouts, rate limits and 5xx
/// responses are [`ProviderError::Transient`]; auth and malformed requests are
/// [`ProviderError::Permanent`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Generate a completion for `prompt`, giving up after `timeout`.
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, ProviderError>;
}

/// A provider's static identity paired with its client.
#[derive(Clone)]
pub struct RoutedProvider {
    pub spec: ProviderSpec,
    pub client: Arc<dyn ProviderClient>,
}

impl RoutedProvider {
    pub fn new(spec: ProviderSpec, client: Arc<dyn ProviderClient>) -> Self {
        Self { spec, client }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

impl std::fmt::Debug for RoutedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedProvider")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}
