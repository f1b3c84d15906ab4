//! Priority router with per-provider retries and failover.
//!
//! ```text
//! generate(prompt)
//!   for provider in priority order
//!     ├─ circuit open        → skip, note "circuit open"
//!     ├─ attempt 1..=K+1     → transient error: back off (2s, 4s, 8s…) and retry
//!     │                      → permanent error: stop, move on (health untouched)
//!     ├─ success             → record_success, return immediately
//!     └─ retries exhausted   → record_failure, move on
//!   all skipped/exhausted    → AllProvidersExhausted { per-provider reasons }
//! ```
//!
//! The router never retries above this loop: an aggregate failure is terminal
//! for the request.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{OrchestrationConfig, RetryPolicy};
use crate::error::{OrchestrationError, ProviderError, ProviderFailure};
use crate::health::HealthTracker;
use crate::provider::RoutedProvider;
use crate::types::{AttemptOutcome, CapabilityTag, Generation, RoutingAttempt};

/// Per-call routing options.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Bound on each individual attempt.
    pub timeout: Duration,
    /// Try providers with this capability first (stable within each group).
    pub prefer: Option<CapabilityTag>,
    /// Checked before every provider and attempt, raced against in-flight calls.
    pub cancel: Option<CancellationToken>,
}

impl GenerateOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            prefer: None,
            cancel: None,
        }
    }

    pub fn prefer(mut self, capability: CapabilityTag) -> Self {
        self.prefer = Some(capability);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self::new(Duration::from_secs(45))
    }
}

enum AttemptError {
    Cancelled,
    Failed(ProviderError),
}

/// Routes prompts across an ordered provider list.
pub struct Router {
    providers: Vec<RoutedProvider>,
    health: Arc<HealthTracker>,
    retry: RetryPolicy,
    default_timeout: Duration,
}

impl Router {
    /// Providers are sorted by `spec.priority`; ties keep insertion order.
    pub fn new(
        mut providers: Vec<RoutedProvider>,
        health: Arc<HealthTracker>,
        retry: RetryPolicy,
    ) -> Self {
        providers.sort_by_key(|p| p.spec.priority);
        Self {
            providers,
            health,
            retry,
            default_timeout: GenerateOptions::default().timeout,
        }
    }

    pub fn from_config(
        providers: Vec<RoutedProvider>,
        health: Arc<HealthTracker>,
        config: &OrchestrationConfig,
    ) -> Self {
        let mut router = Self::new(providers, health, config.retry);
        router.default_timeout = config.request_timeout();
        router
    }

    /// Options carrying the configured per-attempt timeout.
    pub fn options(&self) -> GenerateOptions {
        GenerateOptions::new(self.default_timeout)
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn providers(&self) -> &[RoutedProvider] {
        &self.providers
    }

    /// Order in which providers would be tried for `prefer`.
    pub fn ordering(&self, prefer: Option<CapabilityTag>) -> Vec<&RoutedProvider> {
        let mut ordered: Vec<&RoutedProvider> = self.providers.iter().collect();
        if let Some(tag) = prefer {
            ordered.sort_by_key(|p| p.spec.capability != tag);
        }
        ordered
    }

    /// Route `prompt` to the first provider that answers.
    pub async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, OrchestrationError> {
        let mut failures = Vec::new();
        let mut attempts = Vec::new();

        for provider in self.ordering(options.prefer) {
            if options.is_cancelled() {
                return Err(OrchestrationError::Cancelled(
                    "cancelled before provider call".to_string(),
                ));
            }

            let name = provider.name();
            if !self.health.is_available(name) {
                debug!(provider = name, "circuit open, skipping provider");
                failures.push(ProviderFailure {
                    provider: name.to_string(),
                    reason: "skipped: circuit open".to_string(),
                });
                continue;
            }

            match self.try_provider(provider, prompt, options, &mut attempts).await {
                Ok(text) => {
                    self.health.record_success(name);
                    info!(provider = name, attempts = attempts.len(), "generation succeeded");
                    return Ok(Generation {
                        text,
                        provider: name.to_string(),
                        attempts,
                    });
                }
                Err(AttemptError::Cancelled) => {
                    return Err(OrchestrationError::Cancelled(format!(
                        "cancelled during call to {name}"
                    )));
                }
                Err(AttemptError::Failed(err)) => {
                    if err.is_transient() {
                        self.health.record_failure(name);
                        warn!(provider = name, error = %err, "provider exhausted retries");
                        failures.push(ProviderFailure {
                            provider: name.to_string(),
                            reason: format!(
                                "{} after {} attempt(s): {err}",
                                err.outcome(),
                                self.retry.max_attempts()
                            ),
                        });
                    } else {
                        warn!(provider = name, error = %err, "permanent provider error, failing over");
                        failures.push(ProviderFailure {
                            provider: name.to_string(),
                            reason: format!("{}: {err}", err.outcome()),
                        });
                    }
                }
            }
        }

        warn!(providers = failures.len(), "all providers exhausted");
        Err(OrchestrationError::AllProvidersExhausted { failures })
    }

    async fn try_provider(
        &self,
        provider: &RoutedProvider,
        prompt: &str,
        options: &GenerateOptions,
        attempts: &mut Vec<RoutingAttempt>,
    ) -> Result<String, AttemptError> {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 1;
        loop {
            if options.is_cancelled() {
                return Err(AttemptError::Cancelled);
            }

            let started = Instant::now();
            let result = call_once(provider, prompt, options).await;
            let latency = started.elapsed();

            let outcome = match &result {
                Ok(_) => AttemptOutcome::Success,
                Err(AttemptError::Cancelled) => AttemptOutcome::Cancelled,
                Err(AttemptError::Failed(err)) => err.outcome(),
            };
            debug!(
                provider = provider.name(),
                attempt,
                %outcome,
                latency_ms = latency.as_millis() as u64,
                "provider attempt"
            );
            attempts.push(RoutingAttempt {
                provider: provider.name().to_string(),
                attempt,
                outcome,
                latency,
            });

            let err = match result {
                Ok(text) => return Ok(text),
                Err(AttemptError::Failed(err)) if err.is_transient() && attempt < max_attempts => {
                    err
                }
                Err(other) => return Err(other),
            };

            let backoff = self.retry.backoff(attempt);
            warn!(
                provider = provider.name(),
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "transient error, retrying"
            );
            match &options.cancel {
                Some(cancel) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                None => tokio::time::sleep(backoff).await,
            }
            attempt += 1;
        }
    }
}

async fn call_once(
    provider: &RoutedProvider,
    prompt: &str,
    options: &GenerateOptions,
) -> Result<String, AttemptError> {
    let call = tokio::time::timeout(options.timeout, provider.client.generate(prompt, options.timeout));
    let timed = match &options.cancel {
        Some(cancel) => {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
                r = call => r,
            }
        }
        None => call.await,
    };
    match timed {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(err)) => Err(AttemptError::Failed(err)),
        Err(_) => Err(AttemptError::Failed(ProviderError::timeout(format!(
            "no response within {}s",
            options.timeout.as_secs_f64()
        )))),
    }
}
