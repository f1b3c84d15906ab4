//! Runtime configuration for routing, validation and refinement.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (`INSIGHT_*`, see [`OrchestrationConfig::apply_env`])
//! 2. Values deserialised from a config file
//! 3. Built-in defaults

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OrchestrationError;
use crate::types::Strictness;

const ENV_FAILURE_THRESHOLD: &str = "INSIGHT_FAILURE_THRESHOLD";
const ENV_COOLDOWN_SECS: &str = "INSIGHT_COOLDOWN_SECS";
const ENV_MAX_RETRIES: &str = "INSIGHT_MAX_RETRIES";
const ENV_BACKOFF_BASE_MS: &str = "INSIGHT_BACKOFF_BASE_MS";
const ENV_REQUEST_TIMEOUT_SECS: &str = "INSIGHT_REQUEST_TIMEOUT_SECS";
const ENV_STRICTNESS: &str = "INSIGHT_STRICTNESS";
const ENV_MAX_ITERATIONS: &str = "INSIGHT_MAX_ITERATIONS";
const ENV_DEDUP_THRESHOLD: &str = "INSIGHT_DEDUP_THRESHOLD";
const ENV_BUDGET_POLICY: &str = "INSIGHT_BUDGET_POLICY";

/// What the reflexion loop does when it runs out of iterations while the
/// validator still asks for refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetExhaustedPolicy {
    /// Keep the last revision; it may still be usable.
    #[default]
    AcceptAsIs,
    /// Treat exhaustion like a FAIL.
    Reject,
}

/// Exponential backoff between retries of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt).
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each following retry.
    pub backoff_base_ms: u64,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-indexed): base, 2×base, 4×base…
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(retry - 1).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }

    /// Total attempts allowed per provider.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    /// 3 retries at 2s, 4s, 8s.
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 2_000,
        }
    }
}

/// Top-level configuration consumed by the core components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Consecutive transient exhaustions before a provider's circuit opens.
    pub failure_threshold: u32,
    /// How long an open circuit stays open.
    pub cooldown_secs: u64,
    #[serde(flatten)]
    pub retry: RetryPolicy,
    /// Per-attempt provider timeout.
    pub request_timeout_secs: u64,
    /// Default aggregation policy for validation.
    pub strictness: Strictness,
    /// Reflexion iteration cap (number of validations).
    pub max_iterations: u32,
    /// Similarity at or above which a candidate is a duplicate.
    pub dedup_threshold: f32,
    /// Minimum token-window similarity for a non-verbatim excerpt.
    pub citation_fuzzy_threshold: f64,
    /// Significance from which the excerpt must be unhedged.
    pub high_significance_threshold: u8,
    pub budget_exhausted_policy: BudgetExhaustedPolicy,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 300,
            retry: RetryPolicy::default(),
            request_timeout_secs: 45,
            strictness: Strictness::Standard,
            max_iterations: 3,
            dedup_threshold: 0.92,
            citation_fuzzy_threshold: 0.90,
            high_significance_threshold: 8,
            budget_exhausted_policy: BudgetExhaustedPolicy::AcceptAsIs,
        }
    }
}

impl OrchestrationConfig {
    /// Defaults with environment overrides applied, then validated.
    pub fn from_env() -> Result<Self, OrchestrationError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `INSIGHT_*` environment variables onto this config.
    pub fn apply_env(&mut self) -> Result<(), OrchestrationError> {
        if let Some(v) = env_parse(ENV_FAILURE_THRESHOLD)? {
            self.failure_threshold = v;
        }
        if let Some(v) = env_parse(ENV_COOLDOWN_SECS)? {
            self.cooldown_secs = v;
        }
        if let Some(v) = env_parse(ENV_MAX_RETRIES)? {
            self.retry.max_retries = v;
        }
        if let Some(v) = env_parse(ENV_BACKOFF_BASE_MS)? {
            self.retry.backoff_base_ms = v;
        }
        if let Some(v) = env_parse(ENV_REQUEST_TIMEOUT_SECS)? {
            self.request_timeout_secs = v;
        }
        if let Ok(raw) = env::var(ENV_STRICTNESS) {
            self.strictness = raw.parse().map_err(|e: String| {
                OrchestrationError::Configuration(format!("{ENV_STRICTNESS}: {e}"))
            })?;
        }
        if let Some(v) = env_parse(ENV_MAX_ITERATIONS)? {
            self.max_iterations = v;
        }
        if let Some(v) = env_parse(ENV_DEDUP_THRESHOLD)? {
            self.dedup_threshold = v;
        }
        if let Ok(raw) = env::var(ENV_BUDGET_POLICY) {
            self.budget_exhausted_policy = match raw.trim().to_ascii_lowercase().as_str() {
                "accept" | "accept_as_is" => BudgetExhaustedPolicy::AcceptAsIs,
                "reject" => BudgetExhaustedPolicy::Reject,
                other => {
                    return Err(OrchestrationError::Configuration(format!(
                        "{ENV_BUDGET_POLICY}: unknown policy '{other}'"
                    )))
                }
            };
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate the config; every violation is a configuration error.
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        let bad = |msg: String| Err(OrchestrationError::Configuration(msg));
        if self.failure_threshold == 0 {
            return bad("failure_threshold must be > 0".to_string());
        }
        if self.cooldown_secs == 0 {
            return bad("cooldown_secs must be > 0".to_string());
        }
        if self.request_timeout_secs == 0 {
            return bad("request_timeout_secs must be > 0".to_string());
        }
        if self.max_iterations == 0 {
            return bad("max_iterations must be > 0".to_string());
        }
        if !(self.dedup_threshold > 0.0 && self.dedup_threshold <= 1.0) {
            return bad(format!(
                "dedup_threshold must be in (0, 1], got {}",
                self.dedup_threshold
            ));
        }
        if !(self.citation_fuzzy_threshold > 0.0 && self.citation_fuzzy_threshold <= 1.0) {
            return bad(format!(
                "citation_fuzzy_threshold must be in (0, 1], got {}",
                self.citation_fuzzy_threshold
            ));
        }
        if !(1..=10).contains(&self.high_significance_threshold) {
            return bad(format!(
                "high_significance_threshold must be in [1, 10], got {}",
                self.high_significance_threshold
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, OrchestrationError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| OrchestrationError::Configuration(format!("{key}: {e}"))),
        Err(_) => Ok(None),
    }
}
