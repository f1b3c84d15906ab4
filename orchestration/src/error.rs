//! Error taxonomy for provider calls and orchestration.
//!
//! Provider adapters report [`ProviderError`], which the router classifies
//! without string matching:
//!
//! | Variant     | Kinds                                   | Retried | Counts toward circuit |
//! |-------------|-----------------------------------------|---------|-----------------------|
//! | `Transient` | timeout, rate limit, server (5xx), network | yes  | yes, once retries run out |
//! | `Permanent` | auth, invalid request, other            | no      | no                    |
//!
//! Everything above the router surfaces [`OrchestrationError`]. Refinement
//! budget exhaustion is deliberately absent: it is a terminal acceptance
//! state (`LoopStatus::BudgetExhausted`), not an error.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AttemptOutcome, CritiqueReport};

/// Retryable failure flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    /// The call exceeded its per-attempt timeout.
    Timeout,
    /// HTTP 429 or an equivalent quota signal.
    RateLimited,
    /// HTTP 5xx or an unusable success payload.
    Server,
    /// Connection refused, reset, DNS failure.
    Network,
}

/// Non-retryable failure flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermanentKind {
    /// Missing or rejected credentials (401/403).
    Auth,
    /// Malformed request, unknown model, context too long (other 4xx).
    InvalidRequest,
    /// Anything else the adapter knows will not succeed on retry.
    Other,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Server => write!(f, "server_error"),
            Self::Network => write!(f, "network_error"),
        }
    }
}

impl fmt::Display for PermanentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth => write!(f, "auth_failure"),
            Self::InvalidRequest => write!(f, "invalid_request"),
            Self::Other => write!(f, "permanent"),
        }
    }
}

/// Failure of a single provider call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Retryable with backoff.
    #[error("transient provider error ({kind}): {message}")]
    Transient { kind: TransientKind, message: String },

    /// Surfaced immediately; the router moves to the next provider.
    #[error("permanent provider error ({kind}): {message}")]
    Permanent { kind: PermanentKind, message: String },
}

impl ProviderError {
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        Self::Transient {
            kind,
            message: message.into(),
        }
    }

    pub fn permanent(kind: PermanentKind, message: impl Into<String>) -> Self {
        Self::Permanent {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::transient(TransientKind::Timeout, message)
    }

    /// Classify an HTTP status code returned by a provider endpoint.
    ///
    /// 408, 429 and 5xx are transient; 401/403 are auth failures; any other
    /// 4xx is an invalid request.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = format!("HTTP {status}: {}", body.into());
        match status {
            408 => Self::transient(TransientKind::Timeout, message),
            429 => Self::transient(TransientKind::RateLimited, message),
            500..=599 => Self::transient(TransientKind::Server, message),
            401 | 403 => Self::permanent(PermanentKind::Auth, message),
            400..=499 => Self::permanent(PermanentKind::InvalidRequest, message),
            _ => Self::permanent(PermanentKind::Other, message),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Outcome recorded on the routing attempt that produced this error.
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            Self::Transient { kind, .. } => match kind {
                TransientKind::Timeout => AttemptOutcome::Timeout,
                TransientKind::RateLimited => AttemptOutcome::RateLimited,
                TransientKind::Server => AttemptOutcome::ServerError,
                TransientKind::Network => AttemptOutcome::NetworkError,
            },
            Self::Permanent { kind, .. } => match kind {
                PermanentKind::Auth => AttemptOutcome::AuthFailure,
                PermanentKind::InvalidRequest | PermanentKind::Other => {
                    AttemptOutcome::InvalidRequest
                }
            },
        }
    }
}

/// Why one provider contributed nothing to a routed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: String,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.reason)
    }
}

fn join_failures(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no providers configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Unified error type for routing, validation and refinement.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Every provider was skipped or exhausted. Terminal for the request:
    /// callers report "processing unavailable, retry later" and must not
    /// fabricate a fallback artifact.
    #[error("all providers exhausted: {}", join_failures(.failures))]
    AllProvidersExhausted { failures: Vec<ProviderFailure> },

    /// A model-assisted validation check could not reach any provider.
    #[error("validation unavailable: {0}")]
    ValidationUnavailable(String),

    /// A provider answered but the text could not be turned into an artifact.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    /// Cooperative cancellation was requested.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Configuration is invalid or incomplete.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The reviser could not produce the next version. Keeps every report
    /// gathered before the failure so the attempt stays auditable.
    #[error("refinement failed after {} report(s): {source}", .reports.len())]
    RefinementFailed {
        reports: Vec<CritiqueReport>,
        #[source]
        source: Box<OrchestrationError>,
    },
}

impl OrchestrationError {
    /// `true` when the caller should surface "retry later" rather than
    /// treating the input as bad.
    pub fn is_retry_later(&self) -> bool {
        match self {
            Self::AllProvidersExhausted { .. } | Self::ValidationUnavailable(_) => true,
            Self::RefinementFailed { source, .. } => source.is_retry_later(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Per-provider failures for an exhausted call, empty otherwise.
    pub fn provider_failures(&self) -> &[ProviderFailure] {
        match self {
            Self::AllProvidersExhausted { failures } => failures,
            Self::RefinementFailed { source, .. } => source.provider_failures(),
            _ => &[],
        }
    }

    /// Critique reports produced before the failure, oldest first.
    pub fn partial_reports(&self) -> &[CritiqueReport] {
        match self {
            Self::RefinementFailed { reports, .. } => reports,
            _ => &[],
        }
    }
}
