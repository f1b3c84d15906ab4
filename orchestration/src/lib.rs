//! Insight Orchestration Core
//!
//! Deterministic library behind the insight worker. It owns every decision
//! about *which* model is asked, *whether* an answer is trusted, and *when*
//! refinement stops; it never talks HTTP itself.
//!
//! # Components
//!
//! - [`health::HealthTracker`]: per-provider circuit breaker (lazy cooldown expiry)
//! - [`router::Router`]: priority routing with transient-only retries and failover
//! - [`validator::Validator`]: citation, calibration, coherence, grounding and
//!   contradiction checks under lenient / standard / strict aggregation
//! - [`reflexion::ReflexionLoop`]: bounded critique → refine loop
//! - [`dedup::Deduplicator`]: scoped near-duplicate detection
//! - [`pipeline::InsightPipeline`]: the inbound facade tying them together
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use orchestration::{
//!     ArtifactRequest, HealthTracker, InsightPipeline, OrchestrationConfig, Router,
//! };
//!
//! # async fn demo(providers: Vec<orchestration::RoutedProvider>) -> Result<(), orchestration::OrchestrationError> {
//! let config = OrchestrationConfig::from_env()?;
//! let health = Arc::new(HealthTracker::new(config.failure_threshold, config.cooldown()));
//! let router = Arc::new(Router::from_config(providers, health, &config));
//! let pipeline = InsightPipeline::new(router, config);
//!
//! let request = ArtifactRequest::new(
//!     "Extract the key financial fact.",
//!     "Q1 revenue dropped 12% due to supply delays",
//!     "case-42",
//! );
//! let outcome = pipeline.request_artifact(&request).await?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dedup;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod prompts;
pub mod provider;
pub mod reflexion;
pub mod router;
pub mod types;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{BudgetExhaustedPolicy, OrchestrationConfig, RetryPolicy};
pub use dedup::{
    Deduplicator, DuplicateMatch, ExistingArtifact, HashedEmbedder, Similarity,
    DEFAULT_DEDUP_THRESHOLD,
};
pub use error::{OrchestrationError, PermanentKind, ProviderError, ProviderFailure, TransientKind};
pub use health::{CircuitState, HealthState, HealthTracker};
pub use pipeline::{ArtifactRequest, InsightPipeline, PipelineOutcome};
pub use provider::{ProviderClient, RoutedProvider};
pub use reflexion::{
    ArtifactCritic, ArtifactReviser, LoopStatus, ReflexionLoop, ReflexionOutcome, RouterReviser,
};
pub use router::{GenerateOptions, Router};
pub use types::{
    Artifact, AttemptOutcome, CapabilityTag, CheckClass, CheckName, CheckResult, CritiqueReport,
    Generation, ProviderSpec, RoutingAttempt, SourceClaim, Strictness, Verdict,
};
pub use validator::Validator;
