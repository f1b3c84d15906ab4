//! Insight worker: HTTP provider adapters, configuration, audit log and a
//! sequential document worker on top of the `orchestration` core.

pub mod audit;
pub mod config;
pub mod error;
pub mod providers;
pub mod worker;

use std::sync::Arc;

use orchestration::{HealthTracker, InsightPipeline, Router};
use tracing::info;

pub use audit::{AuditLog, AuditRecord, AuditStatus};
pub use config::{ProviderEntry, ProviderKind, WorkerConfig};
pub use error::WorkerError;
pub use worker::{ChunkResult, DocumentJob, Worker, WorkerHandle, WorkerSummary};

/// Wire configured providers into a router and pipeline.
pub fn build_pipeline(config: &WorkerConfig) -> Result<InsightPipeline, WorkerError> {
    let core = &config.orchestration;
    let health = Arc::new(HealthTracker::new(core.failure_threshold, core.cooldown()));
    let providers = providers::build_providers(&config.providers)?;
    info!(
        providers = providers.len(),
        strictness = %core.strictness,
        max_iterations = core.max_iterations,
        "pipeline configured"
    );
    let router = Router::from_config(providers, health, core);
    Ok(InsightPipeline::new(Arc::new(router), core.clone()))
}
