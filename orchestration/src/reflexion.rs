//! Bounded critique → refine loop.
//!
//! ```text
//!  iteration 1..=max
//!   ┌──────────┐  PASS   ┌──────────┐
//!   │ critique ├────────►│ Accepted │
//!   └────┬─────┘         └──────────┘
//!        │ FAIL ───────► Rejected (never refined)
//!        │ REFINE
//!        ▼
//!   last iteration? ── yes ──► BudgetExhausted (policy decides acceptance)
//!        │ no
//!        ▼
//!     revise ──► version + 1, back to critique
//! ```
//!
//! Each iteration produces exactly one report, so an outcome never carries
//! more than `max_iterations` reports.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::BudgetExhaustedPolicy;
use crate::error::OrchestrationError;
use crate::prompts::{self, ArtifactDraft};
use crate::router::Router;
use crate::types::{Artifact, CritiqueReport, Strictness, Verdict};
use crate::validator::Validator;

/// Produces one critique report per call.
#[async_trait]
pub trait ArtifactCritic: Send + Sync {
    async fn critique(
        &self,
        artifact: &Artifact,
        source_text: &str,
        strictness: Strictness,
        iteration: u32,
        max_iterations: u32,
        cancel: &CancellationToken,
    ) -> Result<CritiqueReport, OrchestrationError>;
}

/// Produces the next version of an artifact from its latest report.
#[async_trait]
pub trait ArtifactReviser: Send + Sync {
    async fn revise(
        &self,
        artifact: &Artifact,
        report: &CritiqueReport,
        source_text: &str,
        cancel: &CancellationToken,
    ) -> Result<Artifact, OrchestrationError>;
}

#[async_trait]
impl ArtifactCritic for Validator {
    async fn critique(
        &self,
        artifact: &Artifact,
        source_text: &str,
        strictness: Strictness,
        iteration: u32,
        max_iterations: u32,
        cancel: &CancellationToken,
    ) -> Result<CritiqueReport, OrchestrationError> {
        self.validate_with_cancel(artifact, source_text, strictness, iteration, max_iterations, cancel)
            .await
    }
}

/// Asks the router for a corrected artifact.
pub struct RouterReviser {
    router: Arc<Router>,
}

impl RouterReviser {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl ArtifactReviser for RouterReviser {
    async fn revise(
        &self,
        artifact: &Artifact,
        report: &CritiqueReport,
        source_text: &str,
        cancel: &CancellationToken,
    ) -> Result<Artifact, OrchestrationError> {
        let prompt = prompts::refinement_prompt(artifact, report, source_text);
        let options = self.router.options().with_cancel(cancel.clone());
        let generation = self.router.generate(&prompt, &options).await?;
        let revised = ArtifactDraft::parse(&generation.text)?.revise(artifact);
        info!(
            artifact_id = %revised.id,
            version = revised.version,
            provider = %generation.provider,
            "artifact refined"
        );
        Ok(revised)
    }
}

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Accepted,
    Rejected,
    /// Still REFINE after the last allowed iteration.
    BudgetExhausted,
}

/// Final artifact version plus every report, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflexionOutcome {
    pub artifact: Artifact,
    pub reports: Vec<CritiqueReport>,
    pub status: LoopStatus,
    accepted: bool,
}

impl ReflexionOutcome {
    pub fn final_report(&self) -> Option<&CritiqueReport> {
        self.reports.last()
    }

    /// Whether the caller should keep the artifact. Budget exhaustion
    /// follows the configured [`BudgetExhaustedPolicy`].
    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn iterations(&self) -> u32 {
        self.reports.len() as u32
    }
}

/// Runs critique and refinement until a terminal verdict or the iteration cap.
pub struct ReflexionLoop {
    critic: Arc<dyn ArtifactCritic>,
    reviser: Arc<dyn ArtifactReviser>,
    strictness: Strictness,
    budget_policy: BudgetExhaustedPolicy,
}

impl ReflexionLoop {
    pub fn new(critic: Arc<dyn ArtifactCritic>, reviser: Arc<dyn ArtifactReviser>) -> Self {
        Self {
            critic,
            reviser,
            strictness: Strictness::default(),
            budget_policy: BudgetExhaustedPolicy::default(),
        }
    }

    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn with_budget_policy(mut self, policy: BudgetExhaustedPolicy) -> Self {
        self.budget_policy = policy;
        self
    }

    pub async fn critique_with_refinement(
        &self,
        artifact: Artifact,
        source_text: &str,
        max_iterations: u32,
    ) -> Result<ReflexionOutcome, OrchestrationError> {
        self.run(artifact, source_text, max_iterations, &CancellationToken::new())
            .await
    }

    /// Like [`critique_with_refinement`](Self::critique_with_refinement), stopping
    /// with [`OrchestrationError::Cancelled`] once `cancel` fires.
    pub async fn run(
        &self,
        artifact: Artifact,
        source_text: &str,
        max_iterations: u32,
        cancel: &CancellationToken,
    ) -> Result<ReflexionOutcome, OrchestrationError> {
        let max_iterations = max_iterations.max(1);
        let mut current = artifact;
        let mut reports: Vec<CritiqueReport> = Vec::new();

        for iteration in 1..=max_iterations {
            if cancel.is_cancelled() {
                return Err(OrchestrationError::Cancelled(format!(
                    "reflexion stopped before iteration {iteration}"
                )));
            }

            let report = self
                .critic
                .critique(&current, source_text, self.strictness, iteration, max_iterations, cancel)
                .await?;
            let verdict = report.verdict;
            reports.push(report);

            match verdict {
                Verdict::Pass => {
                    info!(artifact_id = %current.id, iteration, "artifact accepted");
                    return Ok(self.finish(current, reports, LoopStatus::Accepted));
                }
                Verdict::Fail => {
                    info!(artifact_id = %current.id, iteration, "artifact rejected");
                    return Ok(self.finish(current, reports, LoopStatus::Rejected));
                }
                Verdict::Refine if iteration == max_iterations => break,
                Verdict::Refine => {
                    if cancel.is_cancelled() {
                        return Err(OrchestrationError::Cancelled(format!(
                            "reflexion stopped before refining iteration {iteration}"
                        )));
                    }
                    let last = reports.last().ok_or_else(|| {
                        OrchestrationError::MalformedResponse("missing critique report".to_string())
                    })?;
                    let revised = self.reviser.revise(&current, last, source_text, cancel).await;
                    current = match revised {
                        Ok(next) => next,
                        Err(err) if err.is_cancelled() => return Err(err),
                        Err(err) => {
                            warn!(artifact_id = %current.id, iteration, error = %err, "refinement failed");
                            return Err(OrchestrationError::RefinementFailed {
                                reports,
                                source: Box::new(err),
                            });
                        }
                    };
                }
            }
        }

        warn!(
            artifact_id = %current.id,
            max_iterations,
            policy = ?self.budget_policy,
            "RefinementBudgetExhausted"
        );
        Ok(self.finish(current, reports, LoopStatus::BudgetExhausted))
    }

    fn finish(
        &self,
        artifact: Artifact,
        reports: Vec<CritiqueReport>,
        status: LoopStatus,
    ) -> ReflexionOutcome {
        let accepted = match status {
            LoopStatus::Accepted => true,
            LoopStatus::Rejected => false,
            LoopStatus::BudgetExhausted => self.budget_policy == BudgetExhaustedPolicy::AcceptAsIs,
        };
        ReflexionOutcome {
            artifact,
            reports,
            status,
            accepted,
        }
    }
}
