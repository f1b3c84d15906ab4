//! Artifact validation.
//!
//! Runs the checks in order and aggregates them under a strictness policy:
//!
//! | Check                  | Class          | Lenient | Standard                 | Strict |
//! |------------------------|----------------|---------|--------------------------|--------|
//! | citation               | deterministic  | run     | run                      | run    |
//! | confidence calibration | heuristic      | run     | run                      | run    |
//! | coherence              | model-assisted | skip    | skip if citation failed  | run    |
//! | grounding              | model-assisted | skip    | skip if citation failed  | run    |
//! | contradiction          | model-assisted | skip    | multi-source only        | multi-source only |
//!
//! Model-assisted checks go through the [`Router`] preferring cheap
//! providers. If the router cannot reach any provider the report FAILs with
//! `validation_unavailable` set; an unverifiable artifact is never a PASS.

pub mod checks;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OrchestrationConfig;
use crate::error::OrchestrationError;
use crate::prompts;
use crate::router::Router;
use crate::types::{
    Artifact, CapabilityTag, CheckName, CheckResult, CritiqueReport, Strictness, Verdict,
};

/// Validates artifacts against their source text.
pub struct Validator {
    router: Arc<Router>,
    config: OrchestrationConfig,
}

impl Validator {
    pub fn new(router: Arc<Router>, config: OrchestrationConfig) -> Self {
        Self { router, config }
    }

    pub fn default_strictness(&self) -> Strictness {
        self.config.strictness
    }

    /// Validate one artifact version against the configured iteration cap.
    pub async fn validate(
        &self,
        artifact: &Artifact,
        source_text: &str,
        strictness: Strictness,
        iteration: u32,
    ) -> Result<CritiqueReport, OrchestrationError> {
        self.validate_with_cancel(
            artifact,
            source_text,
            strictness,
            iteration,
            self.config.max_iterations,
            &CancellationToken::new(),
        )
        .await
    }

    /// As [`validate`](Self::validate) with the caller's iteration cap; under
    /// strict aggregation `iteration >= max_iterations` turns a failure into
    /// FAIL. Only cancellation is returned as an error.
    pub async fn validate_with_cancel(
        &self,
        artifact: &Artifact,
        source_text: &str,
        strictness: Strictness,
        iteration: u32,
        max_iterations: u32,
        cancel: &CancellationToken,
    ) -> Result<CritiqueReport, OrchestrationError> {
        let mut results = vec![
            checks::citation(artifact, source_text, self.config.citation_fuzzy_threshold),
            checks::confidence_calibration(artifact, self.config.high_significance_threshold),
        ];
        let citation_passed = results[0].passed;

        let run_model_checks = match strictness {
            Strictness::Lenient => false,
            Strictness::Standard => citation_passed,
            Strictness::Strict => true,
        };

        let mut unavailable = None;
        if run_model_checks {
            for (check, prompt) in model_checks(artifact, source_text) {
                let Some(prompt) = prompt else {
                    results.push(CheckResult::pass(check, "no themes to check"));
                    continue;
                };
                match self.ask(check, &prompt, cancel).await {
                    Ok(result) => results.push(result),
                    Err(err) if err.is_cancelled() => return Err(err),
                    Err(err) => {
                        warn!(%check, error = %err, "model-assisted check unavailable");
                        let reason = OrchestrationError::ValidationUnavailable(err.to_string());
                        results.push(CheckResult::fail(check, reason.to_string()));
                        unavailable = Some(reason);
                        break;
                    }
                }
            }
        } else {
            debug!(%strictness, citation_passed, "model-assisted checks skipped");
        }

        let verdict = if unavailable.is_some() {
            Verdict::Fail
        } else {
            checks::aggregate(&results, strictness, iteration, max_iterations)
        };

        let mut report = CritiqueReport::new(verdict, results, iteration, strictness);
        report.validation_unavailable = unavailable.is_some();
        info!(
            artifact_id = %artifact.id,
            version = artifact.version,
            iteration,
            %strictness,
            %verdict,
            failed = report.failed_checks().count(),
            "artifact validated"
        );
        Ok(report)
    }

    async fn ask(
        &self,
        check: CheckName,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<CheckResult, OrchestrationError> {
        let options = self
            .router
            .options()
            .prefer(CapabilityTag::Cheap)
            .with_cancel(cancel.clone());
        let generation = self.router.generate(prompt, &options).await?;
        Ok(prompts::parse_check_verdict(check, &generation.text))
    }
}

/// Model-assisted checks that apply to `artifact`; `None` means the check
/// passes trivially without a model call.
fn model_checks(artifact: &Artifact, source_text: &str) -> Vec<(CheckName, Option<String>)> {
    let mut planned = vec![
        (
            CheckName::Coherence,
            (!artifact.themes.is_empty()).then(|| prompts::coherence_prompt(artifact)),
        ),
        (
            CheckName::Grounding,
            Some(prompts::grounding_prompt(artifact, source_text)),
        ),
    ];
    if artifact.is_multi_source() {
        planned.push((
            CheckName::Contradiction,
            Some(prompts::contradiction_prompt(artifact)),
        ));
    }
    planned
}
