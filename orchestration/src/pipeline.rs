//! Inbound entry point: dedup → generate → dedup → reflexion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::OrchestrationConfig;
use crate::dedup::{Deduplicator, DuplicateMatch, ExistingArtifact, Similarity};
use crate::error::OrchestrationError;
use crate::prompts::{self, ArtifactDraft};
use crate::reflexion::{ReflexionLoop, ReflexionOutcome, RouterReviser};
use crate::router::Router;
use crate::types::{Artifact, CritiqueReport, Strictness};
use crate::validator::Validator;

/// One request for a new artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRequest {
    /// Extraction instruction placed before the source.
    pub prompt: String,
    pub source_text: String,
    pub scope_id: String,
    /// Candidate text known before generation; checked for duplicates first.
    #[serde(default)]
    pub candidate_hint: Option<String>,
}

impl ArtifactRequest {
    pub fn new(
        prompt: impl Into<String>,
        source_text: impl Into<String>,
        scope_id: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            source_text: source_text.into(),
            scope_id: scope_id.into(),
            candidate_hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.candidate_hint = Some(hint.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// Matched an artifact already known in the scope; nothing was validated.
    Duplicate(DuplicateMatch),
    Completed(ReflexionOutcome),
}

pub struct InsightPipeline {
    router: Arc<Router>,
    validator: Arc<Validator>,
    reflexion: ReflexionLoop,
    dedup: Deduplicator,
    config: OrchestrationConfig,
    known: Mutex<HashMap<String, Vec<ExistingArtifact>>>,
}

impl InsightPipeline {
    pub fn new(router: Arc<Router>, config: OrchestrationConfig) -> Self {
        let validator = Arc::new(Validator::new(Arc::clone(&router), config.clone()));
        let reviser = Arc::new(RouterReviser::new(Arc::clone(&router)));
        let reflexion = ReflexionLoop::new(validator.clone(), reviser)
            .with_strictness(config.strictness)
            .with_budget_policy(config.budget_exhausted_policy);
        Self {
            router,
            validator,
            reflexion,
            dedup: Deduplicator::default(),
            config,
            known: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_similarity(mut self, similarity: Box<dyn Similarity>) -> Self {
        self.dedup = Deduplicator::new(similarity);
        self
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    fn known(&self) -> MutexGuard<'_, HashMap<String, Vec<ExistingArtifact>>> {
        self.known.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an accepted artifact to the in-memory dedup store.
    pub fn remember(&self, artifact: &Artifact) {
        self.known()
            .entry(artifact.scope_id.clone())
            .or_default()
            .push(ExistingArtifact {
                id: artifact.id,
                scope_id: artifact.scope_id.clone(),
                content: artifact.content.clone(),
            });
    }

    /// Load artifacts persisted by the caller.
    pub fn seed_existing(&self, existing: impl IntoIterator<Item = ExistingArtifact>) {
        let mut known = self.known();
        for item in existing {
            known.entry(item.scope_id.clone()).or_default().push(item);
        }
    }

    fn find_duplicate(&self, text: &str, scope_id: &str) -> Option<DuplicateMatch> {
        let known = self.known();
        let existing = known.get(scope_id)?;
        self.dedup
            .is_duplicate(text, existing, scope_id, self.config.dedup_threshold)
    }

    pub async fn request_artifact(
        &self,
        request: &ArtifactRequest,
    ) -> Result<PipelineOutcome, OrchestrationError> {
        self.request_artifact_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Accepted artifacts are remembered for later requests in the same scope.
    pub async fn request_artifact_with_cancel(
        &self,
        request: &ArtifactRequest,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, OrchestrationError> {
        let check_cancel = |stage: &str| {
            if cancel.is_cancelled() {
                Err(OrchestrationError::Cancelled(format!("cancelled before {stage}")))
            } else {
                Ok(())
            }
        };

        check_cancel("dedup")?;
        if let Some(hint) = request.candidate_hint.as_deref() {
            if let Some(found) = self.find_duplicate(hint, &request.scope_id) {
                info!(scope = %request.scope_id, duplicate_of = %found.id, "hint is a duplicate, skipping generation");
                return Ok(PipelineOutcome::Duplicate(found));
            }
        }

        check_cancel("generation")?;
        let prompt = prompts::extraction_prompt(&request.prompt, &request.source_text);
        let options = self.router.options().with_cancel(cancel.clone());
        let generation = self.router.generate(&prompt, &options).await?;
        let artifact = ArtifactDraft::parse(&generation.text)?.into_artifact(&request.scope_id);
        debug!(
            artifact_id = %artifact.id,
            provider = %generation.provider,
            attempts = generation.attempts.len(),
            "artifact generated"
        );

        if let Some(found) = self.find_duplicate(&artifact.content, &request.scope_id) {
            info!(scope = %request.scope_id, duplicate_of = %found.id, "generated artifact is a duplicate");
            return Ok(PipelineOutcome::Duplicate(found));
        }

        check_cancel("validation")?;
        let outcome = self
            .reflexion
            .run(artifact, &request.source_text, self.config.max_iterations, cancel)
            .await?;
        if outcome.is_accepted() {
            self.remember(&outcome.artifact);
        }
        info!(
            scope = %request.scope_id,
            status = ?outcome.status,
            iterations = outcome.iterations(),
            accepted = outcome.is_accepted(),
            "artifact pipeline finished"
        );
        Ok(PipelineOutcome::Completed(outcome))
    }

    /// Single validation pass, no refinement.
    pub async fn critique(
        &self,
        artifact: &Artifact,
        source_text: &str,
        strictness: Strictness,
    ) -> Result<CritiqueReport, OrchestrationError> {
        self.validator
            .validate(artifact, source_text, strictness, 1)
            .await
    }
}
