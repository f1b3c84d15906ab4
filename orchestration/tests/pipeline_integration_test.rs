//! End-to-end tests for the insight pipeline with in-process providers.
//!
//! The fake provider answers by prompt kind (extraction, judge, refinement)
//! so the real router, validator, reflexion loop and deduplicator all run.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use orchestration::{
    Artifact, ArtifactRequest, BudgetExhaustedPolicy, CapabilityTag, CheckName, HealthTracker,
    InsightPipeline, LoopStatus, OrchestrationConfig, PipelineOutcome, ProviderClient,
    ProviderError, ProviderSpec, RetryPolicy, RoutedProvider, Router, Similarity, Strictness,
    Verdict,
};

const SOURCE: &str = "Q1 revenue dropped 12% due to supply delays";

const REVENUE_DRAFT: &str = r#"{"content": "Revenue declined", "excerpt": "revenue dropped 12%", "significance": 9, "themes": ["finance"], "confidence": 0.9}"#;
const HEDGED_DRAFT: &str = r#"{"content": "Revenue will collapse", "excerpt": "revenue may drop", "significance": 9, "themes": ["finance"], "confidence": 0.9}"#;
const PASS: &str = r#"{"passed": true, "explanation": "supported by the source"}"#;

/// Answers by prompt kind; counts every call.
struct DocumentModel {
    draft: &'static str,
    revision: &'static str,
    judge: &'static str,
    calls: AtomicU32,
    refinements: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl DocumentModel {
    fn new(draft: &'static str, revision: &'static str, judge: &'static str) -> Self {
        Self {
            draft,
            revision,
            judge,
            calls: AtomicU32::new(0),
            refinements: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ProviderClient for DocumentModel {
    async fn generate(&self, prompt: &str, _timeout: Duration) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.contains("failed validation") {
            self.refinements.fetch_add(1, Ordering::SeqCst);
            Ok(self.revision.to_string())
        } else if prompt.contains("Extract exactly one claim") {
            Ok(self.draft.to_string())
        } else {
            Ok(self.judge.to_string())
        }
    }
}

/// Always errors with the given status.
struct DownProvider {
    status: u16,
    calls: AtomicU32,
}

#[async_trait]
impl ProviderClient for DownProvider {
    async fn generate(&self, _prompt: &str, _timeout: Duration) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::from_status(self.status, "unavailable"))
    }
}

fn fast_config() -> OrchestrationConfig {
    OrchestrationConfig {
        retry: RetryPolicy {
            max_retries: 1,
            backoff_base_ms: 5,
        },
        ..OrchestrationConfig::default()
    }
}

fn pipeline_with(
    providers: Vec<RoutedProvider>,
    config: OrchestrationConfig,
) -> (InsightPipeline, Arc<HealthTracker>) {
    let health = Arc::new(HealthTracker::new(config.failure_threshold, config.cooldown()));
    let router = Arc::new(Router::from_config(providers, health.clone(), &config));
    (InsightPipeline::new(router, config), health)
}

fn completed(outcome: PipelineOutcome) -> orchestration::ReflexionOutcome {
    match outcome {
        PipelineOutcome::Completed(outcome) => outcome,
        PipelineOutcome::Duplicate(m) => panic!("unexpected duplicate of {}", m.id),
    }
}

/// Test: the revenue scenario passes standard validation on the first try.
#[tokio::test]
async fn test_revenue_scenario_passes_standard() {
    let model = Arc::new(DocumentModel::new(REVENUE_DRAFT, REVENUE_DRAFT, PASS));
    let (pipeline, _) = pipeline_with(
        vec![RoutedProvider::new(
            ProviderSpec::new("local", 0, CapabilityTag::Cheap),
            model.clone(),
        )],
        fast_config(),
    );

    let request = ArtifactRequest::new("Extract the key financial fact.", SOURCE, "case-1");
    let outcome = completed(pipeline.request_artifact(&request).await.unwrap());

    assert_eq!(outcome.status, LoopStatus::Accepted);
    assert_eq!(outcome.reports.len(), 1);
    let report = outcome.final_report().unwrap();
    assert_eq!(report.verdict, Verdict::Pass);
    assert!(report.check(CheckName::Citation).unwrap().passed);
    assert!(report.check(CheckName::ConfidenceCalibration).unwrap().passed);
    assert_eq!(outcome.artifact.significance, 9);
    assert_eq!(outcome.artifact.version, 1);
}

/// Test: a hedged high-significance excerpt is refined into a calibrated one.
#[tokio::test]
async fn test_hedged_claim_is_refined_then_accepted() {
    let hedged_source = "Analysts say revenue may drop. Q1 revenue dropped 12% due to supply delays";
    let model = Arc::new(DocumentModel::new(HEDGED_DRAFT, REVENUE_DRAFT, PASS));
    let (pipeline, _) = pipeline_with(
        vec![RoutedProvider::new(
            ProviderSpec::new("local", 0, CapabilityTag::Cheap),
            model.clone(),
        )],
        fast_config(),
    );

    let request = ArtifactRequest::new("Extract.", hedged_source, "case-1");
    let outcome = completed(pipeline.request_artifact(&request).await.unwrap());

    assert_eq!(outcome.status, LoopStatus::Accepted);
    assert_eq!(outcome.reports[0].verdict, Verdict::Refine);
    assert_eq!(outcome.reports[1].verdict, Verdict::Pass);
    assert_eq!(outcome.artifact.version, 2);
    assert_eq!(outcome.artifact.excerpt, "revenue dropped 12%");
    assert_eq!(model.refinements.load(Ordering::SeqCst), 1);
}

/// Test: a reviser that never fixes the issue exhausts the budget.
#[tokio::test]
async fn test_always_refine_stops_at_max_iterations() {
    let hedged_source = "Analysts say revenue may drop sharply this year";
    let model = Arc::new(DocumentModel::new(HEDGED_DRAFT, HEDGED_DRAFT, PASS));
    let config = OrchestrationConfig {
        max_iterations: 3,
        budget_exhausted_policy: BudgetExhaustedPolicy::Reject,
        ..fast_config()
    };
    let (pipeline, _) = pipeline_with(
        vec![RoutedProvider::new(
            ProviderSpec::new("local", 0, CapabilityTag::Cheap),
            model.clone(),
        )],
        config,
    );

    let outcome = completed(
        pipeline
            .request_artifact(&ArtifactRequest::new("Extract.", hedged_source, "case-1"))
            .await
            .unwrap(),
    );

    assert_eq!(outcome.status, LoopStatus::BudgetExhausted);
    assert_eq!(outcome.reports.len(), 3);
    assert!(outcome.reports.iter().all(|r| r.verdict == Verdict::Refine));
    assert_eq!(model.refinements.load(Ordering::SeqCst), 2);
    assert!(!outcome.is_accepted());
}

/// Test: a fabricated excerpt is rejected without refinement.
#[tokio::test]
async fn test_fabricated_excerpt_is_rejected() {
    let fabricated = r#"{"content": "Revenue doubled", "excerpt": "revenue doubled in Q2", "significance": 9, "themes": ["finance"]}"#;
    let model = Arc::new(DocumentModel::new(fabricated, REVENUE_DRAFT, PASS));
    let (pipeline, _) = pipeline_with(
        vec![RoutedProvider::new(
            ProviderSpec::new("local", 0, CapabilityTag::Cheap),
            model.clone(),
        )],
        fast_config(),
    );

    let outcome = completed(
        pipeline
            .request_artifact(&ArtifactRequest::new("Extract.", SOURCE, "case-1"))
            .await
            .unwrap(),
    );

    assert_eq!(outcome.status, LoopStatus::Rejected);
    assert!(!outcome.final_report().unwrap().check(CheckName::Citation).unwrap().passed);
    // Extraction only: no judge calls after the citation failure, no refinement.
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
}

/// Test: failover to the fallback provider when the primary is down.
#[tokio::test]
async fn test_failover_keeps_pipeline_working() {
    let primary = Arc::new(DownProvider {
        status: 503,
        calls: AtomicU32::new(0),
    });
    let fallback = Arc::new(DocumentModel::new(REVENUE_DRAFT, REVENUE_DRAFT, PASS));
    let config = OrchestrationConfig {
        failure_threshold: 1,
        ..fast_config()
    };
    let (pipeline, health) = pipeline_with(
        vec![
            RoutedProvider::new(
                ProviderSpec::new("primary", 0, CapabilityTag::Expensive),
                primary.clone(),
            ),
            RoutedProvider::new(
                ProviderSpec::new("fallback", 1, CapabilityTag::Expensive),
                fallback.clone(),
            ),
        ],
        config,
    );

    let outcome = completed(
        pipeline
            .request_artifact(&ArtifactRequest::new("Extract.", SOURCE, "case-1"))
            .await
            .unwrap(),
    );

    assert!(outcome.is_accepted());
    // Two attempts on the first call, then the open circuit skips the primary.
    assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
    assert!(!health.is_available("primary"));
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 3);
}

/// Test: every provider down surfaces a retry-later error and no artifact.
#[tokio::test]
async fn test_all_providers_down_is_retry_later() {
    let (pipeline, _) = pipeline_with(
        vec![
            RoutedProvider::new(
                ProviderSpec::new("a", 0, CapabilityTag::Expensive),
                Arc::new(DownProvider {
                    status: 429,
                    calls: AtomicU32::new(0),
                }),
            ),
            RoutedProvider::new(
                ProviderSpec::new("b", 1, CapabilityTag::Cheap),
                Arc::new(DownProvider {
                    status: 401,
                    calls: AtomicU32::new(0),
                }),
            ),
        ],
        fast_config(),
    );

    let err = pipeline
        .request_artifact(&ArtifactRequest::new("Extract.", SOURCE, "case-1"))
        .await
        .unwrap_err();
    assert!(err.is_retry_later());
    assert_eq!(err.provider_failures().len(), 2);
}

/// Test: judge outage during validation is a FAIL, never a PASS.
#[tokio::test]
async fn test_judge_outage_fails_validation() {
    let (pipeline, _) = pipeline_with(
        vec![RoutedProvider::new(
            ProviderSpec::new("judge", 0, CapabilityTag::Cheap),
            Arc::new(DownProvider {
                status: 500,
                calls: AtomicU32::new(0),
            }),
        )],
        fast_config(),
    );
    let artifact = Artifact::new("case-1", "Revenue declined", "revenue dropped 12%")
        .with_significance(9)
        .with_themes(["finance"]);

    let report = pipeline
        .critique(&artifact, SOURCE, Strictness::Standard)
        .await
        .unwrap();
    assert_eq!(report.verdict, Verdict::Fail);
    assert!(report.validation_unavailable);
}

struct FixedSimilarity(f32);

impl Similarity for FixedSimilarity {
    fn similarity(&self, _left: &str, _right: &str) -> f32 {
        self.0
    }
}

/// Test: a paraphrase scoring 0.95 against an existing artifact is a duplicate.
#[tokio::test]
async fn test_team_deadline_duplicate_skips_generation() {
    let model = Arc::new(DocumentModel::new(REVENUE_DRAFT, REVENUE_DRAFT, PASS));
    let (pipeline, _) = pipeline_with(
        vec![RoutedProvider::new(
            ProviderSpec::new("local", 0, CapabilityTag::Cheap),
            model.clone(),
        )],
        fast_config(),
    );
    let pipeline = pipeline.with_similarity(Box::new(FixedSimilarity(0.95)));
    let prior = Artifact::new("team-case", "The team missed the project deadline", "missed the deadline");
    pipeline.remember(&prior);

    let request = ArtifactRequest::new("Extract.", "The team failed to meet the deadline.", "team-case")
        .with_hint("Team failed to meet the deadline");
    match pipeline.request_artifact(&request).await.unwrap() {
        PipelineOutcome::Duplicate(found) => {
            assert_eq!(found.id, prior.id);
            assert_eq!(found.score, 0.95);
        }
        PipelineOutcome::Completed(_) => panic!("expected duplicate"),
    }
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}
