//! Domain types shared by the router, validator and reflexion loop.
//!
//! | Type              | Produced by          | Consumed by                    |
//! |-------------------|----------------------|--------------------------------|
//! | `ProviderSpec`    | configuration        | Router                         |
//! | `RoutingAttempt`  | Router               | HealthTracker, aggregate error |
//! | `Generation`      | Router               | pipeline, reviser, validator   |
//! | `Artifact`        | generation / reviser | Validator, Deduplicator        |
//! | `CritiqueReport`  | Validator            | ReflexionLoop, audit log       |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Providers ───────────────────────────────────────────────────────────────

/// Cost class of a provider backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTag {
    Cheap,
    Expensive,
}

impl fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cheap => write!(f, "cheap"),
            Self::Expensive => write!(f, "expensive"),
        }
    }
}

/// Immutable identity and ordering of one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub name: String,
    /// Lower values are tried first.
    pub priority: u32,
    pub capability: CapabilityTag,
}

impl ProviderSpec {
    pub fn new(name: impl Into<String>, priority: u32, capability: CapabilityTag) -> Self {
        Self {
            name: name.into(),
            priority,
            capability,
        }
    }
}

/// How a single provider call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Timeout,
    RateLimited,
    ServerError,
    NetworkError,
    AuthFailure,
    InvalidRequest,
    Cancelled,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::NetworkError => "network_error",
            Self::AuthFailure => "auth_failure",
            Self::InvalidRequest => "invalid_request",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Record of one provider call. Not persisted by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingAttempt {
    pub provider: String,
    /// 1-indexed attempt number against this provider.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
}

/// Successful routed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    /// Name of the provider whose answer was used.
    pub provider: String,
    /// Every attempt made for this call, in order.
    pub attempts: Vec<RoutingAttempt>,
}

// ── Artifact ────────────────────────────────────────────────────────────────

/// Lowest and highest significance an artifact may declare.
pub const SIGNIFICANCE_RANGE: (u8, u8) = (1, 10);

/// One underlying claim of a multi-source artifact (a pattern).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceClaim {
    pub artifact_id: Uuid,
    pub content: String,
}

/// A generated claim under validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    /// Case or document batch the artifact belongs to (dedup scope).
    pub scope_id: String,
    pub content: String,
    /// Supporting text; must appear (near-)verbatim in the source.
    pub excerpt: String,
    /// Clamped into [`SIGNIFICANCE_RANGE`].
    pub significance: u8,
    #[serde(default)]
    pub themes: Vec<String>,
    /// Clamped into `0.0..=1.0`.
    pub confidence: f64,
    /// 1 for the generated artifact, +1 per refinement.
    #[serde(default = "first_version")]
    pub version: u32,
    /// Underlying claims; two or more enables the contradiction check.
    #[serde(default)]
    pub sources: Vec<SourceClaim>,
}

fn first_version() -> u32 {
    1
}

impl Artifact {
    pub fn new(
        scope_id: impl Into<String>,
        content: impl Into<String>,
        excerpt: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope_id: scope_id.into(),
            content: content.into(),
            excerpt: excerpt.into(),
            significance: 5,
            themes: Vec::new(),
            confidence: 0.5,
            version: 1,
            sources: Vec::new(),
        }
    }

    pub fn with_significance(mut self, significance: u8) -> Self {
        self.significance = clamp_significance(significance);
        self
    }

    pub fn with_themes<I, S>(mut self, themes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.themes = themes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }

    pub fn with_sources(mut self, sources: Vec<SourceClaim>) -> Self {
        self.sources = sources;
        self
    }

    /// Whether the contradiction check applies.
    pub fn is_multi_source(&self) -> bool {
        self.sources.len() >= 2
    }

    /// Re-apply range clamps after deserialising model output.
    pub fn normalized(mut self) -> Self {
        self.significance = clamp_significance(self.significance);
        self.confidence = clamp_confidence(self.confidence);
        self.themes.retain(|t| !t.trim().is_empty());
        self
    }
}

pub(crate) fn clamp_significance(value: u8) -> u8 {
    value.clamp(SIGNIFICANCE_RANGE.0, SIGNIFICANCE_RANGE.1)
}

pub(crate) fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ── Critique ────────────────────────────────────────────────────────────────

/// Aggregation policy for check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Only the citation check can reject; model checks are skipped.
    Lenient,
    /// Deterministic failures reject, everything else asks for refinement.
    #[default]
    Standard,
    /// Any failure asks for refinement until the last iteration rejects.
    Strict,
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lenient => write!(f, "lenient"),
            Self::Standard => write!(f, "standard"),
            Self::Strict => write!(f, "strict"),
        }
    }
}

impl FromStr for Strictness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "standard" => Ok(Self::Standard),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown strictness '{other}'")),
        }
    }
}

/// Individual validation checks, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckName {
    Citation,
    ConfidenceCalibration,
    Coherence,
    Grounding,
    Contradiction,
}

/// How a check is evaluated, which decides how a failure aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckClass {
    /// No model call; failure cannot be fixed by refinement.
    Deterministic,
    /// No model call; failure is refinable.
    Heuristic,
    /// Routed through a provider.
    ModelAssisted,
}

impl CheckName {
    pub fn class(self) -> CheckClass {
        match self {
            Self::Citation => CheckClass::Deterministic,
            Self::ConfidenceCalibration => CheckClass::Heuristic,
            Self::Coherence | Self::Grounding | Self::Contradiction => CheckClass::ModelAssisted,
        }
    }

    pub fn needs_model(self) -> bool {
        self.class() == CheckClass::ModelAssisted
    }
}

impl fmt::Display for CheckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Citation => write!(f, "citation"),
            Self::ConfidenceCalibration => write!(f, "confidence_calibration"),
            Self::Coherence => write!(f, "coherence"),
            Self::Grounding => write!(f, "grounding"),
            Self::Contradiction => write!(f, "contradiction"),
        }
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: CheckName,
    pub passed: bool,
    pub explanation: String,
}

impl CheckResult {
    pub fn pass(check: CheckName, explanation: impl Into<String>) -> Self {
        Self {
            check,
            passed: true,
            explanation: explanation.into(),
        }
    }

    pub fn fail(check: CheckName, explanation: impl Into<String>) -> Self {
        Self {
            check,
            passed: false,
            explanation: explanation.into(),
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed { "pass" } else { "fail" };
        write!(f, "[{}][{}] {}", self.check, status, self.explanation)
    }
}

/// Overall verdict of one validation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Refine,
}

impl Verdict {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Refine)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Refine => write!(f, "REFINE"),
        }
    }
}

/// One validation attempt over one artifact version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueReport {
    pub verdict: Verdict,
    pub checks: Vec<CheckResult>,
    /// 1-indexed reflexion iteration.
    pub iteration: u32,
    pub strictness: Strictness,
    /// Set when a model-assisted check could not reach any provider.
    #[serde(default)]
    pub validation_unavailable: bool,
    pub created_at: DateTime<Utc>,
}

impl CritiqueReport {
    pub fn new(verdict: Verdict, checks: Vec<CheckResult>, iteration: u32, strictness: Strictness) -> Self {
        Self {
            verdict,
            checks,
            iteration,
            strictness,
            validation_unavailable: false,
            created_at: Utc::now(),
        }
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn check(&self, name: CheckName) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.check == name)
    }

    /// Bullet list of failed checks, used as refinement input.
    pub fn issues_for_prompt(&self) -> String {
        self.failed_checks()
            .map(|c| format!("- {}: {}", c.check, c.explanation))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_builder_clamps_ranges() {
        let artifact = Artifact::new("case-1", "claim", "excerpt")
            .with_significance(42)
            .with_confidence(1.7);
        assert_eq!(artifact.significance, 10);
        assert_eq!(artifact.confidence, 1.0);

        let low = Artifact::new("case-1", "claim", "excerpt").with_significance(0);
        assert_eq!(low.significance, 1);
    }

    #[test]
    fn normalized_drops_blank_themes() {
        let mut artifact = Artifact::new("s", "c", "e").with_themes(["finance", "  ", "ops"]);
        artifact.confidence = f64::NAN;
        let artifact = artifact.normalized();
        assert_eq!(artifact.themes, vec!["finance", "ops"]);
        assert_eq!(artifact.confidence, 0.0);
    }

    #[test]
    fn check_classes() {
        assert_eq!(CheckName::Citation.class(), CheckClass::Deterministic);
        assert_eq!(
            CheckName::ConfidenceCalibration.class(),
            CheckClass::Heuristic
        );
        assert!(CheckName::Grounding.needs_model());
        assert!(!CheckName::ConfidenceCalibration.needs_model());
    }

    #[test]
    fn strictness_parses_case_insensitively() {
        assert_eq!("STRICT".parse::<Strictness>(), Ok(Strictness::Strict));
        assert_eq!(" lenient ".parse::<Strictness>(), Ok(Strictness::Lenient));
        assert!("harsh".parse::<Strictness>().is_err());
        assert_eq!(Strictness::default(), Strictness::Standard);
    }

    #[test]
    fn report_issues_only_lists_failures() {
        let report = CritiqueReport::new(
            Verdict::Refine,
            vec![
                CheckResult::pass(CheckName::Citation, "found verbatim"),
                CheckResult::fail(CheckName::Grounding, "mentions Q2"),
            ],
            1,
            Strictness::Standard,
        );
        assert_eq!(report.issues_for_prompt(), "- grounding: mentions Q2");
        assert_eq!(report.failed_checks().count(), 1);
        assert!(report.check(CheckName::Citation).is_some_and(|c| c.passed));
    }

    #[test]
    fn artifact_deserializes_with_defaults() {
        let json = r#"{
            "id": "4f1c1f5e-8a59-4a4e-9d69-0f3c2f7f6d11",
            "scope_id": "case-9",
            "content": "Revenue declined",
            "excerpt": "revenue dropped 12%",
            "significance": 9,
            "confidence": 0.8
        }"#;
        let artifact: Artifact = serde_json::from_str(json).unwrap();
        assert_eq!(artifact.version, 1);
        assert!(artifact.themes.is_empty());
        assert!(!artifact.is_multi_source());
    }
}
