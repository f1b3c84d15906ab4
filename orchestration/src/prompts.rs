//! Prompt builders and model-output parsing.
//!
//! Every prompt asks for strict JSON. Models wrap JSON in prose or code
//! fences often enough that parsing always goes through
//! [`extract_json_fragment`] first.

use serde::Deserialize;

use crate::error::OrchestrationError;
use crate::types::{clamp_confidence, clamp_significance, Artifact, CheckName, CheckResult, CritiqueReport};

const VERDICT_SCHEMA: &str = r#"{"passed": true|false, "explanation": "<one sentence>"}"#;

const ARTIFACT_SCHEMA: &str = r#"{"content": "<claim>", "excerpt": "<verbatim quote from the source>", "significance": 1-10, "themes": ["<theme>"], "confidence": 0.0-1.0}"#;

/// Slice from the first `{`/`[` to the last `}`/`]`.
pub fn extract_json_fragment(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let sliced = &text[start..];
    let end = sliced
        .char_indices()
        .rev()
        .find(|(_, c)| *c == '}' || *c == ']')
        .map(|(idx, c)| idx + c.len_utf8())?;
    Some(&sliced[..end])
}

// ── Extraction / refinement ─────────────────────────────────────────────────

pub fn extraction_prompt(instruction: &str, source_text: &str) -> String {
    format!(
        "{instruction}\n\n\
         Extract exactly one claim supported by the source below. The excerpt \
         must be copied verbatim from the source. Respond with STRICT JSON ONLY \
         using schema: {ARTIFACT_SCHEMA}\n\n\
         SOURCE:\n{source_text}"
    )
}

/// Ask for a corrected artifact given the failed checks of the last report.
pub fn refinement_prompt(artifact: &Artifact, report: &CritiqueReport, source_text: &str) -> String {
    format!(
        "A claim extracted from the source failed validation (iteration {iteration}).\n\n\
         CLAIM: {content}\n\
         EXCERPT: {excerpt}\n\
         SIGNIFICANCE: {significance}\n\
         THEMES: {themes}\n\n\
         ISSUES:\n{issues}\n\n\
         Revise the claim to resolve every issue. Only state what the excerpt \
         supports; lower the significance rather than overstate. Respond with \
         STRICT JSON ONLY using schema: {ARTIFACT_SCHEMA}\n\n\
         SOURCE:\n{source_text}",
        iteration = report.iteration,
        content = artifact.content,
        excerpt = artifact.excerpt,
        significance = artifact.significance,
        themes = artifact.themes.join(", "),
        issues = report.issues_for_prompt(),
    )
}

/// Model-proposed artifact fields. Identity is never taken from the model.
#[derive(Debug, Deserialize)]
pub struct ArtifactDraft {
    pub content: String,
    pub excerpt: String,
    #[serde(default = "default_significance")]
    pub significance: i64,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_significance() -> i64 {
    5
}

fn default_confidence() -> f64 {
    0.5
}

impl ArtifactDraft {
    pub fn parse(raw: &str) -> Result<Self, OrchestrationError> {
        let fragment = extract_json_fragment(raw).ok_or_else(|| {
            OrchestrationError::MalformedResponse("no JSON object in model output".to_string())
        })?;
        let draft: Self = serde_json::from_str(fragment)
            .map_err(|e| OrchestrationError::MalformedResponse(format!("artifact JSON: {e}")))?;
        if draft.content.trim().is_empty() {
            return Err(OrchestrationError::MalformedResponse(
                "artifact content is empty".to_string(),
            ));
        }
        Ok(draft)
    }

    fn significance(&self) -> u8 {
        clamp_significance(self.significance.clamp(0, i64::from(u8::MAX)) as u8)
    }

    /// Fresh artifact in `scope_id`.
    pub fn into_artifact(self, scope_id: &str) -> Artifact {
        let significance = self.significance();
        Artifact::new(scope_id, self.content, self.excerpt)
            .with_significance(significance)
            .with_themes(self.themes)
            .with_confidence(self.confidence)
            .normalized()
    }

    /// Revision of `previous`: keeps id, scope and sources, bumps the version.
    pub fn revise(self, previous: &Artifact) -> Artifact {
        Artifact {
            id: previous.id,
            scope_id: previous.scope_id.clone(),
            significance: self.significance(),
            confidence: clamp_confidence(self.confidence),
            content: self.content,
            excerpt: self.excerpt,
            themes: self.themes,
            version: previous.version.saturating_add(1),
            sources: previous.sources.clone(),
        }
        .normalized()
    }
}

// ── Model-assisted checks ───────────────────────────────────────────────────

pub fn coherence_prompt(artifact: &Artifact) -> String {
    format!(
        "Do the themes describe what the claim is about? A theme that the claim \
         does not touch is a failure.\n\n\
         CLAIM: {}\nTHEMES: {}\n\n\
         Respond with STRICT JSON ONLY using schema: {VERDICT_SCHEMA}",
        artifact.content,
        artifact.themes.join(", "),
    )
}

/// Cite-or-reject: every statement in the claim must be supported by the
/// excerpt or the source, nothing inferred from outside knowledge.
pub fn grounding_prompt(artifact: &Artifact, source_text: &str) -> String {
    format!(
        "Cite or reject. Check whether every statement in the claim is directly \
         supported by the excerpt or the source. Any figure, date, cause or \
         entity that the source does not state is a failure.\n\n\
         CLAIM: {}\nEXCERPT: {}\n\nSOURCE:\n{source_text}\n\n\
         Respond with STRICT JSON ONLY using schema: {VERDICT_SCHEMA}",
        artifact.content, artifact.excerpt,
    )
}

pub fn contradiction_prompt(artifact: &Artifact) -> String {
    let claims = artifact
        .sources
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "The pattern below is derived from several underlying claims. Fail if \
         any two claims contradict each other or the pattern.\n\n\
         PATTERN: {}\n\nCLAIMS:\n{claims}\n\n\
         Respond with STRICT JSON ONLY using schema: {VERDICT_SCHEMA}",
        artifact.content,
    )
}

#[derive(Debug, Deserialize)]
struct ModelVerdict {
    passed: bool,
    #[serde(default)]
    explanation: String,
}

/// Parse a model's verdict for `check`.
///
/// JSON first, then a leading `PASS`/`FAIL` token. Anything else fails the
/// check: an unreadable answer is never a pass.
pub fn parse_check_verdict(check: CheckName, raw: &str) -> CheckResult {
    if let Some(verdict) = extract_json_fragment(raw)
        .and_then(|fragment| serde_json::from_str::<ModelVerdict>(fragment).ok())
    {
        let explanation = if verdict.explanation.trim().is_empty() {
            "no explanation given".to_string()
        } else {
            verdict.explanation.trim().to_string()
        };
        return CheckResult {
            check,
            passed: verdict.passed,
            explanation,
        };
    }

    let trimmed = raw.trim();
    let (head, rest) = trimmed
        .split_once(char::is_whitespace)
        .unwrap_or((trimmed, ""));
    let token = head.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    let rest = rest.trim_start_matches([':', '-', ' ']).trim();
    let explanation = |default: &str| {
        if rest.is_empty() {
            default.to_string()
        } else {
            rest.to_string()
        }
    };
    if token.eq_ignore_ascii_case("pass") {
        CheckResult::pass(check, explanation("model answered PASS"))
    } else if token.eq_ignore_ascii_case("fail") {
        CheckResult::fail(check, explanation("model answered FAIL"))
    } else {
        let preview: String = trimmed.chars().take(120).collect();
        CheckResult::fail(check, format!("unparseable verdict: {preview}"))
    }
}
