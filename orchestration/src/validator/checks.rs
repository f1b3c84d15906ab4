//! Checks that run without a model call, plus verdict aggregation.

use crate::types::{Artifact, CheckClass, CheckName, CheckResult, Strictness, Verdict};

/// Markers that signal a hedged statement.
const HEDGE_LEXICON: &[&str] = &[
    "may",
    "might",
    "could",
    "possibly",
    "perhaps",
    "likely",
    "unlikely",
    "probably",
    "appears",
    "seems",
    "suggests",
    "reportedly",
    "allegedly",
    "estimated",
    "expected",
    "potentially",
    "roughly",
    "approximately",
    "around",
    "about",
    "unclear",
    "uncertain",
    "rumored",
    "rumoured",
];

/// Lower-case, unify typographic quotes and dashes, collapse whitespace.
pub(crate) fn normalize_text(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => '"',
            '\u{2010}'..='\u{2015}' | '\u{2212}' => '-',
            c => c,
        })
        .flat_map(char::to_lowercase)
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '%' || c == '\'' || c == '.'))
        .map(|t| t.trim_matches(|c: char| c == '.' || c == '\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Longest common token subsequence; order matters, gaps are allowed.
fn lcs_len(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            row[j + 1] = if x == y {
                prev[j] + 1
            } else {
                row[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

/// Best in-order alignment between the excerpt and any same-length token
/// window of the source, as a fraction of the excerpt length. Reordered
/// words do not count, so "B acquired A" never matches "A acquired B".
pub(crate) fn best_window_similarity(excerpt: &str, source: &str) -> f64 {
    let needle = tokens(excerpt);
    let hay = tokens(source);
    if needle.is_empty() || hay.is_empty() {
        return 0.0;
    }
    let width = needle.len().min(hay.len());
    let mut best = 0usize;
    for window in hay.windows(width) {
        best = best.max(lcs_len(&needle, window));
        if best == needle.len() {
            break;
        }
    }
    best as f64 / needle.len() as f64
}

/// Excerpt must appear (near-)verbatim in the source.
pub fn citation(artifact: &Artifact, source_text: &str, fuzzy_threshold: f64) -> CheckResult {
    let excerpt = normalize_text(&artifact.excerpt);
    if excerpt.is_empty() {
        return CheckResult::fail(CheckName::Citation, "excerpt is empty");
    }
    let source = normalize_text(source_text);
    if source.contains(&excerpt) {
        return CheckResult::pass(CheckName::Citation, "excerpt found verbatim in source");
    }
    let score = best_window_similarity(&excerpt, &source);
    if score >= fuzzy_threshold {
        CheckResult::pass(
            CheckName::Citation,
            format!("excerpt matches source at {score:.2} similarity"),
        )
    } else {
        CheckResult::fail(
            CheckName::Citation,
            format!("excerpt not found in source (best similarity {score:.2})"),
        )
    }
}

/// High-significance claims must rest on an unhedged excerpt.
pub fn confidence_calibration(artifact: &Artifact, high_significance: u8) -> CheckResult {
    if artifact.significance < high_significance {
        return CheckResult::pass(
            CheckName::ConfidenceCalibration,
            format!("significance {} needs no calibration", artifact.significance),
        );
    }
    let excerpt = normalize_text(&artifact.excerpt);
    let hedges: Vec<String> = tokens(&excerpt)
        .into_iter()
        .filter(|t| HEDGE_LEXICON.contains(&t.as_str()))
        .collect();
    if hedges.is_empty() {
        CheckResult::pass(
            CheckName::ConfidenceCalibration,
            format!("significance {} backed by a definitive excerpt", artifact.significance),
        )
    } else {
        CheckResult::fail(
            CheckName::ConfidenceCalibration,
            format!(
                "significance {} but excerpt is hedged ({})",
                artifact.significance,
                hedges.join(", ")
            ),
        )
    }
}

/// Combine check results into a verdict.
pub fn aggregate(
    checks: &[CheckResult],
    strictness: Strictness,
    iteration: u32,
    max_iterations: u32,
) -> Verdict {
    let failed = |class: CheckClass| {
        checks
            .iter()
            .any(|c| !c.passed && c.check.class() == class)
    };
    match strictness {
        Strictness::Lenient => {
            let citation_failed = checks
                .iter()
                .any(|c| c.check == CheckName::Citation && !c.passed);
            if citation_failed {
                Verdict::Fail
            } else {
                Verdict::Pass
            }
        }
        Strictness::Standard => {
            if failed(CheckClass::Deterministic) {
                Verdict::Fail
            } else if failed(CheckClass::Heuristic) || failed(CheckClass::ModelAssisted) {
                Verdict::Refine
            } else {
                Verdict::Pass
            }
        }
        Strictness::Strict => {
            if checks.iter().all(|c| c.passed) {
                Verdict::Pass
            } else if iteration >= max_iterations {
                Verdict::Fail
            } else {
                Verdict::Refine
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "Quarterly update: revenue dropped 12% year over year, \
                          while headcount stayed flat. The board \u{201C}expects\u{201D} recovery.";

    fn artifact(excerpt: &str, significance: u8) -> Artifact {
        Artifact::new("case", "claim", excerpt).with_significance(significance)
    }

    #[test]
    fn normalization_unifies_quotes_dashes_and_space() {
        assert_eq!(
            normalize_text("  The \u{201C}Board\u{201D}\u{2014}said   so "),
            "the \"board\"-said so"
        );
    }

    #[test]
    fn verbatim_citation_passes() {
        let result = citation(&artifact("Revenue  dropped 12%", 9), SOURCE, 0.9);
        assert!(result.passed, "{result}");
    }

    #[test]
    fn fabricated_excerpt_fails() {
        let result = citation(&artifact("revenue doubled in Q2", 9), SOURCE, 0.9);
        assert!(!result.passed);
    }

    #[test]
    fn empty_excerpt_fails() {
        let result = citation(&artifact("   ", 3), SOURCE, 0.9);
        assert!(!result.passed);
        assert_eq!(result.explanation, "excerpt is empty");
    }

    #[test]
    fn near_verbatim_excerpt_passes_fuzzy_match() {
        let source = "the quick brown fox jumps over the lazy dog near the river bank today";
        let excerpt = "the quick brown fox jumped over the lazy dog near the river bank today";
        let score = best_window_similarity(excerpt, source);
        assert!(score >= 0.9 && score < 1.0, "score {score}");
        assert!(citation(&artifact(excerpt, 3), source, 0.9).passed);
    }

    #[test]
    fn swapped_roles_fail_citation() {
        let source = "Acme acquired Globex in March after lengthy talks";
        assert!(best_window_similarity("Globex acquired Acme", source) < 0.5);
        let result = citation(&artifact("Globex acquired Acme", 9), source, 0.9);
        assert!(!result.passed, "{result}");
        assert!(citation(&artifact("Acme acquired Globex", 9), source, 0.9).passed);
    }

    #[test]
    fn lcs_counts_tokens_in_order_only() {
        let t = |s: &str| tokens(s);
        assert_eq!(lcs_len(&t("a b c d"), &t("a x c d")), 3);
        assert_eq!(lcs_len(&t("c b a"), &t("a b c")), 1);
        assert_eq!(lcs_len(&t(""), &t("a b")), 0);
    }

    #[test]
    fn hedged_high_significance_fails_calibration() {
        let result = confidence_calibration(&artifact("revenue may drop 12%", 9), 8);
        assert!(!result.passed);
        assert!(result.explanation.contains("may"));
    }

    #[test]
    fn definitive_high_significance_passes_calibration() {
        assert!(confidence_calibration(&artifact("revenue dropped 12%", 9), 8).passed);
    }

    #[test]
    fn low_significance_skips_hedge_scan() {
        assert!(confidence_calibration(&artifact("revenue might drop", 4), 8).passed);
    }

    #[test]
    fn hedge_match_is_whole_word() {
        // "mayor" is not "may".
        assert!(confidence_calibration(&artifact("the mayor signed it", 10), 8).passed);
    }

    fn results(citation_ok: bool, calibration_ok: bool, grounding_ok: bool) -> Vec<CheckResult> {
        let mk = |check, ok: bool| CheckResult {
            check,
            passed: ok,
            explanation: String::new(),
        };
        vec![
            mk(CheckName::Citation, citation_ok),
            mk(CheckName::ConfidenceCalibration, calibration_ok),
            mk(CheckName::Grounding, grounding_ok),
        ]
    }

    #[test]
    fn citation_failure_fails_every_strictness_before_last_iteration() {
        let checks = results(false, true, true);
        assert_eq!(aggregate(&checks, Strictness::Lenient, 1, 3), Verdict::Fail);
        assert_eq!(aggregate(&checks, Strictness::Standard, 1, 3), Verdict::Fail);
        // Strict asks for refinement until the final iteration.
        assert_eq!(aggregate(&checks, Strictness::Strict, 1, 3), Verdict::Refine);
        assert_eq!(aggregate(&checks, Strictness::Strict, 3, 3), Verdict::Fail);
    }

    #[test]
    fn standard_refines_on_heuristic_or_model_failure() {
        assert_eq!(
            aggregate(&results(true, false, true), Strictness::Standard, 1, 3),
            Verdict::Refine
        );
        assert_eq!(
            aggregate(&results(true, true, false), Strictness::Standard, 1, 3),
            Verdict::Refine
        );
        assert_eq!(
            aggregate(&results(true, true, true), Strictness::Standard, 1, 3),
            Verdict::Pass
        );
    }

    #[test]
    fn lenient_ignores_non_citation_failures() {
        assert_eq!(
            aggregate(&results(true, false, false), Strictness::Lenient, 1, 3),
            Verdict::Pass
        );
    }
}
