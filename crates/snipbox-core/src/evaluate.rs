//! Heuristic evaluation of snippet results.
//!
//! A result is considered erroneous when its text mentions `error`,
//! `traceback` or `fail` (case-insensitive). Outcomes that were rejected by
//! policy, or that exited nonzero, are never valid.

use serde::{Deserialize, Serialize};

use crate::outcome::ExecutionOutcome;

const ERROR_MARKERS: [&str; 3] = ["error", "traceback", "fail"];

/// Evaluator verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub valid: bool,
    pub message: String,
}

impl Verdict {
    fn valid() -> Self {
        Self {
            valid: true,
            message: "result looks valid".to_string(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

/// Judge raw result text.
pub fn evaluate_output(text: &str) -> Verdict {
    let lowered = text.to_lowercase();
    match ERROR_MARKERS.iter().find(|m| lowered.contains(*m)) {
        Some(marker) => Verdict::invalid(format!(
            "result looks erroneous (mentions '{marker}'); retry or try an alternative approach"
        )),
        None => Verdict::valid(),
    }
}

/// Judge a full outcome.
pub fn evaluate_outcome(outcome: &ExecutionOutcome) -> Verdict {
    if outcome.needs_escalation() {
        return Verdict::invalid(format!(
            "escalation required ({}); submit a different snippet",
            outcome.classification
        ));
    }
    if outcome.status != 0 {
        return Verdict::invalid(format!(
            "snippet exited with status {}; retry or try an alternative approach",
            outcome.status
        ));
    }
    evaluate_output(&outcome.output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_output_is_valid() {
        assert!(evaluate_output("42\n").valid);
    }

    #[test]
    fn test_markers_are_case_insensitive() {
        assert!(!evaluate_output("Traceback (most recent call last):").valid);
        assert!(!evaluate_output("ValueError: bad").valid);
        assert!(!evaluate_output("2 tests FAILED").valid);
    }

    #[test]
    fn test_nonzero_status_is_invalid_even_with_clean_text() {
        let outcome = ExecutionOutcome::executed("abc123", 1, 137, "");
        let verdict = evaluate_outcome(&outcome);
        assert!(!verdict.valid);
        assert!(verdict.message.contains("137"));
    }

    #[test]
    fn test_escalation_is_invalid() {
        let verdict = evaluate_outcome(&ExecutionOutcome::loop_detected(3));
        assert!(!verdict.valid);
        assert!(verdict.message.contains("loop_detected"));
    }

    #[test]
    fn test_successful_outcome_checks_text() {
        assert!(evaluate_outcome(&ExecutionOutcome::executed("abc123", 1, 0, "ok")).valid);
        let flagged = ExecutionOutcome::executed("abc123", 1, 0, "warning: failover");
        assert!(!evaluate_outcome(&flagged).valid);
    }
}
