//! The result of one snippet submission.

use serde::{Deserialize, Serialize};

/// Terminal classification of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Execution was attempted; see `status` for success or failure.
    Executed,
    /// Rejected without running: the snippet used up its retries.
    MaxRetriesExceeded,
    /// Rejected without running: the same snippet was resubmitted in a loop.
    LoopDetected,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Classification::Executed => "executed",
            Classification::MaxRetriesExceeded => "max_retries_exceeded",
            Classification::LoopDetected => "loop_detected",
        };
        f.write_str(s)
    }
}

const ESCALATE_HINT: &str = "escalate with a different approach";

/// Outcome returned for every submission. Never mutated after return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// 0 on success, nonzero otherwise.
    pub status: i64,
    /// Snippet output, or a diagnostic when nothing ran.
    pub output: String,
    pub classification: Classification,
    /// The key's attempt count after this submission.
    pub attempts: u32,
    /// Id of the snippet file, present when execution was attempted.
    pub snippet_id: Option<String>,
}

impl ExecutionOutcome {
    /// The snippet ran and its exit status is known.
    pub fn executed(
        snippet_id: impl Into<String>,
        attempts: u32,
        status: i64,
        output: impl Into<String>,
    ) -> Self {
        Self {
            status,
            output: output.into(),
            classification: Classification::Executed,
            attempts,
            snippet_id: Some(snippet_id.into()),
        }
    }

    /// Execution was attempted but the infrastructure failed before an exit
    /// status came back (write, transfer, exec or timeout).
    pub fn infrastructure_failure(
        snippet_id: impl Into<String>,
        attempts: u32,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self {
            status: 1,
            output: diagnostic.into(),
            classification: Classification::Executed,
            attempts,
            snippet_id: Some(snippet_id.into()),
        }
    }

    pub fn max_retries_exceeded(attempts: u32, max_retries: u32) -> Self {
        Self {
            status: 1,
            output: format!(
                "snippet rejected: retry limit reached ({attempts}/{max_retries}); {ESCALATE_HINT}"
            ),
            classification: Classification::MaxRetriesExceeded,
            attempts,
            snippet_id: None,
        }
    }

    pub fn loop_detected(attempts: u32) -> Self {
        Self {
            status: 1,
            output: format!(
                "snippet rejected: loop detected after {attempts} attempts of identical code; \
                 {ESCALATE_HINT}"
            ),
            classification: Classification::LoopDetected,
            attempts,
            snippet_id: None,
        }
    }

    /// Ran and exited 0.
    pub fn is_success(&self) -> bool {
        self.classification == Classification::Executed && self.status == 0
    }

    /// The caller must change strategy rather than resubmit.
    pub fn needs_escalation(&self) -> bool {
        matches!(
            self.classification,
            Classification::MaxRetriesExceeded | Classification::LoopDetected
        )
    }
}
