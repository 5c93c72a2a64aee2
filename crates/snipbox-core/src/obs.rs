//! Structured observability hooks for snippet submissions.
//!
//! Snippets are identified in logs by a short SHA-256 digest of their key,
//! never by their raw text. Output of executed snippets is logged at
//! `debug!` only.

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::outcome::Classification;

/// Short (12 hex chars) SHA-256 digest of a snippet key.
pub fn snippet_digest(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let hash = hex::encode(hasher.finalize());
    hash[..12].to_string()
}

/// Emit event: orchestrator ready with its environment.
pub fn emit_orchestrator_ready(environment: &str, max_retries: u32, loop_threshold: u32) {
    info!(
        event = "orchestrator.ready",
        environment = %environment,
        max_retries = max_retries,
        loop_threshold = loop_threshold,
    );
}

/// Emit event: submission rejected by policy (warn level).
pub fn emit_snippet_rejected(digest: &str, classification: Classification, attempts: u32) {
    warn!(
        event = "snippet.rejected",
        snippet = %digest,
        classification = %classification,
        attempts = attempts,
        "snippet rejected, escalation required"
    );
}

/// Emit event: snippet ran; OK and ERR are distinguished by exit code.
pub fn emit_snippet_executed(
    snippet_id: &str,
    digest: &str,
    attempt: u32,
    exit_code: i64,
    output: &str,
) {
    if exit_code == 0 {
        debug!(
            event = "snippet.ok",
            snippet_id = %snippet_id,
            snippet = %digest,
            attempt = attempt,
            output = %output,
            "[snippet {snippet_id} OK]"
        );
    } else {
        debug!(
            event = "snippet.err",
            snippet_id = %snippet_id,
            snippet = %digest,
            attempt = attempt,
            exit_code = exit_code,
            output = %output,
            "[snippet {snippet_id} ERR]"
        );
    }
}

/// Emit event: infrastructure failure during a submission (warn level).
pub fn emit_snippet_infrastructure_failure(
    snippet_id: &str,
    digest: &str,
    attempt: u32,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "snippet.infrastructure_failure",
        snippet_id = %snippet_id,
        snippet = %digest,
        attempt = attempt,
        error = %error,
    );
}
