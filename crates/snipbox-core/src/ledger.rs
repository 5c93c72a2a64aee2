//! Per-snippet attempt bookkeeping and the retry / loop-detection policy.
//!
//! Snippets are keyed by their whitespace-trimmed text, so two textually
//! identical submissions share one attempt counter no matter when they
//! arrive. Loop detection compares each submission against the one
//! immediately before it, untrimmed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What the policy decided for one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Run it. `attempt` is the key's count including this run.
    Execute { attempt: u32 },
    /// The key already used up its retries.
    MaxRetriesExceeded { attempts: u32 },
    /// Same text as the previous submission and the loop threshold is reached.
    LoopDetected { attempts: u32 },
}

impl Decision {
    pub fn is_execute(&self) -> bool {
        matches!(self, Decision::Execute { .. })
    }
}

#[derive(Debug, Clone)]
struct AttemptRecord {
    attempts: u32,
    last_used: u64,
}

/// Attempt counts per snippet key plus the previous submission.
///
/// Counts only increase. With a tracking bound set, the least recently
/// submitted key is forgotten once the bound is exceeded; without one
/// (the default) nothing is ever evicted.
#[derive(Debug, Clone)]
pub struct AttemptLedger {
    max_retries: u32,
    loop_threshold: u32,
    max_tracked: Option<usize>,
    records: HashMap<String, AttemptRecord>,
    last_snippet: Option<String>,
    clock: u64,
}

impl AttemptLedger {
    pub fn new(max_retries: u32, loop_threshold: u32) -> Self {
        Self {
            max_retries,
            loop_threshold,
            max_tracked: None,
            records: HashMap::new(),
            last_snippet: None,
            clock: 0,
        }
    }

    /// Bound the number of tracked keys (least recently used evicted first).
    pub fn with_max_tracked(mut self, max_tracked: Option<usize>) -> Self {
        self.max_tracked = max_tracked;
        self
    }

    /// Identity key of a snippet.
    pub fn key(code: &str) -> &str {
        code.trim()
    }

    /// Attempts recorded so far for `code`'s key.
    pub fn attempts(&self, code: &str) -> u32 {
        self.records
            .get(Self::key(code))
            .map(|r| r.attempts)
            .unwrap_or(0)
    }

    /// Number of distinct keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.records.len()
    }

    pub fn last_snippet(&self) -> Option<&str> {
        self.last_snippet.as_deref()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn loop_threshold(&self) -> u32 {
        self.loop_threshold
    }

    /// Evaluate the policy without changing any state.
    ///
    /// The retry ceiling is checked before loop detection.
    pub fn decide(&self, code: &str) -> Decision {
        let attempts = self.attempts(code);

        if attempts >= self.max_retries {
            return Decision::MaxRetriesExceeded { attempts };
        }
        if self.last_snippet.as_deref() == Some(code) && attempts >= self.loop_threshold {
            return Decision::LoopDetected { attempts };
        }
        Decision::Execute {
            attempt: attempts + 1,
        }
    }

    /// Evaluate the policy and record the submission.
    ///
    /// The previous-submission slot is always updated; the attempt count is
    /// incremented only when the decision is to execute.
    pub fn submit(&mut self, code: &str) -> Decision {
        let decision = self.decide(code);
        self.last_snippet = Some(code.to_string());

        if decision.is_execute() {
            self.clock += 1;
            let now = self.clock;
            let record = self
                .records
                .entry(Self::key(code).to_string())
                .or_insert(AttemptRecord {
                    attempts: 0,
                    last_used: now,
                });
            record.attempts += 1;
            record.last_used = now;
            self.evict();
        }
        decision
    }

    fn evict(&mut self) {
        let Some(limit) = self.max_tracked else {
            return;
        };
        while self.records.len() > limit {
            let oldest = self
                .records
                .iter()
                .min_by_key(|(_, r)| r.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    self.records.remove(&key);
                }
                None => break,
            }
        }
    }
}
