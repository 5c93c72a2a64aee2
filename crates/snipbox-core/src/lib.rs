//! Snipbox Core Library
//!
//! Runs untrusted code snippets in an isolated container and keeps a
//! calling agent out of infinite error cycles: every distinct snippet gets
//! a bounded number of attempts, and consecutive identical resubmissions
//! are flagged as a loop. Both cases come back as escalation outcomes
//! instead of being executed.
//!
//! # Modules
//!
//! - [`orchestrator`]: `Orchestrator::submit()` / `teardown()`
//! - [`ledger`]      : `AttemptLedger` retry ceiling + loop detection
//! - [`outcome`]     : `ExecutionOutcome`, `Classification`
//! - [`config`]      : `ExecutorConfig` (TOML, validated at load)
//! - [`evaluate`]    : heuristic result verdicts
//! - [`docs`]        : local documentation search
//! - [`obs`] / [`telemetry`]: structured events and subscriber setup

pub mod config;
pub mod docs;
mod error;
pub mod evaluate;
pub mod ledger;
pub mod obs;
pub mod orchestrator;
pub mod outcome;
pub mod telemetry;

pub use config::{AgentConfigFile, ExecutorConfig, ResourceConfig};
pub use docs::{search_docs, DocMatch, DocSearchError, DEFAULT_MAX_RESULTS};
pub use error::{ConfigError, Result, SnipboxError};
pub use evaluate::{evaluate_outcome, evaluate_output, Verdict};
pub use ledger::{AttemptLedger, Decision};
pub use obs::snippet_digest;
pub use orchestrator::{Orchestrator, SNIPPETS_DIR};
pub use outcome::{Classification, ExecutionOutcome};
pub use telemetry::{init_dual_sink, init_tracing, parse_level};

pub use snipbox_env::{
    ContainerRuntime, DockerCli, EnvError, Environment, EnvironmentState, LOGS_MOUNT_PATH,
};
