//! Snippet execution orchestrator.
//!
//! Turns each submitted snippet into exactly one [`ExecutionOutcome`],
//! enforcing the retry ceiling and loop detection of [`AttemptLedger`]
//! before anything reaches the environment.
//!
//! | Condition                                            | Result              |
//! |------------------------------------------------------|---------------------|
//! | attempts >= max retries                              | `MaxRetriesExceeded`|
//! | same text as previous AND attempts >= loop threshold | `LoopDetected`      |
//! | otherwise                                            | run, `Executed`     |
//!
//! `submit` takes `&mut self`, so one submission runs to completion before
//! the next starts. Callers sharing an orchestrator between tasks must wrap
//! it in a `tokio::sync::Mutex`.

use std::path::PathBuf;
use std::sync::Arc;

use snipbox_env::{ContainerRuntime, EnvError, Environment, EnvironmentManager};
use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::error::Result;
use crate::ledger::{AttemptLedger, Decision};
use crate::obs::{
    emit_orchestrator_ready, emit_snippet_executed, emit_snippet_infrastructure_failure,
    emit_snippet_rejected, snippet_digest,
};
use crate::outcome::{Classification, ExecutionOutcome};

/// In-environment directory that receives snippet files.
pub const SNIPPETS_DIR: &str = "/tmp/snippets";

/// Why a permitted run produced no exit status.
#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error("could not write snippet to {path}: {source}")]
    LocalWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Environment(#[from] EnvError),
}

/// Owns the environment manager and the attempt ledger for one session.
#[derive(Debug)]
pub struct Orchestrator {
    manager: EnvironmentManager,
    ledger: AttemptLedger,
    scratch_dir: PathBuf,
    snippet_extension: String,
    span: Span,
}

impl Orchestrator {
    /// Validate the config and eagerly provision the environment.
    ///
    /// If a dependency manifest is configured it is installed right away;
    /// a failed install is logged and does not abort construction.
    pub async fn new(config: ExecutorConfig, runtime: Arc<dyn ContainerRuntime>) -> Result<Self> {
        config.validate()?;

        let manager = EnvironmentManager::provision(runtime, config.environment_spec()).await?;
        let span = info_span!("snipbox.executor", environment = %manager.name());

        if let Some(manifest) = &config.requirements_path {
            info!(parent: &span, manifest = %manifest.display(), "installing project requirements");
            if let Err(e) = manager
                .install_dependencies(manifest)
                .instrument(span.clone())
                .await
            {
                warn!(parent: &span, error = %e, "could not install project requirements");
            }
        }

        let ledger = AttemptLedger::new(config.max_snippet_retries, config.loop_detection_count)
            .with_max_tracked(config.max_tracked_snippets);

        span.in_scope(|| {
            emit_orchestrator_ready(
                manager.name(),
                config.max_snippet_retries,
                config.loop_detection_count,
            )
        });

        Ok(Self {
            manager,
            ledger,
            scratch_dir: config.scratch_dir(),
            snippet_extension: config.snippet_extension.clone(),
            span,
        })
    }

    /// Replace the logging span all operations run under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn environment(&self) -> &Environment {
        self.manager.environment()
    }

    pub fn ledger(&self) -> &AttemptLedger {
        &self.ledger
    }

    /// Submit one snippet.
    ///
    /// Never fails: policy rejections and infrastructure failures are both
    /// reported through the returned outcome.
    pub async fn submit(&mut self, code: &str) -> ExecutionOutcome {
        let span = self.span.clone();
        self.submit_inner(code).instrument(span).await
    }

    async fn submit_inner(&mut self, code: &str) -> ExecutionOutcome {
        let digest = snippet_digest(AttemptLedger::key(code));

        let attempt = match self.ledger.submit(code) {
            Decision::MaxRetriesExceeded { attempts } => {
                emit_snippet_rejected(&digest, Classification::MaxRetriesExceeded, attempts);
                return ExecutionOutcome::max_retries_exceeded(attempts, self.ledger.max_retries());
            }
            Decision::LoopDetected { attempts } => {
                emit_snippet_rejected(&digest, Classification::LoopDetected, attempts);
                return ExecutionOutcome::loop_detected(attempts);
            }
            Decision::Execute { attempt } => attempt,
        };

        let snippet_id = Uuid::new_v4().simple().to_string()[..6].to_string();

        match self.run_snippet(&snippet_id, code).await {
            Ok((exit_code, output)) => {
                emit_snippet_executed(&snippet_id, &digest, attempt, exit_code, &output);
                ExecutionOutcome::executed(snippet_id, attempt, exit_code, output)
            }
            Err(e) => {
                emit_snippet_infrastructure_failure(&snippet_id, &digest, attempt, &e);
                ExecutionOutcome::infrastructure_failure(
                    snippet_id,
                    attempt,
                    format!("snippet could not be executed: {e}"),
                )
            }
        }
    }

    /// Write the snippet locally, transfer it and run it.
    async fn run_snippet(
        &self,
        snippet_id: &str,
        code: &str,
    ) -> std::result::Result<(i64, String), RunError> {
        let file_name = format!("snippet_{snippet_id}.{}", self.snippet_extension);
        let local = self.scratch_dir.join(&file_name);

        std::fs::create_dir_all(&self.scratch_dir)
            .and_then(|_| std::fs::write(&local, code))
            .map_err(|source| RunError::LocalWrite {
                path: local.display().to_string(),
                source,
            })?;

        let remote = format!("{SNIPPETS_DIR}/{file_name}");
        self.manager.transfer_file(&local, &remote).await?;
        Ok(self.manager.execute_file(&remote).await?)
    }

    /// Stop and remove the environment. Safe to call more than once.
    pub async fn teardown(&mut self) {
        let span = self.span.clone();
        async {
            info!("orchestrator shutting down, removing environment");
            self.manager.teardown().await;
        }
        .instrument(span)
        .await
    }
}
