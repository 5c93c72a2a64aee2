//! Error types for snipbox-env

use thiserror::Error;

/// Errors that can occur while managing an isolation environment
#[derive(Error, Debug)]
pub enum EnvError {
    /// The environment could not be created or started
    #[error("failed to provision environment {name}: {reason}")]
    Provision { name: String, reason: String },

    /// A file could not be delivered into the environment
    #[error("failed to transfer {local} to {remote}: {reason}")]
    Transfer {
        local: String,
        remote: String,
        reason: String,
    },

    /// A command could not be run inside the environment
    #[error("command failed in environment {name}: {reason}")]
    Exec { name: String, reason: String },

    /// A bounded execution exceeded its time limit
    #[error("execution of {path} timed out after {secs}s")]
    ExecTimeout { path: String, secs: u64 },

    /// The environment is not in the `Running` state
    #[error("environment {name} is not running (state: {state})")]
    NotRunning { name: String, state: String },

    /// The container runtime reported a failure
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
