//! Error taxonomy for snipbox-core.

use snipbox_env::EnvError;

/// Configuration errors, raised at construction time only.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("missing required config field: {0}")]
    MissingField(String),

    #[error("malformed config: {0}")]
    Parse(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors that abort the whole subsystem.
///
/// Per-snippet infrastructure failures never surface here; they are folded
/// into the returned `ExecutionOutcome`.
#[derive(Debug, thiserror::Error)]
pub enum SnipboxError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("environment provisioning failed: {0}")]
    Provision(#[from] EnvError),
}

/// Result type for snipbox-core operations.
pub type Result<T> = std::result::Result<T, SnipboxError>;
