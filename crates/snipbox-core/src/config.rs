//! Typed executor configuration.
//!
//! Config files are TOML with everything under an `[agent]` table:
//!
//! ```toml
//! [agent]
//! logs_folder = "./logs"
//! max_snippet_retries = 3
//! loop_detection_count = 2
//!
//! [agent.docker_resources]
//! cpu_shares = 512
//! memory_limit = "2g"
//! gpu_enabled = false
//! ```
//!
//! Missing required fields and out-of-range values are rejected when the
//! config is loaded, not on first use.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use snipbox_env::EnvironmentSpec;

use crate::error::ConfigError;

/// Container resource limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Relative CPU weight.
    pub cpu_shares: i64,
    /// Memory ceiling, docker notation (`512m`, `2g`).
    pub memory_limit: String,
    pub gpu_enabled: bool,
}

/// Everything the orchestrator needs at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Host folder bind-mounted into the environment and used for log files.
    pub logs_folder: PathBuf,
    /// Level for the full-verbosity log file.
    #[serde(default = "default_external_log_level")]
    pub external_log_level: String,
    /// Level for console output.
    #[serde(default = "default_container_log_level")]
    pub container_log_level: String,
    /// Attempts allowed per distinct snippet.
    pub max_snippet_retries: u32,
    /// Consecutive identical attempts before a loop is declared.
    pub loop_detection_count: u32,
    pub docker_resources: ResourceConfig,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_container_name_prefix")]
    pub container_name_prefix: String,
    #[serde(default = "default_interpreter")]
    pub interpreter: Vec<String>,
    /// File extension for snippet files.
    #[serde(default = "default_snippet_extension")]
    pub snippet_extension: String,
    #[serde(default = "default_install_command")]
    pub install_command: Vec<String>,
    /// Dependency manifest installed right after provisioning.
    pub requirements_path: Option<PathBuf>,
    /// Where local snippet files are written (defaults to the OS temp dir).
    pub scratch_dir: Option<PathBuf>,
    /// Optional bound on a single snippet run.
    pub exec_timeout_secs: Option<u64>,
    /// Optional LRU bound on tracked snippet keys.
    pub max_tracked_snippets: Option<usize>,
}

fn default_external_log_level() -> String {
    "DEBUG".to_string()
}

fn default_container_log_level() -> String {
    "INFO".to_string()
}

fn default_image() -> String {
    "python:3.10-slim".to_string()
}

fn default_container_name_prefix() -> String {
    "executor".to_string()
}

fn default_interpreter() -> Vec<String> {
    vec!["python".to_string()]
}

fn default_snippet_extension() -> String {
    "py".to_string()
}

fn default_install_command() -> Vec<String> {
    vec!["pip".to_string(), "install".to_string(), "-r".to_string()]
}

/// On-disk layout: the executor config lives under `[agent]`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfigFile {
    pub agent: ExecutorConfig,
}

static MEMORY_LIMIT: OnceLock<Option<Regex>> = OnceLock::new();
static MISSING_FIELD: OnceLock<Option<Regex>> = OnceLock::new();

fn is_valid_memory_limit(limit: &str) -> bool {
    MEMORY_LIMIT
        .get_or_init(|| Regex::new(r"(?i)^\d+[bkmg]?$").ok())
        .as_ref()
        .map(|re| re.is_match(limit))
        .unwrap_or(false)
}

/// Pull the field name out of serde's "missing field `x`" message.
fn missing_field(message: &str) -> Option<String> {
    let re = MISSING_FIELD
        .get_or_init(|| Regex::new(r"missing field `([^`]+)`").ok())
        .as_ref()?;
    re.captures(message).map(|caps| caps[1].to_string())
}

impl ExecutorConfig {
    /// Minimal config with defaults for every optional setting.
    pub fn new(
        logs_folder: impl Into<PathBuf>,
        max_snippet_retries: u32,
        loop_detection_count: u32,
        docker_resources: ResourceConfig,
    ) -> Self {
        Self {
            logs_folder: logs_folder.into(),
            external_log_level: default_external_log_level(),
            container_log_level: default_container_log_level(),
            max_snippet_retries,
            loop_detection_count,
            docker_resources,
            image: default_image(),
            container_name_prefix: default_container_name_prefix(),
            interpreter: default_interpreter(),
            snippet_extension: default_snippet_extension(),
            install_command: default_install_command(),
            requirements_path: None,
            scratch_dir: None,
            exec_timeout_secs: None,
            max_tracked_snippets: None,
        }
    }

    /// Parse and validate a config file's contents.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: AgentConfigFile = toml::from_str(contents).map_err(|e| {
            let message = e.to_string();
            match missing_field(&message) {
                Some(field) => ConfigError::MissingField(field),
                None => ConfigError::Parse(message),
            }
        })?;
        file.agent.validate()?;
        Ok(file.agent)
    }

    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_snippet_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "max_snippet_retries",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.loop_detection_count == 0 {
            return Err(ConfigError::Invalid {
                field: "loop_detection_count",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.docker_resources.cpu_shares <= 0 {
            return Err(ConfigError::Invalid {
                field: "docker_resources.cpu_shares",
                reason: format!("must be positive, got {}", self.docker_resources.cpu_shares),
            });
        }
        if !is_valid_memory_limit(&self.docker_resources.memory_limit) {
            return Err(ConfigError::Invalid {
                field: "docker_resources.memory_limit",
                reason: format!(
                    "expected a size like 512m or 2g, got {:?}",
                    self.docker_resources.memory_limit
                ),
            });
        }
        if self.interpreter.is_empty() {
            return Err(ConfigError::Invalid {
                field: "interpreter",
                reason: "must name a program".to_string(),
            });
        }
        if self.install_command.is_empty() {
            return Err(ConfigError::Invalid {
                field: "install_command",
                reason: "must name a program".to_string(),
            });
        }
        if self.exec_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid {
                field: "exec_timeout_secs",
                reason: "must be positive when set".to_string(),
            });
        }
        if self.max_tracked_snippets == Some(0) {
            return Err(ConfigError::Invalid {
                field: "max_tracked_snippets",
                reason: "must be positive when set".to_string(),
            });
        }
        Ok(())
    }

    /// Environment spec handed to the isolation layer.
    pub fn environment_spec(&self) -> EnvironmentSpec {
        EnvironmentSpec {
            image: self.image.clone(),
            cpu_shares: self.docker_resources.cpu_shares,
            memory_limit: self.docker_resources.memory_limit.clone(),
            gpu_enabled: self.docker_resources.gpu_enabled,
            logs_host_folder: self.logs_folder.clone(),
            name_prefix: self.container_name_prefix.clone(),
            interpreter: self.interpreter.clone(),
            install_command: self.install_command.clone(),
            exec_timeout: self.exec_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Directory for local snippet files.
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
