//! Container runtime abstraction
//!
//! The environment manager never talks to a container engine directly; it
//! goes through [`ContainerRuntime`], which is injected at construction.
//! [`crate::docker::DockerCli`] is the production implementation and
//! [`crate::fakes::FakeRuntime`] the in-memory one used by tests.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A host directory bound into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl BindMount {
    /// Docker `-v` argument form (`host:container:rw`).
    pub fn volume_arg(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{}", self.host.display(), self.container, mode)
    }
}

/// Everything the runtime needs to create and start one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Relative CPU weight (`--cpu-shares`).
    pub cpu_shares: i64,
    /// Memory ceiling in docker notation, e.g. `2g`.
    pub memory_limit: String,
    pub gpu_enabled: bool,
    pub binds: Vec<BindMount>,
    /// Long-running command that keeps the container alive.
    pub command: Vec<String>,
}

/// Raw result of a command run inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    pub exit_code: i64,
    /// Combined stdout followed by stderr, undecoded.
    pub output: Vec<u8>,
}

impl ExecOutput {
    /// Decode the output, replacing invalid UTF-8 with U+FFFD.
    pub fn decoded(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Primitive operations against a container engine.
///
/// Implementations must be safe to share across tasks; the manager holds
/// them as `Arc<dyn ContainerRuntime>`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a detached container. Returns the engine's id for it.
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String>;

    /// Run a command in a running container and wait for it to finish.
    async fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput>;

    /// Extract a tar archive into `dest_dir` inside the container.
    async fn put_archive(&self, container: &str, dest_dir: &str, archive: Vec<u8>) -> Result<()>;

    /// Stop a running container.
    async fn stop(&self, container: &str) -> Result<()>;

    /// Remove a container.
    async fn remove(&self, container: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_arg_modes() {
        let rw = BindMount {
            host: PathBuf::from("/srv/logs"),
            container: "/app/logs".to_string(),
            read_only: false,
        };
        assert_eq!(rw.volume_arg(), "/srv/logs:/app/logs:rw");

        let ro = BindMount {
            read_only: true,
            ..rw
        };
        assert_eq!(ro.volume_arg(), "/srv/logs:/app/logs:ro");
    }

    #[test]
    fn test_decoded_replaces_invalid_utf8() {
        let out = ExecOutput {
            exit_code: 0,
            output: vec![b'o', b'k', 0xff, 0xfe, b'!'],
        };
        let text = out.decoded();
        assert!(text.starts_with("ok"));
        assert!(text.ends_with('!'));
        assert!(text.contains('\u{FFFD}'));
    }
}
