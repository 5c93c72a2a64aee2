//! Docker runtime driven through the `docker` CLI.

use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::EnvError;
use crate::runtime::{ContainerRuntime, ContainerSpec, ExecOutput};
use crate::Result;

/// [`ContainerRuntime`] backed by the local `docker` binary.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    /// Use a different CLI binary with a docker-compatible interface (e.g. `podman`).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn output(&self, args: &[String]) -> Result<Output> {
        debug!(binary = %self.binary, ?args, "running container cli");
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EnvError::Runtime(format!("failed to spawn {}: {e}", self.binary)))
    }

    async fn checked(&self, args: &[String]) -> Result<Output> {
        let output = self.output(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EnvError::Runtime(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().map(String::as_str).unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(output)
    }
}

/// Arguments for `docker run` that create and start the container.
pub(crate) fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "-t".to_string(),
        "-i".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--cpu-shares".to_string(),
        spec.cpu_shares.to_string(),
        "--memory".to_string(),
        spec.memory_limit.clone(),
    ];

    if spec.gpu_enabled {
        args.extend(["--gpus".to_string(), "all".to_string()]);
    }

    for bind in &spec.binds {
        args.extend(["-v".to_string(), bind.volume_arg()]);
    }

    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        let output = self.checked(&run_args(spec)).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput> {
        let mut args = vec!["exec".to_string(), container.to_string()];
        args.extend(command.iter().cloned());

        let output = self.output(&args).await?;
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);

        Ok(ExecOutput {
            exit_code: output.status.code().map(i64::from).unwrap_or(-1),
            output: combined,
        })
    }

    async fn put_archive(&self, container: &str, dest_dir: &str, archive: Vec<u8>) -> Result<()> {
        let target = format!("{container}:{dest_dir}");
        let mut child = Command::new(&self.binary)
            .args(["cp", "-", target.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EnvError::Runtime(format!("failed to spawn {}: {e}", self.binary)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&archive).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EnvError::Runtime(format!(
                "{} cp failed: {}",
                self.binary,
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn stop(&self, container: &str) -> Result<()> {
        self.checked(&["stop".to_string(), container.to_string()])
            .await
            .map(|_| ())
    }

    async fn remove(&self, container: &str) -> Result<()> {
        self.checked(&["rm".to_string(), "-f".to_string(), container.to_string()])
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::BindMount;
    use std::path::PathBuf;

    fn spec(gpu_enabled: bool) -> ContainerSpec {
        ContainerSpec {
            name: "executor_a1b2c3".to_string(),
            image: "python:3.10-slim".to_string(),
            cpu_shares: 512,
            memory_limit: "2g".to_string(),
            gpu_enabled,
            binds: vec![BindMount {
                host: PathBuf::from("/var/snipbox/logs"),
                container: "/app/logs".to_string(),
                read_only: false,
            }],
            command: vec!["tail".into(), "-f".into(), "/dev/null".into()],
        }
    }

    #[test]
    fn test_run_args_resource_flags() {
        let args = run_args(&spec(false));
        let joined = args.join(" ");

        assert!(joined.starts_with("run -d -t -i --name executor_a1b2c3"));
        assert!(joined.contains("--cpu-shares 512"));
        assert!(joined.contains("--memory 2g"));
        assert!(joined.contains("-v /var/snipbox/logs:/app/logs:rw"));
        assert!(joined.ends_with("python:3.10-slim tail -f /dev/null"));
        assert!(!args.contains(&"--gpus".to_string()));
    }

    #[test]
    fn test_run_args_requests_gpus() {
        let args = run_args(&spec(true));
        let pos = args.iter().position(|a| a == "--gpus").unwrap();
        assert_eq!(args[pos + 1], "all");
    }

    #[tokio::test]
    async fn test_missing_binary_is_runtime_error() {
        let cli = DockerCli::with_binary("snipbox-definitely-not-a-binary");
        let err = cli.stop("whatever").await.unwrap_err();
        assert!(matches!(err, EnvError::Runtime(_)));
    }
}
