//! Lifecycle of one isolated execution environment
//!
//! [`EnvironmentManager`] owns exactly one container: it provisions it with
//! resource constraints and a bind-mounted log folder, injects files, runs
//! commands in it and tears it down. It knows nothing about retry policy.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::{pack_file, split_remote_path};
use crate::error::EnvError;
use crate::runtime::{BindMount, ContainerRuntime, ContainerSpec, ExecOutput};
use crate::Result;

/// Fixed in-container path of the host log folder.
pub const LOGS_MOUNT_PATH: &str = "/app/logs";

/// In-container directory where dependency manifests are delivered.
pub const MANIFEST_DIR: &str = "/tmp/requirements";

/// Extra time the in-container kill waits past the host-side timeout.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// Configuration of the environment to provision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub image: String,
    pub cpu_shares: i64,
    pub memory_limit: String,
    pub gpu_enabled: bool,
    pub logs_host_folder: PathBuf,
    pub name_prefix: String,
    /// Program (plus leading args) used to run a transferred file.
    pub interpreter: Vec<String>,
    /// Command prefix used to install a dependency manifest.
    pub install_command: Vec<String>,
    /// Optional bound on a single `execute_file` call.
    pub exec_timeout: Option<Duration>,
}

impl Default for EnvironmentSpec {
    fn default() -> Self {
        Self {
            image: "python:3.10-slim".to_string(),
            cpu_shares: 2,
            memory_limit: "2g".to_string(),
            gpu_enabled: false,
            logs_host_folder: PathBuf::from("./logs"),
            name_prefix: "executor".to_string(),
            interpreter: vec!["python".to_string()],
            install_command: vec!["pip".to_string(), "install".to_string(), "-r".to_string()],
            exec_timeout: None,
        }
    }
}

/// Lifecycle state of the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentState {
    Provisioning,
    Running,
    Stopped,
    Removed,
}

impl fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvironmentState::Provisioning => "provisioning",
            EnvironmentState::Running => "running",
            EnvironmentState::Stopped => "stopped",
            EnvironmentState::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// The live environment owned by a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub name: String,
    /// Engine-assigned id (may be empty for runtimes that do not report one).
    pub id: String,
    pub state: EnvironmentState,
    /// Absolute host path bound at [`LOGS_MOUNT_PATH`].
    pub logs_host_folder: PathBuf,
}

/// Generate a unique environment name: `<prefix>_<6 hex chars>`.
pub fn generate_name(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &hex[..6])
}

/// `timeout -s KILL <limit + grace> <interpreter...> <remote>`.
pub(crate) fn timed_command(interpreter: &[String], remote: &str, limit: Duration) -> Vec<String> {
    let deadline = limit + KILL_GRACE;
    let mut command = vec![
        "timeout".to_string(),
        "-s".to_string(),
        "KILL".to_string(),
        format!("{}s", deadline.as_secs().max(1)),
    ];
    command.extend(interpreter.iter().cloned());
    command.push(remote.to_string());
    command
}

/// Owns one isolated environment and the runtime used to drive it.
pub struct EnvironmentManager {
    runtime: Arc<dyn ContainerRuntime>,
    spec: EnvironmentSpec,
    environment: Environment,
}

impl fmt::Debug for EnvironmentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentManager")
            .field("spec", &self.spec)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

impl EnvironmentManager {
    /// Create and start a new environment running an indefinite keep-alive
    /// process, with the host log folder mounted read-write.
    ///
    /// The host log folder is created if it does not exist.
    pub async fn provision(
        runtime: Arc<dyn ContainerRuntime>,
        spec: EnvironmentSpec,
    ) -> Result<Self> {
        let name = generate_name(&spec.name_prefix);
        let provision_error = |reason: String| EnvError::Provision {
            name: name.clone(),
            reason,
        };

        std::fs::create_dir_all(&spec.logs_host_folder).map_err(|e| {
            provision_error(format!(
                "cannot create log folder {}: {e}",
                spec.logs_host_folder.display()
            ))
        })?;
        let logs_host_folder = spec.logs_host_folder.canonicalize().map_err(|e| {
            provision_error(format!(
                "cannot resolve log folder {}: {e}",
                spec.logs_host_folder.display()
            ))
        })?;

        let mut environment = Environment {
            name: name.clone(),
            id: String::new(),
            state: EnvironmentState::Provisioning,
            logs_host_folder: logs_host_folder.clone(),
        };

        let container = ContainerSpec {
            name: name.clone(),
            image: spec.image.clone(),
            cpu_shares: spec.cpu_shares,
            memory_limit: spec.memory_limit.clone(),
            gpu_enabled: spec.gpu_enabled,
            binds: vec![BindMount {
                host: logs_host_folder,
                container: LOGS_MOUNT_PATH.to_string(),
                read_only: false,
            }],
            command: vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()],
        };

        info!(
            event = "environment.provisioning",
            environment = %name,
            image = %spec.image,
            cpu_shares = spec.cpu_shares,
            memory_limit = %spec.memory_limit,
            gpu_enabled = spec.gpu_enabled,
        );

        environment.id = runtime
            .create_and_start(&container)
            .await
            .map_err(|e| provision_error(e.to_string()))?;
        environment.state = EnvironmentState::Running;

        info!(event = "environment.running", environment = %name, id = %environment.id);

        Ok(Self {
            runtime,
            spec,
            environment,
        })
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn name(&self) -> &str {
        &self.environment.name
    }

    pub fn state(&self) -> EnvironmentState {
        self.environment.state
    }

    pub fn spec(&self) -> &EnvironmentSpec {
        &self.spec
    }

    fn ensure_running(&self) -> Result<()> {
        if self.environment.state != EnvironmentState::Running {
            return Err(EnvError::NotRunning {
                name: self.environment.name.clone(),
                state: self.environment.state.to_string(),
            });
        }
        Ok(())
    }

    /// Run an arbitrary command inside the environment.
    pub async fn exec(&self, command: &[String]) -> Result<ExecOutput> {
        self.ensure_running()?;
        self.runtime
            .exec(&self.environment.name, command)
            .await
            .map_err(|e| EnvError::Exec {
                name: self.environment.name.clone(),
                reason: e.to_string(),
            })
    }

    /// `mkdir -p` inside the environment. Idempotent.
    pub async fn make_dir(&self, dir: &str) -> Result<()> {
        let out = self
            .exec(&["mkdir".to_string(), "-p".to_string(), dir.to_string()])
            .await?;
        if out.exit_code != 0 {
            return Err(EnvError::Exec {
                name: self.environment.name.clone(),
                reason: format!(
                    "mkdir -p {dir} exited {}: {}",
                    out.exit_code,
                    out.decoded().trim()
                ),
            });
        }
        Ok(())
    }

    /// Deliver a local file into the environment at `remote`.
    ///
    /// The file is packed into a tar archive named after `remote`'s file name
    /// and extracted into its parent directory, which is created first.
    pub async fn transfer_file(&self, local: &Path, remote: &str) -> Result<()> {
        let transfer_error = |reason: String| EnvError::Transfer {
            local: local.display().to_string(),
            remote: remote.to_string(),
            reason,
        };

        self.ensure_running().map_err(|e| transfer_error(e.to_string()))?;

        let (dir, file_name) = split_remote_path(remote);
        let archive = pack_file(local, file_name).map_err(|e| transfer_error(e.to_string()))?;

        self.make_dir(dir)
            .await
            .map_err(|e| transfer_error(e.to_string()))?;

        self.runtime
            .put_archive(&self.environment.name, dir, archive)
            .await
            .map_err(|e| transfer_error(e.to_string()))?;

        debug!(
            environment = %self.environment.name,
            local = %local.display(),
            remote,
            "file transferred"
        );
        Ok(())
    }

    /// Run a file with the configured interpreter and return `(exit_code, output)`.
    ///
    /// When the spec carries an `exec_timeout`, an overrunning call fails with
    /// [`EnvError::ExecTimeout`]. The command is also wrapped in the
    /// container's `timeout -s KILL`, so the snippet process is killed inside
    /// the environment shortly after the host stops waiting for it.
    pub async fn execute_file(&self, remote: &str) -> Result<(i64, String)> {
        let out = match self.spec.exec_timeout {
            Some(limit) => {
                let command = timed_command(&self.spec.interpreter, remote, limit);
                tokio::time::timeout(limit, self.exec(&command))
                    .await
                    .map_err(|_| {
                        warn!(
                            environment = %self.environment.name,
                            path = remote,
                            "execution timed out"
                        );
                        EnvError::ExecTimeout {
                            path: remote.to_string(),
                            secs: limit.as_secs(),
                        }
                    })??
            }
            None => {
                let mut command = self.spec.interpreter.clone();
                command.push(remote.to_string());
                self.exec(&command).await?
            }
        };

        Ok((out.exit_code, out.decoded()))
    }

    /// Install a dependency manifest inside the environment.
    ///
    /// Does nothing if `manifest` does not exist locally. A nonzero exit from
    /// the install command is logged, not returned.
    pub async fn install_dependencies(&self, manifest: &Path) -> Result<()> {
        if !manifest.is_file() {
            debug!(manifest = %manifest.display(), "no dependency manifest, skipping install");
            return Ok(());
        }

        let file_name = manifest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "requirements.txt".to_string());
        let remote = format!("{MANIFEST_DIR}/{file_name}");
        self.transfer_file(manifest, &remote).await?;

        let mut command = self.spec.install_command.clone();
        command.push(remote);

        info!(
            event = "environment.install",
            environment = %self.environment.name,
            manifest = %manifest.display()
        );
        let out = self.exec(&command).await?;
        if out.exit_code != 0 {
            warn!(
                environment = %self.environment.name,
                exit_code = out.exit_code,
                output = %out.decoded(),
                "dependency install failed"
            );
        }
        Ok(())
    }

    /// Stop and remove the environment.
    ///
    /// Stop and remove are attempted independently; failures are logged and
    /// swallowed. Calling this again after removal is a no-op.
    pub async fn teardown(&mut self) {
        if self.environment.state == EnvironmentState::Removed {
            return;
        }
        let name = self.environment.name.clone();

        if self.environment.state == EnvironmentState::Running {
            match self.runtime.stop(&name).await {
                Ok(()) => self.environment.state = EnvironmentState::Stopped,
                Err(e) => warn!(environment = %name, error = %e, "error stopping environment"),
            }
        }

        match self.runtime.remove(&name).await {
            Ok(()) => {
                self.environment.state = EnvironmentState::Removed;
                info!(event = "environment.removed", environment = %name);
            }
            Err(e) => warn!(environment = %name, error = %e, "error removing environment"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeRuntime, RuntimeCall};
    use tempfile::tempdir;

    fn spec_in(dir: &Path) -> EnvironmentSpec {
        EnvironmentSpec {
            logs_host_folder: dir.join("logs"),
            ..EnvironmentSpec::default()
        }
    }

    #[test]
    fn test_generate_name_shape() {
        let name = generate_name("executor");
        let (prefix, suffix) = name.split_once('_').unwrap();
        assert_eq!(prefix, "executor");
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_name("executor"), generate_name("executor"));
    }

    #[tokio::test]
    async fn test_provision_creates_log_folder_and_mounts_it() {
        let dir = tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let manager = EnvironmentManager::provision(runtime.clone(), spec_in(dir.path()))
            .await
            .unwrap();

        assert_eq!(manager.state(), EnvironmentState::Running);
        assert!(dir.path().join("logs").is_dir());

        let created = runtime.last_spec().unwrap();
        assert_eq!(created.name, manager.name());
        assert_eq!(created.binds.len(), 1);
        assert_eq!(created.binds[0].container, LOGS_MOUNT_PATH);
        assert!(!created.binds[0].read_only);
        assert!(created.binds[0].host.is_absolute());
        assert_eq!(created.command, vec!["tail", "-f", "/dev/null"]);
    }

    #[tokio::test]
    async fn test_provision_failure_is_provision_error() {
        let dir = tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new().failing_provision("pull access denied"));
        let err = EnvironmentManager::provision(runtime, spec_in(dir.path()))
            .await
            .unwrap_err();

        match err {
            EnvError::Provision { reason, .. } => assert!(reason.contains("pull access denied")),
            other => panic!("expected Provision, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transfer_creates_parent_then_puts_archive() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("local.py");
        std::fs::write(&local, b"print(42)").unwrap();

        let runtime = Arc::new(FakeRuntime::new());
        let manager = EnvironmentManager::provision(runtime.clone(), spec_in(dir.path()))
            .await
            .unwrap();
        manager
            .transfer_file(&local, "/tmp/snippets/snippet_x.py")
            .await
            .unwrap();

        let calls = runtime.calls();
        let mkdir = calls
            .iter()
            .position(|c| matches!(c, RuntimeCall::Exec { command, .. } if command[0] == "mkdir"))
            .unwrap();
        let put = calls
            .iter()
            .position(|c| matches!(c, RuntimeCall::PutArchive { .. }))
            .unwrap();
        assert!(mkdir < put);
        assert_eq!(
            runtime.file("/tmp/snippets/snippet_x.py").unwrap(),
            b"print(42)"
        );
    }

    #[tokio::test]
    async fn test_transfer_failure_is_transfer_error() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("local.py");
        std::fs::write(&local, b"print(42)").unwrap();

        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_fail_transfer(true);
        let manager = EnvironmentManager::provision(runtime, spec_in(dir.path()))
            .await
            .unwrap();

        let err = manager
            .transfer_file(&local, "/tmp/snippets/a.py")
            .await
            .unwrap_err();
        assert!(matches!(err, EnvError::Transfer { .. }));
    }

    #[tokio::test]
    async fn test_execute_file_returns_exit_and_output() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("local.py");
        std::fs::write(&local, b"raise SystemExit(3)").unwrap();

        let runtime = Arc::new(FakeRuntime::new());
        runtime.push_result(3, b"boom\xff");
        let manager = EnvironmentManager::provision(runtime.clone(), spec_in(dir.path()))
            .await
            .unwrap();
        manager.transfer_file(&local, "/tmp/a.py").await.unwrap();

        let (code, output) = manager.execute_file("/tmp/a.py").await.unwrap();
        assert_eq!(code, 3);
        assert!(output.starts_with("boom"));
        assert!(output.contains('\u{FFFD}'));
        assert_eq!(runtime.executed_files(), vec!["/tmp/a.py".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_file_timeout() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("local.py");
        std::fs::write(&local, b"while True: pass").unwrap();

        let runtime = Arc::new(FakeRuntime::new().with_exec_delay(Duration::from_secs(60)));
        let spec = EnvironmentSpec {
            exec_timeout: Some(Duration::from_secs(5)),
            ..spec_in(dir.path())
        };
        let manager = EnvironmentManager::provision(runtime, spec).await.unwrap();
        manager.transfer_file(&local, "/tmp/spin.py").await.unwrap();

        let err = manager.execute_file("/tmp/spin.py").await.unwrap_err();
        assert!(matches!(err, EnvError::ExecTimeout { secs: 5, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_execution_is_killed_inside_environment() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("local.py");
        std::fs::write(&local, b"while True: pass").unwrap();

        let runtime = Arc::new(FakeRuntime::new().with_exec_delay(Duration::from_secs(60)));
        let spec = EnvironmentSpec {
            exec_timeout: Some(Duration::from_secs(5)),
            ..spec_in(dir.path())
        };
        let manager = EnvironmentManager::provision(runtime.clone(), spec)
            .await
            .unwrap();
        manager.transfer_file(&local, "/tmp/spin.py").await.unwrap();
        manager.execute_file("/tmp/spin.py").await.unwrap_err();

        let command = runtime
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                RuntimeCall::Exec { command, .. } if command[0] != "mkdir" => Some(command),
                _ => None,
            })
            .last()
            .unwrap();
        assert_eq!(
            command,
            vec!["timeout", "-s", "KILL", "7s", "python", "/tmp/spin.py"]
        );
    }

    #[tokio::test]
    async fn test_untimed_execution_is_not_wrapped() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("local.py");
        std::fs::write(&local, b"print(1)").unwrap();

        let runtime = Arc::new(FakeRuntime::new());
        let manager = EnvironmentManager::provision(runtime.clone(), spec_in(dir.path()))
            .await
            .unwrap();
        manager.transfer_file(&local, "/tmp/ok.py").await.unwrap();
        manager.execute_file("/tmp/ok.py").await.unwrap();

        let last = runtime.calls().into_iter().last().unwrap();
        assert!(matches!(
            last,
            RuntimeCall::Exec { command, .. } if command == vec!["python", "/tmp/ok.py"]
        ));
    }

    #[tokio::test]
    async fn test_install_dependencies_missing_manifest_is_noop() {
        let dir = tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let manager = EnvironmentManager::provision(runtime.clone(), spec_in(dir.path()))
            .await
            .unwrap();
        let before = runtime.calls().len();

        manager
            .install_dependencies(&dir.path().join("requirements.txt"))
            .await
            .unwrap();
        assert_eq!(runtime.calls().len(), before);
    }

    #[tokio::test]
    async fn test_install_dependencies_failure_is_logged_not_raised() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("requirements.txt");
        std::fs::write(&manifest, b"numpy==1.26\n").unwrap();

        let runtime = Arc::new(FakeRuntime::new());
        runtime.push_result(1, b"ERROR: no matching distribution");
        let manager = EnvironmentManager::provision(runtime.clone(), spec_in(dir.path()))
            .await
            .unwrap();

        manager.install_dependencies(&manifest).await.unwrap();

        let installed = runtime.calls().into_iter().any(|c| match c {
            RuntimeCall::Exec { command, .. } => {
                command[..3] == ["pip", "install", "-r"]
                    && command[3] == "/tmp/requirements/requirements.txt"
            }
            _ => false,
        });
        assert!(installed);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let dir = tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let mut manager = EnvironmentManager::provision(runtime.clone(), spec_in(dir.path()))
            .await
            .unwrap();

        manager.teardown().await;
        assert_eq!(manager.state(), EnvironmentState::Removed);
        manager.teardown().await;

        let stops = runtime
            .calls()
            .iter()
            .filter(|c| matches!(c, RuntimeCall::Stop { .. }))
            .count();
        assert_eq!(stops, 1);
    }

    #[tokio::test]
    async fn test_teardown_removes_even_if_stop_fails() {
        let dir = tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_fail_stop(true);
        let mut manager = EnvironmentManager::provision(runtime.clone(), spec_in(dir.path()))
            .await
            .unwrap();

        manager.teardown().await;

        assert!(runtime
            .calls()
            .iter()
            .any(|c| matches!(c, RuntimeCall::Remove { .. })));
        assert_eq!(manager.state(), EnvironmentState::Removed);
    }

    #[tokio::test]
    async fn test_operations_after_teardown_fail() {
        let dir = tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let mut manager = EnvironmentManager::provision(runtime, spec_in(dir.path()))
            .await
            .unwrap();
        manager.teardown().await;

        let err = manager.execute_file("/tmp/a.py").await.unwrap_err();
        assert!(matches!(err, EnvError::NotRunning { .. }));
    }
}
