//! In-memory container runtime (testing only)
//!
//! `FakeRuntime` satisfies the [`ContainerRuntime`] contract without a
//! container engine. It records every call, keeps transferred files in a
//! map, answers commands from a script, and can be told to fail any
//! lifecycle step.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::archive::unpack_entries;
use crate::error::EnvError;
use crate::runtime::{ContainerRuntime, ContainerSpec, ExecOutput};
use crate::Result;

/// One recorded runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    CreateAndStart { name: String },
    Exec { container: String, command: Vec<String> },
    PutArchive { container: String, dest_dir: String, entries: Vec<String> },
    Stop { container: String },
    Remove { container: String },
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<RuntimeCall>,
    files: HashMap<String, Vec<u8>>,
    scripted: VecDeque<ExecOutput>,
    default_result: ExecOutput,
    last_spec: Option<ContainerSpec>,
    fail_provision: Option<String>,
    fail_transfer: bool,
    fail_stop: bool,
    fail_remove: bool,
}

/// In-memory [`ContainerRuntime`].
///
/// Commands other than `mkdir` whose last argument is an absolute path that
/// was never transferred exit with status 2, the way an interpreter does
/// when its script is missing. Everything else is answered from the queue
/// filled by [`FakeRuntime::push_result`], falling back to the default
/// result (exit 0, empty output).
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    exec_delay: Option<Duration>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Result returned when the script queue is empty.
    pub fn with_default_result(self, exit_code: i64, output: &[u8]) -> Self {
        self.state.lock().unwrap().default_result = ExecOutput {
            exit_code,
            output: output.to_vec(),
        };
        self
    }

    /// Make `create_and_start` fail with `reason`.
    pub fn failing_provision(self, reason: impl Into<String>) -> Self {
        self.state.lock().unwrap().fail_provision = Some(reason.into());
        self
    }

    /// Delay every non-`mkdir` exec by `delay` (uses tokio time).
    pub fn with_exec_delay(mut self, delay: Duration) -> Self {
        self.exec_delay = Some(delay);
        self
    }

    /// Queue the result of the next non-`mkdir` exec.
    pub fn push_result(&self, exit_code: i64, output: &[u8]) {
        self.state.lock().unwrap().scripted.push_back(ExecOutput {
            exit_code,
            output: output.to_vec(),
        });
    }

    pub fn set_fail_transfer(&self, fail: bool) {
        self.state.lock().unwrap().fail_transfer = fail;
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.state.lock().unwrap().fail_stop = fail;
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.state.lock().unwrap().fail_remove = fail;
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// The `ContainerSpec` passed to the most recent `create_and_start`.
    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.state.lock().unwrap().last_spec.clone()
    }

    /// Contents of a transferred file, by in-container path.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    /// Last argument of every non-`mkdir` exec, i.e. the files that were run.
    pub fn executed_files(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|call| match call {
                RuntimeCall::Exec { command, .. } if !is_mkdir(command) => command.last().cloned(),
                _ => None,
            })
            .collect()
    }
}

fn is_mkdir(command: &[String]) -> bool {
    command.first().map(|c| c == "mkdir").unwrap_or(false)
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RuntimeCall::CreateAndStart {
            name: spec.name.clone(),
        });
        if let Some(reason) = &state.fail_provision {
            return Err(EnvError::Runtime(reason.clone()));
        }
        state.last_spec = Some(spec.clone());
        Ok(format!("fake-{}", spec.name))
    }

    async fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput> {
        let mkdir = is_mkdir(command);
        {
            let mut state = self.state.lock().unwrap();
            state.calls.push(RuntimeCall::Exec {
                container: container.to_string(),
                command: command.to_vec(),
            });
            if mkdir {
                return Ok(ExecOutput::default());
            }
        }

        if let Some(delay) = self.exec_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(target) = command.last().filter(|arg| arg.starts_with('/')) {
            if !state.files.contains_key(target) {
                return Ok(ExecOutput {
                    exit_code: 2,
                    output: format!("can't open file '{target}': No such file or directory")
                        .into_bytes(),
                });
            }
        }
        let result = match state.scripted.pop_front() {
            Some(result) => result,
            None => state.default_result.clone(),
        };
        Ok(result)
    }

    async fn put_archive(&self, container: &str, dest_dir: &str, archive: Vec<u8>) -> Result<()> {
        let entries = unpack_entries(&archive)?;
        let mut state = self.state.lock().unwrap();
        state.calls.push(RuntimeCall::PutArchive {
            container: container.to_string(),
            dest_dir: dest_dir.to_string(),
            entries: entries.iter().map(|(name, _)| name.clone()).collect(),
        });
        if state.fail_transfer {
            return Err(EnvError::Runtime("put_archive rejected".to_string()));
        }
        let dir = dest_dir.trim_end_matches('/');
        for (name, contents) in entries {
            state.files.insert(format!("{dir}/{name}"), contents);
        }
        Ok(())
    }

    async fn stop(&self, container: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RuntimeCall::Stop {
            container: container.to_string(),
        });
        if state.fail_stop {
            return Err(EnvError::Runtime("stop timed out".to_string()));
        }
        Ok(())
    }

    async fn remove(&self, container: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RuntimeCall::Remove {
            container: container.to_string(),
        });
        if state.fail_remove {
            return Err(EnvError::Runtime("removal in progress".to_string()));
        }
        Ok(())
    }
}
