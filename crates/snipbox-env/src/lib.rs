//! Snipbox-Env: isolated execution environments for untrusted snippets
//!
//! This crate owns the lifecycle of one resource-constrained container:
//! provisioning with CPU/memory/GPU limits, a persistent bind-mounted log
//! folder, file injection, in-container execution and teardown. It has no
//! knowledge of retry policy; that lives in `snipbox-core`.
//!
//! ## Key Components
//!
//! - `EnvironmentManager`: provision / transfer / execute / teardown
//! - `ContainerRuntime`: injected engine client (`DockerCli` in production)
//! - `fakes::FakeRuntime`: in-memory runtime for tests

pub mod archive;
pub mod docker;
mod error;
pub mod fakes;
pub mod manager;
pub mod runtime;

pub use docker::DockerCli;
pub use error::EnvError;
pub use manager::{
    generate_name, Environment, EnvironmentManager, EnvironmentSpec, EnvironmentState,
    LOGS_MOUNT_PATH, MANIFEST_DIR,
};
pub use runtime::{BindMount, ContainerRuntime, ContainerSpec, ExecOutput};

/// Result type for snipbox-env operations
pub type Result<T> = std::result::Result<T, EnvError>;
