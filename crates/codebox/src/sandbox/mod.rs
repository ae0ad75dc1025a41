//! Isolated execution environments
//!
//! The executor talks to the isolation backend through [`IsolationBackend`],
//! so the container runtime can be swapped (or scripted in tests) without
//! touching execution logic. [`DockerCli`] is the production backend.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use crate::sandbox::docker::{DockerAction, DockerCli, DockerCommand};
pub use crate::sandbox::executor::Executor;
use crate::types::SandboxLimits;

mod docker;
mod executor;

/// Errors raised by an isolation backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend binary or daemon could not be reached
    #[error("isolation backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend command failed: {0}")]
    CommandFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Classify a spawn failure of the backend binary
    pub fn from_spawn(binary: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                BackendError::Unavailable(format!("cannot run '{binary}': {err}"))
            }
            _ => BackendError::Io(err),
        }
    }
}

/// The single source file bound into an environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMount {
    /// Path of the artifact on the host
    pub host_path: PathBuf,

    /// Path inside the environment
    pub target: String,

    /// Bind read-only
    pub read_only: bool,
}

/// Everything the backend needs to launch one environment
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Unique environment name
    pub name: String,

    /// Image to run
    pub image: String,

    /// Disable all networking
    pub network_disabled: bool,

    /// Memory, CPU and process ceilings
    pub limits: SandboxLimits,

    /// The source artifact
    pub mount: SourceMount,

    /// Arguments passed after the image name
    pub command: Vec<String>,

    /// Labels attached to the environment (ownership, correlation id)
    pub labels: Vec<(String, String)>,
}

/// Captured output of an environment that ran to completion
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,

    /// Exit status, `None` if the backend client was terminated by a signal
    pub exit_code: Option<i32>,
}

/// An existing environment as reported by [`IsolationBackend::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentInfo {
    /// Backend id, accepted by [`IsolationBackend::remove`]
    pub id: String,
    pub labels: HashMap<String, String>,
}

impl EnvironmentInfo {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Launch facility for isolated environments
#[async_trait]
pub trait IsolationBackend: Send + Sync + Debug {
    /// Create the environment without starting it, returning its id.
    ///
    /// Once this returns `Ok`, the environment exists and must be reclaimed
    /// with [`remove`](Self::remove).
    async fn create(&self, spec: &LaunchSpec) -> Result<String, BackendError>;

    /// Start a created environment and wait for it to exit.
    ///
    /// Dropping the returned future must not leave the backend client
    /// running; the environment itself is reclaimed by [`remove`](Self::remove).
    async fn start(&self, id: &str) -> Result<RawOutput, BackendError>;

    /// Force-stop and delete an environment by id or name.
    ///
    /// Removing an environment that no longer exists succeeds.
    async fn remove(&self, id: &str) -> Result<(), BackendError>;

    /// List every environment carrying the label key `label`, running or not.
    async fn list(&self, label: &str) -> Result<Vec<EnvironmentInfo>, BackendError>;
}
