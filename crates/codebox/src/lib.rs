//! Sandboxed code execution service.
//!
//! Codebox runs short untrusted programs in disposable docker containers with
//! no network, a memory ceiling and a CPU share. Requests are validated,
//! resolved against a configurable language registry and dispatched to a
//! fixed pool of workers; callers wait for a bounded time and the container is
//! torn down when they give up.
//!
//! # Features
//!
//! - **Isolated execution**: one container per task, removed on every exit path.
//! - **Language registry**: TOML-defined profiles; adding a language is one entry.
//! - **Worker pool**: bounded queue, fixed concurrency, caller-side deadline.
//! - **Crash recovery**: containers are labelled, and stale ones left by dead
//!   processes are reaped at start-up.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use codebox::{Config, Dispatcher, DockerCli, ExecutionRequest};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(None)?;
//! let backend = Arc::new(DockerCli::new(config.docker_binary()));
//! let dispatcher = Dispatcher::from_config(backend, &config);
//!
//! let request = ExecutionRequest::new("print('hello')", "python")?;
//! let result = dispatcher.submit(request).await;
//! println!("{}", result.output);
//! # Ok(())
//! # }
//! ```

pub use config::{Config, ConfigError, DispatcherConfig, EXAMPLE_CONFIG, LanguageProfile};
pub use dispatcher::{Dispatcher, TaskHandle, TaskState};
pub use intake::{ExecuteResponse, ExecutionRequest, IntakeError, ValidationErrors};
pub use registry::{LanguageRegistry, UnsupportedLanguage};
pub use sandbox::{
    BackendError, DockerCli, EnvironmentInfo, Executor, IsolationBackend, LaunchSpec, RawOutput,
};
pub use types::{ExecutionResult, Outcome, SandboxLimits};

pub mod config;
pub mod dispatcher;
pub mod intake;
pub mod registry;
pub mod sandbox;
pub mod types;
