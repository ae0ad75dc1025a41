//! Dispatcher and executor behaviour against a scripted isolation backend.
//!
//! The backend reads the mounted source file and interprets it line by line,
//! so these tests exercise the real artifact and container lifecycle without
//! a docker daemon.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use codebox::sandbox::{BackendError, EnvironmentInfo, IsolationBackend, LaunchSpec, RawOutput};
use codebox::{Config, Dispatcher};

mod cancellation;
mod concurrency;
mod outcomes;

/// Interprets the mounted source file:
///
/// - `print TEXT` writes `TEXT\n` to stdout
/// - `error TEXT` writes `TEXT\n` to stderr and exits 1
/// - `sleep MS` sleeps
/// - `hang` never returns
/// - `panic` panics inside the backend
#[derive(Debug, Default)]
pub(crate) struct ScriptedBackend {
    runs: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    launched: Mutex<Vec<LaunchSpec>>,
    /// Created and not yet removed, by id
    created: Mutex<HashMap<String, LaunchSpec>>,
    removed: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub(crate) fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Highest number of environments running at the same time
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Environments created and not yet removed
    pub(crate) fn live(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub(crate) fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub(crate) fn source_paths(&self) -> Vec<PathBuf> {
        self.launched
            .lock()
            .unwrap()
            .iter()
            .map(|spec| spec.mount.host_path.clone())
            .collect()
    }

    /// Wait until `name` has been removed, or give up after `limit`
    pub(crate) async fn wait_for_removal(&self, name: &str, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if self.removed().iter().any(|n| n == name) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

/// Decrements the active count even when the run future is dropped
struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl IsolationBackend for ScriptedBackend {
    async fn create(&self, spec: &LaunchSpec) -> Result<String, BackendError> {
        self.launched.lock().unwrap().push(spec.clone());
        self.created
            .lock()
            .unwrap()
            .insert(spec.name.clone(), spec.clone());
        Ok(spec.name.clone())
    }

    async fn start(&self, id: &str) -> Result<RawOutput, BackendError> {
        let spec = self
            .created
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::CommandFailed(format!("no such container: {id}")))?;
        self.runs.fetch_add(1, Ordering::SeqCst);

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _running = Running(&self.active);

        let script = tokio::fs::read_to_string(&spec.mount.host_path).await?;
        let mut output = RawOutput {
            exit_code: Some(0),
            ..Default::default()
        };

        for line in script.lines() {
            let (op, arg) = line.split_once(' ').unwrap_or((line, ""));
            match op {
                "print" => {
                    output.stdout.extend_from_slice(arg.as_bytes());
                    output.stdout.push(b'\n');
                }
                "error" => {
                    output.stderr.extend_from_slice(arg.as_bytes());
                    output.stderr.push(b'\n');
                    output.exit_code = Some(1);
                    break;
                }
                "sleep" => {
                    let ms = arg.parse().unwrap();
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                "hang" => std::future::pending::<()>().await,
                "panic" => panic!("scripted backend panic"),
                other => panic!("unknown script op {other:?}"),
            }
        }

        Ok(output)
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        self.created.lock().unwrap().remove(id);
        self.removed.lock().unwrap().push(id.to_owned());
        Ok(())
    }

    async fn list(&self, _label: &str) -> Result<Vec<EnvironmentInfo>, BackendError> {
        Ok(self
            .created
            .lock()
            .unwrap()
            .iter()
            .map(|(id, spec)| EnvironmentInfo {
                id: id.clone(),
                labels: spec.labels.iter().cloned().collect(),
            })
            .collect())
    }
}

/// Default config with a short sandbox timeout and caller wait
pub(crate) fn test_config(sandbox_timeout: f64, wait_timeout: f64) -> Config {
    let mut config = Config::default();
    config.default_limits.wall_time_limit = Some(sandbox_timeout);
    config.dispatcher.wait_timeout = wait_timeout;
    config
}

/// Start a dispatcher on an existing backend, like a second process sharing the daemon
pub(crate) fn start_on(config: &Config, backend: Arc<ScriptedBackend>) -> Dispatcher {
    Dispatcher::from_config(backend, config)
}

pub(crate) fn start(config: &Config) -> (Dispatcher, Arc<ScriptedBackend>) {
    let backend = Arc::new(ScriptedBackend::default());
    let dispatcher = Dispatcher::from_config(backend.clone(), config);
    (dispatcher, backend)
}
