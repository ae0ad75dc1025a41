//! Sandbox executor
//!
//! Runs one program in one isolated environment. The source file lives in a
//! per-task scratch directory and the environment is addressed by a unique
//! name; both are reclaimed on every exit path.
//!
//! Every environment is labelled with its task id, the launching executor's
//! instance id and its launch time, so [`Executor::reap_orphans`] can tell a
//! crashed process's leftovers from environments another live process owns.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{Config, LanguageProfile};
use crate::sandbox::{
    BackendError, EnvironmentInfo, IsolationBackend, LaunchSpec, RawOutput, SourceMount,
};
use crate::types::{ExecutionResult, Outcome, SandboxLimits, format_seconds};

/// Exit status of a container killed by SIGKILL (usually the OOM killer)
const EXIT_KILLED: i32 = 137;

/// Added to the caller wait bound before another process's environment counts as orphaned
const ORPHAN_GRACE: Duration = Duration::from_secs(60);

/// Runs code in isolated environments through an [`IsolationBackend`]
#[derive(Debug, Clone)]
pub struct Executor {
    backend: Arc<dyn IsolationBackend>,
    default_limits: SandboxLimits,
    scratch_dir: Option<PathBuf>,
    container_prefix: String,
    owner_label: String,
    instance_label: String,
    started_label: String,
    /// Unique per executor; shared by clones
    instance: String,
    /// Age after which a foreign environment is considered orphaned
    stale_after: Duration,
}

impl Executor {
    pub fn new(backend: Arc<dyn IsolationBackend>, config: &Config) -> Self {
        Self {
            backend,
            default_limits: config.default_limits.clone(),
            scratch_dir: config.scratch_dir.clone(),
            container_prefix: config.container_prefix.clone(),
            owner_label: config.owner_label(),
            instance_label: config.instance_label(),
            started_label: config.started_label(),
            instance: Uuid::new_v4().to_string(),
            stale_after: config.dispatcher.wait_timeout() + ORPHAN_GRACE,
        }
    }

    /// Id stamped on every environment this executor launches
    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn backend(&self) -> &Arc<dyn IsolationBackend> {
        &self.backend
    }

    /// Effective limits for a language
    pub fn limits_for(&self, profile: &LanguageProfile) -> SandboxLimits {
        profile.effective_limits(&self.default_limits)
    }

    /// Wall clock budget for a language
    pub fn timeout_for(&self, profile: &LanguageProfile) -> Duration {
        self.limits_for(profile).wall_time()
    }

    /// Environment name for a task
    pub fn container_name(&self, task_id: Uuid) -> String {
        format!("{}-{task_id}", self.container_prefix)
    }

    /// Remove environments left behind by crashed processes.
    ///
    /// Only environments launched by another executor instance more than the
    /// caller wait bound (plus a grace period) ago are removed. A live process
    /// sharing the daemon and prefix keeps its environments. Environments
    /// without a readable launch time are treated as orphaned.
    pub async fn reap_orphans(&self) -> Result<usize, BackendError> {
        let listed = self.backend.list(&self.owner_label).await?;
        let now = unix_now();

        let mut removed = 0;
        for env in listed.iter().filter(|env| self.is_orphan(env, now)) {
            match self.backend.remove(&env.id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(id = %env.id, error = %e, "failed to remove orphaned environment"),
            }
        }

        if removed > 0 {
            warn!(removed, "removed orphaned environments from a previous run");
        } else {
            debug!(listed = listed.len(), "no orphaned environments");
        }
        Ok(removed)
    }

    fn is_orphan(&self, env: &EnvironmentInfo, now: u64) -> bool {
        if env.label(&self.instance_label) == Some(self.instance.as_str()) {
            return false;
        }
        match env
            .label(&self.started_label)
            .and_then(|started| started.parse::<u64>().ok())
        {
            Some(started) => now.saturating_sub(started) >= self.stale_after.as_secs(),
            None => true,
        }
    }

    /// Run `code` under `profile`.
    ///
    /// The run is abandoned when `timeout` elapses or `cancel` resolves; in
    /// both cases the environment is force-removed before returning.
    #[instrument(skip(self, code, profile, cancel), fields(image = %profile.image))]
    pub async fn execute<C>(
        &self,
        task_id: Uuid,
        code: &str,
        profile: &LanguageProfile,
        timeout: Duration,
        cancel: C,
    ) -> ExecutionResult
    where
        C: Future<Output = ()>,
    {
        let started = Instant::now();

        let source = match SourceArtifact::create(self.scratch_dir.as_deref(), profile, code).await
        {
            Ok(source) => source,
            Err(e) => {
                warn!(error = %e, "failed to materialize source file");
                return ExecutionResult::message(
                    Outcome::EnvironmentUnavailable,
                    format!("Execution environment is unavailable: cannot write source file: {e}"),
                )
                .with_task_id(task_id)
                .with_duration(started.elapsed());
            }
        };

        let spec = LaunchSpec {
            name: self.container_name(task_id),
            image: profile.image.clone(),
            network_disabled: true,
            limits: self.limits_for(profile),
            mount: SourceMount {
                host_path: source.path().to_path_buf(),
                target: profile.sandbox_source_path(),
                read_only: true,
            },
            command: profile.invocation(),
            labels: vec![
                (self.owner_label.clone(), task_id.to_string()),
                (self.instance_label.clone(), self.instance.clone()),
                (self.started_label.clone(), unix_now().to_string()),
            ],
        };

        let deadline = tokio::time::Instant::now() + timeout;
        let mut container = ContainerGuard::new(self.backend.clone(), spec.name.clone());
        debug!(name = %spec.name, source = %source.path().display(), "launching environment");

        // Creation is not raced against cancel: once it returns, the
        // environment exists and the guard can remove it
        tokio::pin!(cancel);
        let run = match tokio::time::timeout_at(deadline, self.backend.create(&spec)).await {
            Err(_) => RunEnd::TimedOut,
            Ok(Err(e)) => RunEnd::Exited(Err(e)),
            Ok(Ok(id)) => {
                container.created(id);
                tokio::select! {
                    biased;
                    _ = &mut cancel => RunEnd::Cancelled,
                    result = tokio::time::timeout_at(deadline, self.backend.start(container.id())) => {
                        match result {
                            Ok(result) => RunEnd::Exited(result),
                            Err(_) => RunEnd::TimedOut,
                        }
                    }
                }
            }
        };

        // Environment first, then the file it binds
        container.release().await;
        source.close();

        let result = match run {
            RunEnd::Exited(Ok(output)) => from_output(output),
            RunEnd::Exited(Err(e)) => {
                warn!(error = %e, "isolation backend failed");
                ExecutionResult::message(
                    Outcome::EnvironmentUnavailable,
                    format!("Execution environment is unavailable: {e}"),
                )
            }
            RunEnd::TimedOut => {
                warn!(limit = ?timeout, "execution timed out");
                ExecutionResult::message(
                    Outcome::TimedOut,
                    format!(
                        "Execution timed out (limit: {} seconds)",
                        format_seconds(timeout)
                    ),
                )
            }
            RunEnd::Cancelled => {
                debug!("execution cancelled by caller");
                ExecutionResult::message(Outcome::Cancelled, "Execution cancelled")
            }
        }
        .with_task_id(task_id)
        .with_duration(started.elapsed());

        info!(
            outcome = %result.outcome,
            exit_code = result.exit_code,
            duration = ?result.duration,
            "execution complete"
        );

        result
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

enum RunEnd {
    Exited(Result<RawOutput, BackendError>),
    TimedOut,
    Cancelled,
}

fn from_output(output: RawOutput) -> ExecutionResult {
    match output.exit_code {
        Some(0) => ExecutionResult {
            exit_code: Some(0),
            ..ExecutionResult::message(
                Outcome::Succeeded,
                String::from_utf8_lossy(&output.stdout).into_owned(),
            )
        },
        code => {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            let text = if !stderr.is_empty() {
                stderr
            } else {
                match code {
                    Some(EXIT_KILLED) => format!(
                        "Process was killed (exit status {EXIT_KILLED}); \
                         the memory limit may have been exceeded"
                    ),
                    Some(code) => format!("Process exited with status {code}"),
                    None => "Process was terminated by a signal".to_string(),
                }
            };
            ExecutionResult {
                exit_code: code,
                ..ExecutionResult::message(Outcome::Failed, text)
            }
        }
    }
}

/// Source file in a private scratch directory, removed when dropped
#[derive(Debug)]
struct SourceArtifact {
    dir: TempDir,
    path: PathBuf,
}

impl SourceArtifact {
    async fn create(
        scratch_dir: Option<&Path>,
        profile: &LanguageProfile,
        code: &str,
    ) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("codebox-");
        let dir = match scratch_dir {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };

        let path = dir.path().join(profile.source_name());
        tokio::fs::write(&path, code).await?;

        Ok(Self { dir, path })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn close(self) {
        let dir = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(dir = %dir.display(), error = %e, "failed to remove scratch directory");
        }
    }
}

/// Ownership of one launched environment.
///
/// Addresses the environment by name until the backend reports its id.
/// [`release`](Self::release) must be awaited on every normal path. If the
/// guard is dropped instead (the executing task panicked or was aborted),
/// removal is scheduled on the current runtime.
#[derive(Debug)]
struct ContainerGuard {
    backend: Arc<dyn IsolationBackend>,
    target: String,
    released: bool,
}

impl ContainerGuard {
    fn new(backend: Arc<dyn IsolationBackend>, name: String) -> Self {
        Self {
            backend,
            target: name,
            released: false,
        }
    }

    fn created(&mut self, id: String) {
        self.target = id;
    }

    fn id(&self) -> &str {
        &self.target
    }

    async fn release(mut self) {
        self.released = true;
        match self.backend.remove(&self.target).await {
            Ok(()) => debug!(id = %self.target, "environment removed"),
            Err(e) => warn!(id = %self.target, error = %e, "failed to remove environment"),
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!(id = %self.target, "environment guard dropped without release, scheduling removal");
        let backend = self.backend.clone();
        let target = std::mem::take(&mut self.target);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = backend.remove(&target).await {
                        warn!(id = %target, error = %e, "deferred environment removal failed");
                    }
                });
            }
            Err(_) => warn!(id = %target, "no runtime available to remove environment"),
        }
    }
}
