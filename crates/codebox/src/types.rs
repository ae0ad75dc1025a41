use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resource ceilings applied to one sandboxed run.
///
/// Every field is optional so that per-language overrides only replace the
/// values they actually specify (see [`SandboxLimits::with_overrides`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// Memory ceiling in megabytes (swap is capped to the same value)
    #[serde(default)]
    pub memory_limit: Option<u64>,

    /// CPU share as a fraction of one core
    #[serde(default)]
    pub cpu_limit: Option<f64>,

    /// Maximum number of processes/threads inside the environment
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Wall clock budget in seconds for the whole launch-and-run operation
    #[serde(default)]
    pub wall_time_limit: Option<f64>,
}

impl SandboxLimits {
    pub const DEFAULT_MEMORY_MB: u64 = 128;
    pub const DEFAULT_CPUS: f64 = 0.5;
    pub const DEFAULT_MAX_PROCESSES: u32 = 64;
    pub const DEFAULT_WALL_TIME: f64 = 30.0;

    /// Create new limits with the built-in defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits with every field unset, useful as an override base
    pub fn unset() -> Self {
        Self {
            memory_limit: None,
            cpu_limit: None,
            max_processes: None,
            wall_time_limit: None,
        }
    }

    /// Set the memory ceiling in megabytes
    pub fn with_memory_limit(mut self, mb: u64) -> Self {
        self.memory_limit = Some(mb);
        self
    }

    /// Set the CPU share
    pub fn with_cpu_limit(mut self, cpus: f64) -> Self {
        self.cpu_limit = Some(cpus);
        self
    }

    /// Set the maximum number of processes
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    /// Set the wall clock budget in seconds
    pub fn with_wall_time_limit(mut self, seconds: f64) -> Self {
        self.wall_time_limit = Some(seconds);
        self
    }

    /// Apply overrides from another SandboxLimits, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &SandboxLimits) -> SandboxLimits {
        SandboxLimits {
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            cpu_limit: overrides.cpu_limit.or(self.cpu_limit),
            max_processes: overrides.max_processes.or(self.max_processes),
            wall_time_limit: overrides.wall_time_limit.or(self.wall_time_limit),
        }
    }

    /// Wall clock budget, falling back to the built-in default when unset or
    /// not a usable number of seconds
    pub fn wall_time(&self) -> Duration {
        self.wall_time_limit
            .and_then(checked_seconds)
            .unwrap_or(Duration::from_secs(Self::DEFAULT_WALL_TIME as u64))
    }
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_limit: Some(Self::DEFAULT_MEMORY_MB),
            cpu_limit: Some(Self::DEFAULT_CPUS),
            max_processes: Some(Self::DEFAULT_MAX_PROCESSES),
            wall_time_limit: Some(Self::DEFAULT_WALL_TIME),
        }
    }
}

/// Terminal outcome of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Program exited with status zero; output is its stdout
    Succeeded,

    /// Program exited non-zero; output is its stderr
    Failed,

    /// The sandbox watchdog fired and the environment was killed
    TimedOut,

    /// The isolation backend could not be invoked
    EnvironmentUnavailable,

    /// The language has no registered profile; nothing was launched
    UnsupportedLanguage,

    /// The caller stopped waiting before a result was available
    DispatcherTimeout,

    /// The caller cancelled the task; the environment was torn down
    Cancelled,

    /// The worker executing the task crashed before producing a result
    Aborted,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
            Outcome::TimedOut => "timed_out",
            Outcome::EnvironmentUnavailable => "environment_unavailable",
            Outcome::UnsupportedLanguage => "unsupported_language",
            Outcome::DispatcherTimeout => "dispatcher_timeout",
            Outcome::Cancelled => "cancelled",
            Outcome::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one submission
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Correlation id of the task, absent when nothing was queued
    pub task_id: Option<Uuid>,

    /// What happened
    pub outcome: Outcome,

    /// User-facing text: stdout, stderr, or a diagnostic message
    pub output: String,

    /// Exit code of the sandboxed program if it exited on its own
    pub exit_code: Option<i32>,

    /// Wall time from submission (or launch, for executor results) to completion
    pub duration: Duration,
}

impl ExecutionResult {
    /// Build a result that carries only a message
    pub fn message(outcome: Outcome, output: impl Into<String>) -> Self {
        Self {
            task_id: None,
            outcome,
            output: output.into(),
            exit_code: None,
            duration: Duration::ZERO,
        }
    }

    /// Attach a correlation id
    pub fn with_task_id(mut self, id: Uuid) -> Self {
        self.task_id = Some(id);
        self
    }

    /// Set the elapsed time
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Check if the program ran and exited with status zero
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Succeeded)
    }
}

/// Longest timeout accepted anywhere in the configuration, in seconds
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

/// Convert a configured number of seconds, rejecting NaN, infinities,
/// non-positive values and anything above [`MAX_TIMEOUT_SECS`]
pub fn checked_seconds(seconds: f64) -> Option<Duration> {
    if !(seconds.is_finite() && seconds > 0.0 && seconds <= MAX_TIMEOUT_SECS) {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// Render a duration in seconds without a trailing `.0`
pub(crate) fn format_seconds(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs.fract() == 0.0 {
        format!("{}", secs as u64)
    } else {
        format!("{secs:.1}")
    }
}
