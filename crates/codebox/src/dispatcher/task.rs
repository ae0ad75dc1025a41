//! Execution tasks and their lifecycle

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::LanguageProfile;
use crate::intake::ExecutionRequest;
use crate::sandbox::Executor;
use crate::types::{ExecutionResult, Outcome};

/// Lifecycle of an [`ExecutionTask`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    EnvironmentUnavailable,
    /// The caller gave up; the environment was torn down
    Cancelled,
    /// The worker running the task panicked
    Aborted,
}

impl TaskState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            TaskState::Created | TaskState::Queued | TaskState::Running
        )
    }

    /// Check whether moving to `next` is allowed. Terminal states are final.
    pub fn can_advance_to(&self, next: TaskState) -> bool {
        match (self, next) {
            (TaskState::Created, TaskState::Queued) => true,
            // A task whose caller left while it was queued is never run
            (TaskState::Queued, TaskState::Running | TaskState::Cancelled) => true,
            (TaskState::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    /// Terminal state for an executor outcome
    pub fn from_outcome(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Succeeded => TaskState::Succeeded,
            Outcome::Failed => TaskState::Failed,
            Outcome::TimedOut => TaskState::TimedOut,
            Outcome::EnvironmentUnavailable => TaskState::EnvironmentUnavailable,
            Outcome::Aborted => TaskState::Aborted,
            // Decided before a task exists, or by the caller giving up
            Outcome::Cancelled | Outcome::DispatcherTimeout | Outcome::UnsupportedLanguage => {
                TaskState::Cancelled
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid task transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: TaskState,
    pub to: TaskState,
}

/// One submission, owned by the dispatcher until its result is delivered
#[derive(Debug)]
pub struct ExecutionTask {
    id: Uuid,
    request: ExecutionRequest,
    profile: Arc<LanguageProfile>,
    state: TaskState,
    created: Instant,
    reply: oneshot::Sender<ExecutionResult>,
}

impl ExecutionTask {
    /// Create a task and the receiving end of its result
    pub fn new(
        request: ExecutionRequest,
        profile: Arc<LanguageProfile>,
    ) -> (Self, oneshot::Receiver<ExecutionResult>) {
        let (reply, rx) = oneshot::channel();
        let task = Self {
            id: Uuid::new_v4(),
            request,
            profile,
            state: TaskState::Created,
            created: Instant::now(),
            reply,
        };
        (task, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn request(&self) -> &ExecutionRequest {
        &self.request
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn advance(&mut self, next: TaskState) -> Result<(), InvalidTransition> {
        if !self.state.can_advance_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(task_id = %self.id, from = ?self.state, to = ?next, "task state");
        self.state = next;
        Ok(())
    }

    /// Check whether the caller stopped waiting
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    /// Run the task to a terminal state and deliver its result.
    ///
    /// The run is cancelled as soon as the caller drops its handle.
    #[instrument(skip_all, fields(task_id = %self.id, language = %self.request.language()))]
    pub async fn run(mut self, executor: &Executor) -> TaskState {
        if self.is_abandoned() {
            self.finish(TaskState::Cancelled);
            debug!("caller left before the task started");
            return self.state;
        }
        self.finish(TaskState::Running);

        let queued_for = self.created.elapsed();
        let timeout = executor.timeout_for(&self.profile);
        let result = {
            let ExecutionTask {
                id,
                ref request,
                ref profile,
                ref mut reply,
                ..
            } = self;
            executor
                .execute(id, request.code(), profile, timeout, reply.closed())
                .await
        };

        self.finish(TaskState::from_outcome(result.outcome));
        debug!(?queued_for, state = ?self.state, "task finished");

        let state = self.state;
        if self.reply.send(result).is_err() {
            debug!("caller left before the result was delivered");
        }
        state
    }

    fn finish(&mut self, next: TaskState) {
        if let Err(e) = self.advance(next) {
            warn!(error = %e, "ignoring invalid task transition");
        }
    }
}
