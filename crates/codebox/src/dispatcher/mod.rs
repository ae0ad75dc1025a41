//! Execution task dispatcher
//!
//! A fixed pool of workers drains one bounded queue. Each caller waits on its
//! own reply channel with a bounded deadline; giving up closes that channel,
//! which cancels the run and tears the environment down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::error::Elapsed;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub use crate::dispatcher::task::{ExecutionTask, InvalidTransition, TaskState};
use crate::config::{Config, DispatcherConfig};
use crate::intake::ExecutionRequest;
use crate::registry::LanguageRegistry;
use crate::sandbox::{Executor, IsolationBackend};
use crate::types::{ExecutionResult, Outcome, format_seconds};

mod task;

type Queue = Arc<Mutex<mpsc::Receiver<ExecutionTask>>>;

/// Accepts requests and runs them on a fixed-size worker pool
#[derive(Debug)]
pub struct Dispatcher {
    sender: mpsc::Sender<ExecutionTask>,
    registry: LanguageRegistry,
    executor: Arc<Executor>,
    wait_timeout: Duration,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn the worker pool on the current tokio runtime
    pub fn start(
        executor: Arc<Executor>,
        registry: LanguageRegistry,
        config: &DispatcherConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let queue: Queue = Arc::new(Mutex::new(receiver));

        let workers = (0..config.workers.max(1))
            .map(|id| tokio::spawn(worker(id, queue.clone(), executor.clone())))
            .collect::<Vec<_>>();

        info!(
            workers = workers.len(),
            queue_capacity = config.queue_capacity,
            languages = registry.len(),
            "dispatcher started"
        );

        Self {
            sender,
            registry,
            executor,
            wait_timeout: config.wait_timeout(),
            workers,
        }
    }

    /// Build the executor and registry from `config` and start
    pub fn from_config(backend: Arc<dyn IsolationBackend>, config: &Config) -> Self {
        Self::start(
            Arc::new(Executor::new(backend, config)),
            LanguageRegistry::from_config(config),
            &config.dispatcher,
        )
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Caller-side bound applied by [`submit`](Self::submit)
    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Queue a request and return a handle to its result.
    ///
    /// Unsupported languages and a stopped dispatcher produce a terminal
    /// result immediately; nothing is queued in that case.
    pub async fn enqueue(&self, request: ExecutionRequest) -> Result<TaskHandle, ExecutionResult> {
        let profile = match self.registry.lookup(request.language()) {
            Ok(profile) => profile,
            Err(unsupported) => {
                debug!(language = %unsupported.0, "rejecting unsupported language");
                return Err(ExecutionResult::message(
                    Outcome::UnsupportedLanguage,
                    unsupported.to_string(),
                ));
            }
        };

        let (mut task, reply) = ExecutionTask::new(request, profile);
        let id = task.id();
        task.advance(TaskState::Queued)
            .map_err(|e| aborted(id, &e.to_string()))?;

        self.sender.send(task).await.map_err(|_| {
            warn!(task_id = %id, "dispatcher is shut down");
            aborted(id, "Execution aborted: dispatcher is shut down")
        })?;
        debug!(task_id = %id, "task queued");

        Ok(TaskHandle { id, reply })
    }

    /// Run a request and wait for its result.
    ///
    /// Waiting for queue space counts against the same bound as waiting for
    /// the result. When the bound elapses the task is cancelled.
    #[instrument(skip_all, fields(language = %request.language()))]
    pub async fn submit(&self, request: ExecutionRequest) -> ExecutionResult {
        let deadline = Instant::now() + self.wait_timeout;

        let handle = match tokio::time::timeout_at(deadline, self.enqueue(request)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(result)) => return result,
            Err(_) => {
                warn!("queue stayed full until the deadline");
                return dispatcher_timeout(None, self.wait_timeout);
            }
        };

        let id = handle.id();
        match handle.recv_until(deadline).await {
            Ok(result) => result,
            Err(_) => {
                warn!(task_id = %id, limit = ?self.wait_timeout, "caller gave up; cancelling task");
                dispatcher_timeout(Some(id), self.wait_timeout)
            }
        }
    }

    /// Stop accepting work and wait for the workers to drain the queue
    pub async fn shutdown(self) {
        let Dispatcher {
            sender, workers, ..
        } = self;
        drop(sender);

        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "worker exited abnormally");
            }
        }
        info!("dispatcher stopped");
    }
}

/// Caller's end of a queued task
#[derive(Debug)]
pub struct TaskHandle {
    id: Uuid,
    reply: oneshot::Receiver<ExecutionResult>,
}

impl TaskHandle {
    /// Correlation id of the task
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait at most `timeout` for the result, cancelling the task on expiry
    pub async fn wait(self, timeout: Duration) -> ExecutionResult {
        let id = self.id;
        self.recv_until(Instant::now() + timeout)
            .await
            .unwrap_or_else(|_| dispatcher_timeout(Some(id), timeout))
    }

    /// Give up on the task; its environment is torn down
    pub fn cancel(mut self) {
        debug!(task_id = %self.id, "cancelling task");
        self.reply.close();
    }

    async fn recv_until(self, deadline: Instant) -> Result<ExecutionResult, Elapsed> {
        let id = self.id;
        Ok(match tokio::time::timeout_at(deadline, self.reply).await? {
            Ok(result) => result,
            // The worker dropped the task without replying
            Err(_) => aborted(id, "Execution aborted: the worker stopped unexpectedly"),
        })
    }
}

#[instrument(skip(queue, executor))]
async fn worker(id: usize, queue: Queue, executor: Arc<Executor>) {
    debug!("worker started");
    loop {
        let task = {
            let mut queue = queue.lock().await;
            queue.recv().await
        };
        let Some(task) = task else {
            break;
        };

        let task_id = task.id();
        let executor = executor.clone();
        // A panic in one run must not take the worker down with it
        let run = tokio::spawn(async move { task.run(&executor).await });

        match run.await {
            Ok(state) => debug!(%task_id, ?state, "task done"),
            Err(e) if e.is_panic() => error!(%task_id, "task panicked; reported as aborted"),
            Err(e) => warn!(%task_id, error = %e, "task did not complete"),
        }
    }
    debug!("worker stopped");
}

fn dispatcher_timeout(id: Option<Uuid>, limit: Duration) -> ExecutionResult {
    let result = ExecutionResult::message(
        Outcome::DispatcherTimeout,
        format!(
            "Execution did not complete within {} seconds.",
            format_seconds(limit)
        ),
    )
    .with_duration(limit);
    match id {
        Some(id) => result.with_task_id(id),
        None => result,
    }
}

fn aborted(id: Uuid, message: &str) -> ExecutionResult {
    ExecutionResult::message(Outcome::Aborted, message).with_task_id(id)
}
