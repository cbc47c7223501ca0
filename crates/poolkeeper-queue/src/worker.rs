//! Worker pool draining the task queue.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use poolkeeper_pool::{notify_best_effort, Notification, Notifier};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::queue::TaskQueue;
use crate::task::TaskRecord;

/// Runs one claimed task. Called on a blocking thread.
pub trait TaskExecutor: Send + Sync {
    /// Executes `task`, returning a one-line summary for the archive.
    fn execute(&self, task: &TaskRecord, cancel: &CancellationToken) -> QueueResult<String>;
}

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// How long an idle worker sleeps before looking at the queue again
    /// without being woken.
    pub idle_poll: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            idle_poll: Duration::from_secs(5),
        }
    }
}

/// A bounded set of tokio workers claiming tasks from a [`TaskQueue`].
pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    executor: Arc<dyn TaskExecutor>,
    notifier: Option<Arc<dyn Notifier>>,
    config: WorkerConfig,
}

impl WorkerPool {
    /// Creates a pool; nothing runs until [`WorkerPool::start`].
    pub fn new(queue: Arc<TaskQueue>, executor: Arc<dyn TaskExecutor>, config: WorkerConfig) -> Self {
        Self {
            queue,
            executor,
            notifier: None,
            config,
        }
    }

    /// Sends failed tasks to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Spawns the workers. They stop once `cancel` fires and their current
    /// task is finished.
    pub fn start(self, cancel: CancellationToken) -> WorkerHandle {
        let workers = self.config.workers.max(1);
        let pool = Arc::new(self);
        let handles = (0..workers)
            .map(|index| tokio::spawn(Arc::clone(&pool).worker_loop(index, cancel.clone())))
            .collect();
        info!(workers, "worker pool started");
        WorkerHandle { handles }
    }

    async fn worker_loop(self: Arc<Self>, index: usize, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            // registered before the claim so a wakeup in between is not lost
            let wakeup = self.queue.wakeup().notified();
            tokio::pin!(wakeup);
            wakeup.as_mut().enable();

            match self.queue.claim_next() {
                Ok(Some(task)) => {
                    self.run_task(index, task, &cancel).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!(worker = index, error = %e, "failed to claim a task"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut wakeup => {}
                _ = tokio::time::sleep(self.config.idle_poll) => {}
            }
        }
        debug!(worker = index, "worker stopped");
    }

    async fn run_task(&self, index: usize, task: TaskRecord, cancel: &CancellationToken) {
        debug!(worker = index, task = %task.describe(), "running task");
        let executor = Arc::clone(&self.executor);
        let token = cancel.clone();
        let running = task.clone();
        let joined = tokio::task::spawn_blocking(move || executor.execute(&running, &token)).await;

        let result = match joined {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(QueueError::Interrupted)) => {
                info!(worker = index, task = %task.describe(), "task interrupted, left for the next start");
                return;
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) if e.is_panic() => Err(format!("handler panicked: {}", panic_message(e.into_panic()))),
            Err(e) => Err(format!("handler did not finish: {}", e)),
        };

        match self.queue.complete(task.id, result) {
            Ok(record) => {
                if let (Some(error), Some(notifier)) = (record.failure(), &self.notifier) {
                    let notification = Notification::new(format!("task {} failed", record.describe()), error);
                    notify_best_effort(notifier.as_ref(), &notification);
                }
            }
            Err(e) => error!(worker = index, task = task.id, error = %e, "failed to record task completion"),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Running workers.
pub struct WorkerHandle {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Waits for every worker to stop.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker ended abnormally");
            }
        }
    }
}
