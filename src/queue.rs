//! Single-worker FIFO execution queue for task runs.
//!
//! Runs execute strictly in enqueue order, one at a time. The run record is
//! persisted before it enters the channel, so a crash between enqueue and
//! execution leaves a visible `pending` record rather than nothing.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::session::StorageResult;
use crate::task::{RunStatus, Task, TaskContext, TaskRun};

/// Handle for enqueueing runs. Dropping the last handle closes the channel
/// and lets the worker drain and exit.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<TaskRun>,
}

impl TaskQueue {
    /// Start the worker and return the queue handle plus its join handle.
    pub fn start(ctx: Arc<TaskContext>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(worker(rx, ctx));
        (Self { tx }, handle)
    }

    /// Create a pending run for a task, persist it, and hand it to the
    /// worker. Returns the run so callers can track it.
    pub async fn enqueue(&self, task: &Task, ctx: &TaskContext) -> StorageResult<TaskRun> {
        let run = TaskRun::new(task.name());
        Task::save_run(&run, &ctx.paths.runs).await?;
        info!(run_id = %run.id, task = %run.task_name, "run enqueued");

        if self.tx.send(run.clone()).is_err() {
            error!(run_id = %run.id, "queue worker is gone; run will stay pending");
        }
        Ok(run)
    }
}

async fn worker(mut rx: mpsc::UnboundedReceiver<TaskRun>, ctx: Arc<TaskContext>) {
    info!("task worker started");

    while let Some(mut run) = rx.recv().await {
        let task = match Task::load(&run.task_name, &ctx.paths.tasks, &ctx.paths.runs).await {
            Ok(task) => task,
            Err(e) => {
                run.status = RunStatus::Failed;
                run.error = Some(format!("task '{}' not found: {e}", run.task_name));
                run.completed_at = Some(chrono::Utc::now());
                if let Err(e) = Task::save_run(&run, &ctx.paths.runs).await {
                    error!(run_id = %run.id, error = %e, "failed to persist run record");
                }
                error!(run_id = %run.id, task = %run.task_name, "run failed: task missing");
                continue;
            }
        };

        info!(run_id = %run.id, task = %run.task_name, "run started");
        task.execute(&mut run, &ctx).await;
    }

    info!("task worker stopped");
}
