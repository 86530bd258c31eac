//! Task management commands.

use std::sync::Arc;

use anyhow::{bail, Result};

use valet::queue::TaskQueue;
use valet::task::{RunStatus, Task};

/// Run a task right now and wait for it to finish.
pub async fn run(name: &str, config_path: &str) -> Result<()> {
    let ctx = Arc::new(super::bootstrap(config_path).await?);
    let task = Task::load(name, &ctx.paths.tasks, &ctx.paths.runs).await?;

    let (queue, worker) = TaskQueue::start(Arc::clone(&ctx));
    let run = queue.enqueue(&task, &ctx).await?;
    drop(queue);
    worker.await?;

    let finished = Task::load_run(&run.id, &ctx.paths.runs).await?;
    match finished.status {
        RunStatus::Done => {
            println!(
                "Run {} done (session {})",
                finished.id,
                finished.session_id.as_deref().unwrap_or("-")
            );
            Ok(())
        }
        RunStatus::Failed => bail!(
            "run {} failed: {}",
            finished.id,
            finished.error.as_deref().unwrap_or("unknown error")
        ),
        status => bail!("run {} ended in status {status}", finished.id),
    }
}

/// List configured tasks with their most recent run.
pub async fn list(config_path: &str) -> Result<()> {
    let ctx = super::bootstrap(config_path).await?;
    let tasks = Task::list(&ctx.paths.tasks, &ctx.paths.runs).await?;

    if tasks.is_empty() {
        println!("No tasks configured.");
        return Ok(());
    }

    for task in tasks {
        let last = task
            .list_runs()
            .await?
            .into_iter()
            .next()
            .map(|run| format!("last run {} ({})", run.status, run.scheduled_at.format("%Y-%m-%d %H:%M")))
            .unwrap_or_else(|| "never run".to_string());

        let flags = match (task.config.enabled, task.config.sticky_session) {
            (false, _) => " [disabled]",
            (true, true) => " [sticky]",
            (true, false) => "",
        };

        println!(
            "{:<24} agent={:<16} cron={:<16} {}{}",
            task.config.name, task.config.agent_id, task.config.cron, last, flags
        );
    }

    Ok(())
}
