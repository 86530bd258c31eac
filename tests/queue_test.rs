//! Queue behavior: FIFO execution, failure containment, session reuse.

use std::sync::Arc;

use tempfile::TempDir;

use valet::agent::{write_agent_file, AgentStore};
use valet::config::{Config, WorkspacePaths};
use valet::queue::TaskQueue;
use valet::session::{FileSessionStore, SessionSource, SessionStore};
use valet::task::{RunStatus, Task, TaskConfig, TaskContext, TaskRun};
use valet::tools::ToolRegistry;

async fn test_ctx(temp: &TempDir) -> Arc<TaskContext> {
    let paths = WorkspacePaths {
        agents: temp.path().join("agents"),
        sessions: temp.path().join("sessions"),
        tasks: temp.path().join("tasks"),
        runs: temp.path().join("runs"),
    };
    write_agent_file(
        &paths.agents,
        "assistant",
        "provider: mock\nmodel: test-model\n",
    )
    .await
    .unwrap();

    Arc::new(TaskContext {
        config: Arc::new(Config::default()),
        store: Arc::new(FileSessionStore::new(&paths.sessions)),
        agents: AgentStore::new(&paths.agents),
        tools: Arc::new(ToolRegistry::builtin()),
        paths,
    })
}

fn task_config(name: &str) -> TaskConfig {
    TaskConfig {
        name: name.to_string(),
        cron: "0 9 * * *".to_string(),
        agent_id: "assistant".to_string(),
        model: None,
        prompt: "do the thing".to_string(),
        enabled: true,
        sticky_session: false,
    }
}

async fn make_task(ctx: &TaskContext, config: TaskConfig) -> Task {
    let task = Task::new(config, &ctx.paths.runs);
    task.save(&ctx.paths.tasks).await.unwrap();
    task
}

async fn finished_run(ctx: &TaskContext, run: &TaskRun) -> TaskRun {
    Task::load_run(&run.id, &ctx.paths.runs).await.unwrap()
}

#[tokio::test]
async fn run_executes_and_persists_done() {
    let temp = TempDir::new().unwrap();
    let ctx = test_ctx(&temp).await;
    let task = make_task(&ctx, task_config("digest")).await;

    let (queue, worker) = TaskQueue::start(Arc::clone(&ctx));
    let run = queue.enqueue(&task, &ctx).await.unwrap();
    assert_eq!(run.status, RunStatus::Pending);
    drop(queue);
    worker.await.unwrap();

    let finished = finished_run(&ctx, &run).await;
    assert_eq!(finished.status, RunStatus::Done);
    assert!(finished.started_at.is_some());
    assert!(finished.completed_at.is_some());

    let session_id = finished.session_id.expect("run should record its session");
    let state = ctx.store.load(&session_id).await.unwrap();
    assert_eq!(state.source, SessionSource::Scheduled);
    assert_eq!(state.task_name.as_deref(), Some("digest"));
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[0].content, "do the thing");
    assert_eq!(state.messages[1].content, "ok");
}

#[tokio::test]
async fn missing_task_marks_run_failed() {
    let temp = TempDir::new().unwrap();
    let ctx = test_ctx(&temp).await;
    // Never saved to the tasks directory.
    let phantom = Task::new(task_config("phantom"), &ctx.paths.runs);

    let (queue, worker) = TaskQueue::start(Arc::clone(&ctx));
    let run = queue.enqueue(&phantom, &ctx).await.unwrap();
    drop(queue);
    worker.await.unwrap();

    let finished = finished_run(&ctx, &run).await;
    assert_eq!(finished.status, RunStatus::Failed);
    assert!(finished.error.unwrap().contains("phantom"));
}

#[tokio::test]
async fn runs_execute_serially_in_enqueue_order() {
    let temp = TempDir::new().unwrap();
    let ctx = test_ctx(&temp).await;
    let task = make_task(&ctx, task_config("digest")).await;

    let (queue, worker) = TaskQueue::start(Arc::clone(&ctx));
    let run_a = queue.enqueue(&task, &ctx).await.unwrap();
    let run_b = queue.enqueue(&task, &ctx).await.unwrap();
    let run_c = queue.enqueue(&task, &ctx).await.unwrap();
    drop(queue);
    worker.await.unwrap();

    let a = finished_run(&ctx, &run_a).await;
    let b = finished_run(&ctx, &run_b).await;
    let c = finished_run(&ctx, &run_c).await;
    for run in [&a, &b, &c] {
        assert_eq!(run.status, RunStatus::Done);
    }
    assert!(a.completed_at.unwrap() <= b.started_at.unwrap());
    assert!(b.completed_at.unwrap() <= c.started_at.unwrap());
}

#[tokio::test]
async fn failed_run_does_not_take_down_the_worker() {
    let temp = TempDir::new().unwrap();
    let ctx = test_ctx(&temp).await;

    let mut bad_config = task_config("bad");
    bad_config.agent_id = "no-such-agent".to_string();
    let bad = make_task(&ctx, bad_config).await;
    let good = make_task(&ctx, task_config("good")).await;

    let (queue, worker) = TaskQueue::start(Arc::clone(&ctx));
    let bad_run = queue.enqueue(&bad, &ctx).await.unwrap();
    let good_run = queue.enqueue(&good, &ctx).await.unwrap();
    drop(queue);
    worker.await.unwrap();

    let bad_finished = finished_run(&ctx, &bad_run).await;
    assert_eq!(bad_finished.status, RunStatus::Failed);
    assert!(bad_finished.error.unwrap().contains("no-such-agent"));

    let good_finished = finished_run(&ctx, &good_run).await;
    assert_eq!(good_finished.status, RunStatus::Done);
}

#[tokio::test]
async fn sticky_task_reuses_one_session() {
    let temp = TempDir::new().unwrap();
    let ctx = test_ctx(&temp).await;
    let mut config = task_config("pinned");
    config.sticky_session = true;
    let task = make_task(&ctx, config).await;

    let (queue, worker) = TaskQueue::start(Arc::clone(&ctx));
    let run_a = queue.enqueue(&task, &ctx).await.unwrap();
    let run_b = queue.enqueue(&task, &ctx).await.unwrap();
    drop(queue);
    worker.await.unwrap();

    let a = finished_run(&ctx, &run_a).await;
    let b = finished_run(&ctx, &run_b).await;
    assert_eq!(a.status, RunStatus::Done);
    assert_eq!(b.status, RunStatus::Done);
    assert_eq!(a.session_id, b.session_id);

    let state = ctx.store.load(a.session_id.as_deref().unwrap()).await.unwrap();
    assert!(state.sticky);
    assert_eq!(state.messages.len(), 4);
}

#[tokio::test]
async fn non_sticky_task_gets_fresh_sessions() {
    let temp = TempDir::new().unwrap();
    let ctx = test_ctx(&temp).await;
    let task = make_task(&ctx, task_config("fresh")).await;

    let (queue, worker) = TaskQueue::start(Arc::clone(&ctx));
    let run_a = queue.enqueue(&task, &ctx).await.unwrap();
    let run_b = queue.enqueue(&task, &ctx).await.unwrap();
    drop(queue);
    worker.await.unwrap();

    let a = finished_run(&ctx, &run_a).await;
    let b = finished_run(&ctx, &run_b).await;
    assert_ne!(a.session_id, b.session_id);

    let sessions = ctx.store.list().await.unwrap();
    assert_eq!(sessions.len(), 2);
    for state in sessions {
        assert_eq!(state.source, SessionSource::Scheduled);
        assert_eq!(state.messages.len(), 2);
    }
}
