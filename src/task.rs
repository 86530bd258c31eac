//! Scheduled tasks.
//!
//! A task is a stored prompt bound to an agent. Each execution is a
//! `TaskRun`, persisted to `{runs_dir}/{id}.json` the moment it is created
//! and rewritten at every status transition, so the run history survives
//! crashes mid-execution.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::AgentStore;
use crate::config::{Config, WorkspacePaths};
use crate::event::Event;
use crate::session::{
    CreateOptions, Session, SessionSource, SessionStore, StorageError, StorageResult,
};
use crate::tools::ToolRegistry;

/// A scheduled task definition, stored at `{tasks_dir}/{name}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    /// Cron expression; interpreted by an external scheduler.
    pub cron: String,
    pub agent_id: String,
    /// None uses the agent's default model.
    #[serde(default)]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Reuse one pinned session across runs instead of a fresh one per run.
    #[serde(default)]
    pub sticky_session: bool,
}

fn default_true() -> bool {
    true
}

/// Lifecycle of one task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Done => "done",
            RunStatus::Failed => "failed",
        })
    }
}

/// One execution of a task, stored at `{runs_dir}/{id}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: String,
    pub task_name: String,
    pub status: RunStatus,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskRun {
    /// Fresh pending run for a task.
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            id: format!("run-{}", &Uuid::new_v4().simple().to_string()[..12]),
            task_name: task_name.into(),
            status: RunStatus::Pending,
            scheduled_at: Utc::now(),
            started_at: None,
            completed_at: None,
            session_id: None,
            error: None,
        }
    }
}

/// Shared dependencies for executing task runs.
pub struct TaskContext {
    pub config: Arc<Config>,
    pub paths: WorkspacePaths,
    pub store: Arc<dyn SessionStore>,
    pub agents: AgentStore,
    pub tools: Arc<ToolRegistry>,
}

/// A loaded task plus its run directory.
#[derive(Debug, Clone)]
pub struct Task {
    pub config: TaskConfig,
    runs_dir: PathBuf,
}

impl Task {
    pub fn new(config: TaskConfig, runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            runs_dir: runs_dir.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Load a task definition by name.
    pub async fn load(name: &str, tasks_dir: &Path, runs_dir: &Path) -> StorageResult<Self> {
        let path = tasks_dir.join(format!("{name}.json"));
        let contents = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found("task", name));
            }
            Err(e) => return Err(StorageError::file_io(&path, e)),
        };
        let config: TaskConfig = serde_json::from_str(&contents)
            .map_err(|e| StorageError::file_deserialization(&path, e.to_string()))?;
        Ok(Self::new(config, runs_dir))
    }

    /// All parseable task definitions, sorted by name.
    pub async fn list(tasks_dir: &Path, runs_dir: &Path) -> StorageResult<Vec<Self>> {
        let mut tasks = Vec::new();

        let mut entries = match fs::read_dir(tasks_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(tasks_dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::file_io(tasks_dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path).await {
                Ok(contents) => match serde_json::from_str::<TaskConfig>(&contents) {
                    Ok(config) => tasks.push(Self::new(config, runs_dir)),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping bad task file"),
                },
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable task file"),
            }
        }

        tasks.sort_by(|a, b| a.config.name.cmp(&b.config.name));
        Ok(tasks)
    }

    /// Persist the task definition.
    pub async fn save(&self, tasks_dir: &Path) -> StorageResult<()> {
        fs::create_dir_all(tasks_dir)
            .await
            .map_err(|e| StorageError::file_io(tasks_dir, e))?;
        let path = tasks_dir.join(format!("{}.json", self.config.name));
        let json = serde_json::to_string_pretty(&self.config)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        fs::write(&path, json.as_bytes())
            .await
            .map_err(|e| StorageError::file_io(&path, e))
    }

    /// Persist a run record, overwriting any previous version.
    pub async fn save_run(run: &TaskRun, runs_dir: &Path) -> StorageResult<()> {
        fs::create_dir_all(runs_dir)
            .await
            .map_err(|e| StorageError::file_io(runs_dir, e))?;
        let path = runs_dir.join(format!("{}.json", run.id));
        let json = serde_json::to_string_pretty(run)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        fs::write(&path, json.as_bytes())
            .await
            .map_err(|e| StorageError::file_io(&path, e))
    }

    /// Load a run record by id.
    pub async fn load_run(id: &str, runs_dir: &Path) -> StorageResult<TaskRun> {
        let path = runs_dir.join(format!("{id}.json"));
        let contents = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found("run", id));
            }
            Err(e) => return Err(StorageError::file_io(&path, e)),
        };
        serde_json::from_str(&contents)
            .map_err(|e| StorageError::file_deserialization(&path, e.to_string()))
    }

    /// Runs for this task, newest first.
    pub async fn list_runs(&self) -> StorageResult<Vec<TaskRun>> {
        let mut runs = Vec::new();

        let mut entries = match fs::read_dir(&self.runs_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(&self.runs_dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::file_io(&self.runs_dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(contents) = fs::read_to_string(&path).await {
                if let Ok(run) = serde_json::from_str::<TaskRun>(&contents) {
                    if run.task_name == self.config.name {
                        runs.push(run);
                    }
                }
            }
        }

        runs.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        Ok(runs)
    }

    /// Execute one run to completion, updating its record at every step.
    ///
    /// Failures are recorded on the run; this never returns an error so a
    /// bad run cannot take the worker down with it.
    pub async fn execute(&self, run: &mut TaskRun, ctx: &TaskContext) {
        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        persist_run(run, &self.runs_dir).await;

        match self.run_session(run, ctx).await {
            Ok(()) => {
                run.status = RunStatus::Done;
                run.completed_at = Some(Utc::now());
                persist_run(run, &self.runs_dir).await;
                info!(run_id = %run.id, session_id = ?run.session_id, "run done");
            }
            Err(message) => {
                run.status = RunStatus::Failed;
                run.error = Some(message.clone());
                run.completed_at = Some(Utc::now());
                persist_run(run, &self.runs_dir).await;
                error!(run_id = %run.id, error = %message, "run failed");
            }
        }
    }

    async fn run_session(&self, run: &mut TaskRun, ctx: &TaskContext) -> Result<(), String> {
        let session = self.find_or_create_session(ctx).await?;
        run.session_id = Some(session.id());
        persist_run(run, &self.runs_dir).await;

        let mut stream = session
            .send(&self.config.prompt)
            .map_err(|e| e.to_string())?;

        // Drain without forwarding; the transcript lands in the session.
        let mut failure: Option<String> = None;
        while let Some(event) = stream.next().await {
            if let Event::Error { message } = event {
                failure = Some(message);
            }
        }

        match failure {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }

    async fn find_or_create_session(&self, ctx: &TaskContext) -> Result<Session, String> {
        if self.config.sticky_session {
            let existing = ctx.store.list().await.map_err(|e| e.to_string())?;
            if let Some(state) = existing
                .into_iter()
                .find(|s| s.task_name.as_deref() == Some(self.config.name.as_str()) && s.sticky)
            {
                return Session::resume(
                    &state.id,
                    &ctx.config,
                    &ctx.agents,
                    Arc::clone(&ctx.tools),
                    Arc::clone(&ctx.store),
                )
                .await
                .map_err(|e| e.to_string());
            }
        }

        let agent = ctx
            .agents
            .load(&self.config.agent_id)
            .await
            .map_err(|e| e.to_string())?;

        Session::create(
            &agent,
            CreateOptions {
                source: SessionSource::Scheduled,
                model: self.config.model.clone(),
                task_name: Some(self.config.name.clone()),
                sticky: self.config.sticky_session,
                title: None,
            },
            &ctx.config,
            Arc::clone(&ctx.tools),
            Arc::clone(&ctx.store),
        )
        .await
        .map_err(|e| e.to_string())
    }
}

async fn persist_run(run: &TaskRun, runs_dir: &Path) {
    if let Err(e) = Task::save_run(run, runs_dir).await {
        error!(run_id = %run.id, error = %e, "failed to persist run record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(name: &str) -> TaskConfig {
        TaskConfig {
            name: name.to_string(),
            cron: "0 9 * * *".to_string(),
            agent_id: "assistant".to_string(),
            model: None,
            prompt: "Summarize my day".to_string(),
            enabled: true,
            sticky_session: false,
        }
    }

    #[tokio::test]
    async fn save_and_load_task() {
        let temp = TempDir::new().unwrap();
        let tasks_dir = temp.path().join("tasks");
        let runs_dir = temp.path().join("runs");

        let task = Task::new(test_config("daily-digest"), &runs_dir);
        task.save(&tasks_dir).await.unwrap();

        let loaded = Task::load("daily-digest", &tasks_dir, &runs_dir)
            .await
            .unwrap();
        assert_eq!(loaded.config, task.config);
    }

    #[tokio::test]
    async fn load_missing_task_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = Task::load("missing", temp.path(), temp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn run_record_round_trips() {
        let temp = TempDir::new().unwrap();
        let runs_dir = temp.path().join("runs");

        let run = TaskRun::new("daily-digest");
        assert!(run.id.starts_with("run-"));
        assert_eq!(run.status, RunStatus::Pending);

        Task::save_run(&run, &runs_dir).await.unwrap();
        let loaded = Task::load_run(&run.id, &runs_dir).await.unwrap();
        assert_eq!(loaded, run);
    }

    #[tokio::test]
    async fn list_runs_filters_by_task_and_sorts_newest_first() {
        let temp = TempDir::new().unwrap();
        let runs_dir = temp.path().join("runs");

        let mut first = TaskRun::new("daily-digest");
        first.scheduled_at = Utc::now() - chrono::Duration::minutes(5);
        let second = TaskRun::new("daily-digest");
        let other = TaskRun::new("other-task");

        for run in [&first, &second, &other] {
            Task::save_run(run, &runs_dir).await.unwrap();
        }

        let task = Task::new(test_config("daily-digest"), &runs_dir);
        let runs = task.list_runs().await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second.id);
        assert_eq!(runs[1].id, first.id);
    }

    #[test]
    fn task_config_defaults() {
        let json = r#"{
            "name": "t",
            "cron": "* * * * *",
            "agent_id": "assistant",
            "prompt": "hello"
        }"#;
        let config: TaskConfig = serde_json::from_str(json).unwrap();
        assert!(config.enabled);
        assert!(!config.sticky_session);
        assert!(config.model.is_none());
    }

    #[test]
    fn run_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(RunStatus::Failed).unwrap(),
            serde_json::json!("failed")
        );
    }
}
