//! CLI command implementations.

pub mod chat;
pub mod session;
pub mod task;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use valet::agent::AgentStore;
use valet::config::Config;
use valet::session::FileSessionStore;
use valet::task::TaskContext;
use valet::tools::ToolRegistry;

/// Load the config and wire up the shared stores for one invocation.
async fn bootstrap(config_path: &str) -> Result<TaskContext> {
    let config = Config::load(config_path).await?;
    let paths = config.paths(Path::new(config_path));
    Ok(TaskContext {
        config: Arc::new(config),
        store: Arc::new(FileSessionStore::new(&paths.sessions)),
        agents: AgentStore::new(&paths.agents),
        tools: Arc::new(ToolRegistry::builtin()),
        paths,
    })
}
