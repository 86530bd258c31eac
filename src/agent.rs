//! Agent definitions loaded from YAML files.
//!
//! One file per agent at `{agents_dir}/{id}.yaml`; the id is the file stem.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tracing::warn;

/// Errors from agent loading.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent not found: {0}")]
    NotFound(String),

    #[error("failed to read agent file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse agent file: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

/// An agent definition.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSpec {
    /// File stem, e.g. "assistant".
    pub id: String,
    /// Display name; defaults to the id.
    pub name: String,
    /// Provider id, e.g. "claude-cli" or "openrouter".
    pub provider: String,
    /// Default model, overridable per session.
    pub model: String,
    pub system_prompt: String,
}

#[derive(Debug, Deserialize)]
struct RawAgentSpec {
    #[serde(default)]
    name: Option<String>,
    provider: String,
    model: String,
    #[serde(default)]
    system_prompt: String,
}

/// Loads agent specs from a directory of YAML files.
#[derive(Debug, Clone)]
pub struct AgentStore {
    agents_dir: PathBuf,
}

impl AgentStore {
    pub fn new(agents_dir: impl Into<PathBuf>) -> Self {
        Self {
            agents_dir: agents_dir.into(),
        }
    }

    fn path(&self, id: &str) -> PathBuf {
        self.agents_dir.join(format!("{id}.yaml"))
    }

    /// Load one agent by id.
    pub async fn load(&self, id: &str) -> Result<AgentSpec, AgentError> {
        let path = self.path(id);
        let contents = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AgentError::NotFound(id.to_string()));
            }
            Err(e) => return Err(AgentError::Io(e)),
        };
        Self::parse(id, &contents)
    }

    /// All parseable agents, sorted by id. Bad files are skipped with a
    /// warning.
    pub async fn list(&self) -> Result<Vec<AgentSpec>, AgentError> {
        let mut agents = Vec::new();

        let mut entries = match fs::read_dir(&self.agents_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AgentError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match fs::read_to_string(&path).await {
                Ok(contents) => match Self::parse(id, &contents) {
                    Ok(agent) => agents.push(agent),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping bad agent file"),
                },
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable agent file"),
            }
        }

        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    fn parse(id: &str, contents: &str) -> Result<AgentSpec, AgentError> {
        let raw: RawAgentSpec = serde_saphyr::from_str(contents)?;
        Ok(AgentSpec {
            id: id.to_string(),
            name: raw.name.unwrap_or_else(|| id.to_string()),
            provider: raw.provider,
            model: raw.model,
            system_prompt: raw.system_prompt,
        })
    }
}

/// Write an agent file; used by tests and workspace setup.
pub async fn write_agent_file(
    agents_dir: &Path,
    id: &str,
    contents: &str,
) -> Result<(), std::io::Error> {
    fs::create_dir_all(agents_dir).await?;
    fs::write(agents_dir.join(format!("{id}.yaml")), contents).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ASSISTANT_YAML: &str = r#"
name: Assistant
provider: claude-cli
model: test-model
system_prompt: |
  You are a helpful assistant.
"#;

    #[tokio::test]
    async fn loads_agent_by_id() {
        let temp = TempDir::new().unwrap();
        write_agent_file(temp.path(), "assistant", ASSISTANT_YAML)
            .await
            .unwrap();

        let store = AgentStore::new(temp.path());
        let agent = store.load("assistant").await.unwrap();

        assert_eq!(agent.id, "assistant");
        assert_eq!(agent.name, "Assistant");
        assert_eq!(agent.provider, "claude-cli");
        assert_eq!(agent.model, "test-model");
        assert!(agent.system_prompt.contains("helpful assistant"));
    }

    #[tokio::test]
    async fn missing_agent_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = AgentStore::new(temp.path());

        let err = store.load("missing").await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[tokio::test]
    async fn name_defaults_to_id() {
        let temp = TempDir::new().unwrap();
        write_agent_file(
            temp.path(),
            "digest",
            "provider: openrouter\nmodel: some-model\n",
        )
        .await
        .unwrap();

        let store = AgentStore::new(temp.path());
        let agent = store.load("digest").await.unwrap();
        assert_eq!(agent.name, "digest");
        assert_eq!(agent.system_prompt, "");
    }

    #[tokio::test]
    async fn list_skips_bad_files() {
        let temp = TempDir::new().unwrap();
        write_agent_file(temp.path(), "assistant", ASSISTANT_YAML)
            .await
            .unwrap();
        write_agent_file(temp.path(), "broken", "model_only: true\n")
            .await
            .unwrap();

        let store = AgentStore::new(temp.path());
        let agents = store.list().await.unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].id, "assistant");
    }

    #[tokio::test]
    async fn list_empty_dir() {
        let temp = TempDir::new().unwrap();
        let store = AgentStore::new(temp.path().join("nope"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
