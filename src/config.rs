//! Configuration loaded once at boot from a YAML file.
//!
//! Supports `${VAR}` and `${VAR:-default}` environment expansion. A missing
//! config file yields defaults. Relative paths resolve against the config
//! file's directory, so behavior does not depend on the working directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

/// Default workspace directory (relative to the config file).
pub const DEFAULT_WORKSPACE: &str = ".valet";
/// Default agents directory (relative to workspace).
pub const DEFAULT_AGENTS_DIR: &str = "agents";
/// Default sessions directory (relative to workspace).
pub const DEFAULT_SESSIONS_DIR: &str = "sessions";
/// Default tasks directory (relative to workspace).
pub const DEFAULT_TASKS_DIR: &str = "tasks";
/// Default task-run directory (relative to workspace).
pub const DEFAULT_RUNS_DIR: &str = "runs";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    #[serde(default)]
    pub agents_dir: Option<PathBuf>,
    #[serde(default)]
    pub sessions_dir: Option<PathBuf>,
    #[serde(default)]
    pub tasks_dir: Option<PathBuf>,
    #[serde(default)]
    pub runs_dir: Option<PathBuf>,
    /// Path or name of the claude CLI binary.
    #[serde(default = "default_claude_bin")]
    pub claude_bin: String,
    #[serde(default)]
    pub openrouter: OpenRouterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            agents_dir: None,
            sessions_dir: None,
            tasks_dir: None,
            runs_dir: None,
            claude_bin: default_claude_bin(),
            openrouter: OpenRouterConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenRouterConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openrouter_base_url")]
    pub base_url: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_openrouter_base_url(),
        }
    }
}

fn default_claude_bin() -> String {
    "claude".to_string()
}

fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents)?;
        Ok(serde_saphyr::from_str(&expanded)?)
    }

    pub fn claude_bin(&self) -> &str {
        &self.claude_bin
    }

    /// OpenRouter key: environment variable wins over the config file.
    pub fn openrouter_api_key(&self) -> String {
        std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| self.openrouter.api_key.clone())
    }

    pub fn openrouter_base_url(&self) -> &str {
        &self.openrouter.base_url
    }

    /// Resolved directory layout for a given config file location.
    pub fn paths(&self, config_path: &Path) -> WorkspacePaths {
        let workspace = resolve_path(
            config_path,
            self.workspace
                .as_deref()
                .unwrap_or(Path::new(DEFAULT_WORKSPACE)),
        );
        let dir = |explicit: &Option<PathBuf>, default: &str| match explicit {
            Some(path) => resolve_path(config_path, path),
            None => workspace.join(default),
        };

        WorkspacePaths {
            agents: dir(&self.agents_dir, DEFAULT_AGENTS_DIR),
            sessions: dir(&self.sessions_dir, DEFAULT_SESSIONS_DIR),
            tasks: dir(&self.tasks_dir, DEFAULT_TASKS_DIR),
            runs: dir(&self.runs_dir, DEFAULT_RUNS_DIR),
        }
    }
}

/// Resolved workspace directories.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub agents: PathBuf,
    pub sessions: PathBuf,
    pub tasks: PathBuf,
    pub runs: PathBuf,
}

/// Resolve a path relative to the config file directory.
pub fn resolve_path(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    config_dir.join(path)
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Shell-compatible syntax:
/// - `${VAR}` - required, errors if not set
/// - `${VAR:-default}` - optional with default
/// - `$$` - escaped `$`
///
/// No nested expansion; an unclosed `${` is an error.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' {
            match chars.peek() {
                Some('$') => {
                    chars.next();
                    result.push('$');
                }
                Some('{') => {
                    chars.next();
                    let expanded = parse_var_reference(&mut chars)?;
                    result.push_str(&expanded);
                }
                _ => {
                    result.push('$');
                }
            }
        } else {
            result.push(c);
        }
    }

    Ok(result)
}

/// Parse a variable reference after seeing `${`.
fn parse_var_reference(
    chars: &mut std::iter::Peekable<std::str::Chars>,
) -> Result<String, ConfigError> {
    let mut var_name = String::new();
    let mut default_value: Option<String> = None;
    let mut in_default = false;
    let mut found_closing_brace = false;

    while let Some(&c) = chars.peek() {
        match c {
            '}' => {
                chars.next();
                found_closing_brace = true;
                break;
            }
            ':' if !in_default => {
                chars.next();
                if chars.peek() == Some(&'-') {
                    chars.next();
                    in_default = true;
                    default_value = Some(String::new());
                } else {
                    var_name.push(':');
                }
            }
            _ => {
                chars.next();
                if in_default {
                    default_value.as_mut().unwrap().push(c);
                } else {
                    var_name.push(c);
                }
            }
        }
    }

    if !found_closing_brace {
        return Err(ConfigError::UnclosedVarReference);
    }

    match std::env::var(&var_name) {
        Ok(value) => Ok(value),
        Err(_) => match default_value {
            Some(default) => Ok(default),
            None => Err(ConfigError::MissingEnvVar(var_name)),
        },
    }
}
