//! Session persistence.
//!
//! One JSON file per session id. Active sessions live directly under the
//! sessions directory; archived sessions are moved to an `archive/`
//! subdirectory. `save` is an idempotent full overwrite via a temp file and
//! atomic rename.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tracing::warn;

use super::SessionState;

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during file operations.
    #[error("I/O error at {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error deserializing file contents.
    #[error("deserialization error at {path}: {message}")]
    FileDeserialization { path: PathBuf, message: String },

    /// Error serializing data.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Entity not found.
    #[error("{entity_type} not found: {id}")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },
}

impl StorageError {
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }

    pub fn file_deserialization(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::FileDeserialization {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }
}

/// Convenience type alias for storage results.
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence abstraction for session state.
///
/// `FileSessionStore` and `MemorySessionStore` must behave identically at
/// this interface; tests swap one for the other.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist the full state, overwriting any previous version.
    async fn save(&self, state: &SessionState) -> StorageResult<()>;

    /// Load a session by id, active or archived.
    async fn load(&self, id: &str) -> StorageResult<SessionState>;

    /// All active sessions. Unreadable entries are skipped with a warning.
    async fn list(&self) -> StorageResult<Vec<SessionState>>;

    /// All archived sessions.
    async fn list_archived(&self) -> StorageResult<Vec<SessionState>>;

    /// Move a session to the archived namespace.
    async fn archive(&self, id: &str) -> StorageResult<()>;

    /// Move a session back to the active namespace.
    async fn restore(&self, id: &str) -> StorageResult<()>;

    /// Remove a session entirely. Deleting a missing session is not an error.
    async fn delete(&self, id: &str) -> StorageResult<()>;
}

// ============================================================================
// File-backed store
// ============================================================================

/// File-based implementation of `SessionStore`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    sessions_dir: PathBuf,
}

impl FileSessionStore {
    /// Create a store rooted at `sessions_dir`. Directories are created on
    /// first write.
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }

    fn active_path(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{id}.json"))
    }

    fn archive_dir(&self) -> PathBuf {
        self.sessions_dir.join("archive")
    }

    fn archived_path(&self, id: &str) -> PathBuf {
        self.archive_dir().join(format!("{id}.json"))
    }

    async fn write_atomic(&self, path: &PathBuf, state: &SessionState) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::file_io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| StorageError::serialization(e.to_string()))?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json.as_bytes())
            .await
            .map_err(|e| StorageError::file_io(&temp_path, e))?;
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StorageError::file_io(path, e))?;

        Ok(())
    }

    async fn read_state(&self, path: &PathBuf) -> StorageResult<Option<SessionState>> {
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::file_io(path, e)),
        };
        let state = serde_json::from_str(&contents)
            .map_err(|e| StorageError::file_deserialization(path, e.to_string()))?;
        Ok(Some(state))
    }

    async fn list_dir(&self, dir: &PathBuf) -> StorageResult<Vec<SessionState>> {
        let mut sessions = Vec::new();

        let mut entries = match fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::file_io(dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_state(&path).await {
                Ok(Some(state)) => sessions.push(state),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable session");
                }
            }
        }

        Ok(sessions)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, state: &SessionState) -> StorageResult<()> {
        // An archived session saves in place; everything else is active.
        let path = if fs::try_exists(self.archived_path(&state.id))
            .await
            .unwrap_or(false)
        {
            self.archived_path(&state.id)
        } else {
            self.active_path(&state.id)
        };
        self.write_atomic(&path, state).await
    }

    async fn load(&self, id: &str) -> StorageResult<SessionState> {
        if let Some(state) = self.read_state(&self.active_path(id)).await? {
            return Ok(state);
        }
        if let Some(state) = self.read_state(&self.archived_path(id)).await? {
            return Ok(state);
        }
        Err(StorageError::not_found("session", id))
    }

    async fn list(&self) -> StorageResult<Vec<SessionState>> {
        self.list_dir(&self.sessions_dir).await
    }

    async fn list_archived(&self) -> StorageResult<Vec<SessionState>> {
        self.list_dir(&self.archive_dir()).await
    }

    async fn archive(&self, id: &str) -> StorageResult<()> {
        let active = self.active_path(id);
        let archived = self.archived_path(id);

        if fs::try_exists(&archived).await.unwrap_or(false) {
            return Ok(());
        }
        if !fs::try_exists(&active).await.unwrap_or(false) {
            return Err(StorageError::not_found("session", id));
        }

        fs::create_dir_all(self.archive_dir())
            .await
            .map_err(|e| StorageError::file_io(self.archive_dir(), e))?;
        fs::rename(&active, &archived)
            .await
            .map_err(|e| StorageError::file_io(&archived, e))
    }

    async fn restore(&self, id: &str) -> StorageResult<()> {
        let active = self.active_path(id);
        let archived = self.archived_path(id);

        if fs::try_exists(&active).await.unwrap_or(false) {
            return Ok(());
        }
        if !fs::try_exists(&archived).await.unwrap_or(false) {
            return Err(StorageError::not_found("session", id));
        }

        fs::rename(&archived, &active)
            .await
            .map_err(|e| StorageError::file_io(&active, e))
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        for path in [self.active_path(id), self.archived_path(id)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::file_io(&path, e)),
            }
        }
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory implementation of `SessionStore`. No disk I/O; use in tests.
#[derive(Default)]
pub struct MemorySessionStore {
    active: Mutex<HashMap<String, SessionState>>,
    archived: Mutex<HashMap<String, SessionState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, state: &SessionState) -> StorageResult<()> {
        let mut archived = self.archived.lock().unwrap();
        if archived.contains_key(&state.id) {
            archived.insert(state.id.clone(), state.clone());
        } else {
            drop(archived);
            self.active
                .lock()
                .unwrap()
                .insert(state.id.clone(), state.clone());
        }
        Ok(())
    }

    async fn load(&self, id: &str) -> StorageResult<SessionState> {
        if let Some(state) = self.active.lock().unwrap().get(id) {
            return Ok(state.clone());
        }
        if let Some(state) = self.archived.lock().unwrap().get(id) {
            return Ok(state.clone());
        }
        Err(StorageError::not_found("session", id))
    }

    async fn list(&self) -> StorageResult<Vec<SessionState>> {
        Ok(self.active.lock().unwrap().values().cloned().collect())
    }

    async fn list_archived(&self) -> StorageResult<Vec<SessionState>> {
        Ok(self.archived.lock().unwrap().values().cloned().collect())
    }

    async fn archive(&self, id: &str) -> StorageResult<()> {
        if self.archived.lock().unwrap().contains_key(id) {
            return Ok(());
        }
        let state = self
            .active
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| StorageError::not_found("session", id))?;
        self.archived.lock().unwrap().insert(id.to_string(), state);
        Ok(())
    }

    async fn restore(&self, id: &str) -> StorageResult<()> {
        if self.active.lock().unwrap().contains_key(id) {
            return Ok(());
        }
        let state = self
            .archived
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| StorageError::not_found("session", id))?;
        self.active.lock().unwrap().insert(id.to_string(), state);
        Ok(())
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        self.active.lock().unwrap().remove(id);
        self.archived.lock().unwrap().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Message, Role, SessionSource};
    use chrono::Utc;
    use tempfile::TempDir;

    fn test_state(id: &str) -> SessionState {
        let now = Utc::now();
        SessionState {
            id: id.to_string(),
            title: "Test session".to_string(),
            agent_id: "assistant".to_string(),
            provider_id: "mock".to_string(),
            model: "test-model".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: "hello".to_string(),
                tool_calls: Vec::new(),
                timestamp: now,
            }],
            sticky: false,
            source: SessionSource::Manual,
            task_name: None,
            created_at: now,
            updated_at: now,
            resumption_handle: Some("handle-1".to_string()),
        }
    }

    async fn round_trip(store: &dyn SessionStore) {
        let state = test_state("s1");
        store.save(&state).await.unwrap();

        let loaded = store.load("s1").await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = FileSessionStore::new(temp.path().join("sessions"));
        round_trip(&store).await;
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        round_trip(&MemorySessionStore::new()).await;
    }

    #[tokio::test]
    async fn save_overwrites_previous_version() {
        let store = MemorySessionStore::new();
        let mut state = test_state("s1");
        store.save(&state).await.unwrap();

        state.title = "Renamed".to_string();
        store.save(&state).await.unwrap();

        let loaded = store.load("s1").await.unwrap();
        assert_eq!(loaded.title, "Renamed");
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = FileSessionStore::new(temp.path().join("sessions"));

        let err = store.load("missing").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn archive_moves_out_of_active_list() {
        let temp = TempDir::new().unwrap();
        let store = FileSessionStore::new(temp.path().join("sessions"));
        store.save(&test_state("s1")).await.unwrap();

        store.archive("s1").await.unwrap();

        assert!(store.list().await.unwrap().is_empty());
        let archived = store.list_archived().await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].id, "s1");

        // Still loadable by id
        assert_eq!(store.load("s1").await.unwrap().id, "s1");
    }

    #[tokio::test]
    async fn restore_moves_back_to_active() {
        let store = MemorySessionStore::new();
        store.save(&test_state("s1")).await.unwrap();
        store.archive("s1").await.unwrap();

        store.restore("s1").await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.list_archived().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn archive_missing_is_not_found() {
        let store = MemorySessionStore::new();
        let err = store.archive("missing").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn save_keeps_archived_session_archived() {
        let store = MemorySessionStore::new();
        let mut state = test_state("s1");
        store.save(&state).await.unwrap();
        store.archive("s1").await.unwrap();

        state.title = "Updated while archived".to_string();
        store.save(&state).await.unwrap();

        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(store.list_archived().await.unwrap().len(), 1);
        assert_eq!(store.load("s1").await.unwrap().title, "Updated while archived");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = FileSessionStore::new(temp.path().join("sessions"));
        store.save(&test_state("s1")).await.unwrap();

        store.delete("s1").await.unwrap();
        store.delete("s1").await.unwrap();

        assert!(matches!(
            store.load("s1").await.unwrap_err(),
            StorageError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn list_skips_unreadable_files() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("sessions");
        let store = FileSessionStore::new(&dir);
        store.save(&test_state("s1")).await.unwrap();

        tokio::fs::write(dir.join("garbage.json"), b"not json")
            .await
            .unwrap();

        let sessions = store.list().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "s1");
    }
}
