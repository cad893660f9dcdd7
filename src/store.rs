//! Task persistence.
//!
//! The orchestrator reports job state through the [`TaskStore`] trait: `create` once at
//! submission, `update` on every status change, and `get` for readers. [`FileTaskStore`] keeps
//! one JSON document per task; [`MemoryTaskStore`] backs tests and one-shot CLI runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Error surfaced to readers of a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Taxonomy name such as `UnreadableStructure`.
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Submitted job document.
    pub request: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>, request: Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: TaskStatus::Queued,
            created_at: now,
            updated_at: now,
            request,
            result: None,
            error: None,
        }
    }

    fn apply(&mut self, update: TaskUpdate) {
        self.status = update.status;
        self.updated_at = Utc::now();
        if update.result.is_some() {
            self.result = update.result;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
    }
}

/// Status change plus optional result metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<TaskError>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status,
            result: None,
            error: None,
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, kind: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(TaskError {
            kind: kind.into(),
            message: message.into(),
        });
        self
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task '{0}' does not exist")]
    UnknownTask(String),
    #[error("task '{0}' already exists")]
    AlreadyExists(String),
    #[error("invalid task id '{0}'")]
    InvalidId(String),
    #[error("failed to access task file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt task file '{}': {source}", path.display())]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("task store lock poisoned")]
    Poisoned,
}

impl<T> From<PoisonError<T>> for StoreError {
    fn from(_: PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}

pub trait TaskStore: Send + Sync {
    fn create(&self, record: TaskRecord) -> Result<(), StoreError>;

    /// Applies `update` and returns the stored record.
    fn update(&self, id: &str, update: TaskUpdate) -> Result<TaskRecord, StoreError>;

    fn get(&self, id: &str) -> Result<Option<TaskRecord>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    records: Mutex<HashMap<String, TaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn create(&self, record: TaskRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock()?;
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    fn update(&self, id: &str, update: TaskUpdate) -> Result<TaskRecord, StoreError> {
        let mut records = self.records.lock()?;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownTask(id.to_string()))?;
        record.apply(update);
        Ok(record.clone())
    }

    fn get(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.records.lock()?.get(id).cloned())
    }
}

/// One `<id>.json` file per task, replaced atomically on every write.
#[derive(Debug)]
pub struct FileTaskStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileTaskStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    fn read(&self, path: &Path) -> Result<Option<TaskRecord>, StoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Serde {
                path: path.to_path_buf(),
                source,
            })
    }

    fn write(&self, path: &Path, record: &TaskRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Serde {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        let io_error = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        fs::write(&tmp, &payload).map_err(io_error)?;
        fs::rename(&tmp, path).map_err(io_error)?;
        debug!(task = %record.id, status = %record.status, "persisted task record");
        Ok(())
    }
}

impl TaskStore for FileTaskStore {
    fn create(&self, record: TaskRecord) -> Result<(), StoreError> {
        let _guard = self.lock.lock()?;
        let path = self.path_for(&record.id)?;
        if path.exists() {
            return Err(StoreError::AlreadyExists(record.id));
        }
        self.write(&path, &record)
    }

    fn update(&self, id: &str, update: TaskUpdate) -> Result<TaskRecord, StoreError> {
        let _guard = self.lock.lock()?;
        let path = self.path_for(id)?;
        let mut record = self
            .read(&path)?
            .ok_or_else(|| StoreError::UnknownTask(id.to_string()))?;
        record.apply(update);
        self.write(&path, &record)?;
        Ok(record)
    }

    fn get(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let _guard = self.lock.lock()?;
        self.read(&self.path_for(id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn exercise(store: &dyn TaskStore) {
        store
            .create(TaskRecord::new("job-1", json!({"target": "t.pdb"})))
            .unwrap();
        assert!(matches!(
            store.create(TaskRecord::new("job-1", Value::Null)),
            Err(StoreError::AlreadyExists(_))
        ));

        store
            .update("job-1", TaskUpdate::status(TaskStatus::Running))
            .unwrap();
        let done = store
            .update(
                "job-1",
                TaskUpdate::status(TaskStatus::Succeeded).with_result(json!({"resolved": 2})),
            )
            .unwrap();
        assert_eq!(done.status, TaskStatus::Succeeded);

        let stored = store.get("job-1").unwrap().unwrap();
        assert_eq!(stored.result, Some(json!({"resolved": 2})));
        assert_eq!(stored.request, json!({"target": "t.pdb"}));
        assert!(stored.updated_at >= stored.created_at);

        assert!(store.get("job-2").unwrap().is_none());
        assert!(matches!(
            store.update("job-2", TaskUpdate::status(TaskStatus::Failed)),
            Err(StoreError::UnknownTask(_))
        ));
    }

    #[test]
    fn memory_store_supports_create_update_get() {
        exercise(&MemoryTaskStore::new());
    }

    #[test]
    fn file_store_supports_create_update_get() {
        let dir = TempDir::new().unwrap();
        exercise(&FileTaskStore::open(dir.path()).unwrap());
    }

    #[test]
    fn file_store_survives_reopening() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileTaskStore::open(dir.path()).unwrap();
            store.create(TaskRecord::new("abc", Value::Null)).unwrap();
            store
                .update(
                    "abc",
                    TaskUpdate::status(TaskStatus::Failed)
                        .with_error("EmptyStructure", "no polymer chains"),
                )
                .unwrap();
        }

        let reopened = FileTaskStore::open(dir.path()).unwrap();
        let record = reopened.get("abc").unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.unwrap().kind, "EmptyStructure");
        assert!(!dir.path().join("abc.json.tmp").exists());
    }

    #[test]
    fn file_store_rejects_path_like_ids() {
        let dir = TempDir::new().unwrap();
        let store = FileTaskStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.get("../escape"),
            Err(StoreError::InvalidId(_))
        ));
    }

    #[test]
    fn task_status_terminal_states() {
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }
}
