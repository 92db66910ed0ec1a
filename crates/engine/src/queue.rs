//! Persisted command queue.
//!
//! An ordered list of `{id, command}` entries stored as a JSON file. The
//! executor consumes the queue as its main-phase input but does not own
//! persistence: reordering or removing entries only changes the persisted
//! list, never a result that was already recorded.
//!
//! Loading validates every entry against the command schema. A file with
//! invalid or partial entries is rejected with the offending index; nothing
//! is ever executed with missing fields.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use quicksite_types::Command;

/// Environment variable overriding the queue file location.
pub const QUEUE_PATH_ENV: &str = "QUICKSITE_QUEUE_PATH";

/// Default filename for the persisted queue.
pub const QUEUE_FILE_NAME: &str = "queue.json";

/// Errors surfaced by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid queue entry at index {index}: {reason}")]
    InvalidEntry { index: usize, reason: String },
}

/// One queued command with its locally generated identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: u64,
    #[serde(flatten)]
    pub command: Command,
}

/// In-memory queue with stable ordering.
#[derive(Debug, Default)]
pub struct CommandQueue {
    entries: Vec<QueueEntry>,
    last_id: u64,
}

impl CommandQueue {
    /// Rebuild a queue from parsed entries, validating each one.
    fn from_entries(entries: Vec<QueueEntry>) -> Result<Self, QueueError> {
        for (index, entry) in entries.iter().enumerate() {
            if entry.command.name.trim().is_empty() {
                return Err(QueueError::InvalidEntry {
                    index,
                    reason: "command name is empty".into(),
                });
            }
        }
        let last_id = entries.iter().map(|entry| entry.id).max().unwrap_or(0);
        Ok(Self { entries, last_id })
    }

    /// Append a command; returns its generated id.
    ///
    /// Ids are millisecond timestamps bumped to stay strictly increasing, so
    /// two additions within the same millisecond remain distinct.
    pub fn add(&mut self, command: Command) -> u64 {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        let id = now_ms.max(self.last_id + 1);
        self.last_id = id;
        self.entries.push(QueueEntry { id, command });
        id
    }

    /// Remove an entry by id; returns whether it existed.
    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    /// Move an entry one position toward the front.
    pub fn move_up(&mut self, id: u64) -> bool {
        match self.entries.iter().position(|entry| entry.id == id) {
            Some(position) if position > 0 => {
                self.entries.swap(position, position - 1);
                true
            }
            _ => false,
        }
    }

    /// Move an entry one position toward the back.
    pub fn move_down(&mut self, id: u64) -> bool {
        match self.entries.iter().position(|entry| entry.id == id) {
            Some(position) if position + 1 < self.entries.len() => {
                self.entries.swap(position, position + 1);
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The queued commands in order, ready to run as a main phase.
    pub fn main_commands(&self) -> Vec<Command> {
        self.entries.iter().map(|entry| entry.command.clone()).collect()
    }
}

/// JSON file persistence for [`CommandQueue`].
#[derive(Debug, Clone)]
pub struct QueueStore {
    path: PathBuf,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve the queue location: `QUICKSITE_QUEUE_PATH`, then the user
    /// config dir, then the current directory.
    pub fn default_location() -> Self {
        if let Ok(path) = std::env::var(QUEUE_PATH_ENV) {
            return Self::new(path);
        }
        let base = dirs_next::config_dir()
            .map(|dir| dir.join("quicksite"))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join(QUEUE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the queue; a missing file is an empty queue.
    pub fn load(&self) -> Result<CommandQueue, QueueError> {
        if !self.path.exists() {
            return Ok(CommandQueue::default());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(CommandQueue::default());
        }

        // Parse loosely first so a single malformed entry reports its index
        // instead of a file-level type error.
        let raw_entries: Vec<Value> = serde_json::from_str(&content)?;
        let mut entries = Vec::with_capacity(raw_entries.len());
        for (index, raw) in raw_entries.into_iter().enumerate() {
            let entry: QueueEntry = serde_json::from_value(raw).map_err(|error| QueueError::InvalidEntry {
                index,
                reason: error.to_string(),
            })?;
            entries.push(entry);
        }
        debug!(count = entries.len(), path = %self.path.display(), "queue loaded");
        CommandQueue::from_entries(entries)
    }

    pub fn save(&self, queue: &CommandQueue) -> Result<(), QueueError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&queue.entries)?;
        fs::write(&self.path, content)?;
        debug!(count = queue.len(), path = %self.path.display(), "queue saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_command(name: &str) -> Command {
        Command::new(name)
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let mut queue = CommandQueue::default();
        let first = queue.add(sample_command("a"));
        let second = queue.add(sample_command("b"));
        let third = queue.add(sample_command("c"));
        assert!(first < second && second < third);
    }

    #[test]
    fn remove_and_reorder_affect_only_the_list() {
        let mut queue = CommandQueue::default();
        let a = queue.add(sample_command("a"));
        let b = queue.add(sample_command("b"));
        let c = queue.add(sample_command("c"));

        assert!(queue.move_up(b));
        assert_eq!(queue.entries()[0].id, b);
        assert!(!queue.move_up(b), "already at the front");

        assert!(queue.move_down(a));
        assert_eq!(queue.entries()[2].id, a);
        assert!(!queue.move_down(a), "already at the back");

        assert!(queue.remove(c));
        assert!(!queue.remove(c), "already removed");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn round_trip_through_store() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = QueueStore::new(dir.path().join("queue.json"));

        let mut queue = CommandQueue::default();
        let mut params = serde_json::Map::new();
        params.insert("route".into(), json!("blog"));
        queue.add(Command::with_params("addRoute", params));
        queue.add(sample_command("getRoutes"));
        store.save(&queue).expect("save");

        let loaded = store.load().expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.entries()[0].command.name, "addRoute");
        assert_eq!(loaded.entries()[0].command.params["route"], json!("blog"));

        // A fresh addition must not reuse an existing id.
        let mut loaded = loaded;
        let new_id = loaded.add(sample_command("editStyles"));
        assert!(loaded.entries().iter().filter(|entry| entry.id == new_id).count() == 1);
    }

    #[test]
    fn missing_file_is_an_empty_queue() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = QueueStore::new(dir.path().join("nope.json"));
        assert!(store.load().expect("load").is_empty());
    }

    #[test]
    fn invalid_entries_are_rejected_with_their_index() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("queue.json");
        fs::write(&path, r#"[{"id": 1, "command": "ok"}, {"id": 2, "params": {}}]"#).expect("write");

        let error = QueueStore::new(&path).load().expect_err("partial entry must be rejected");
        match error {
            QueueError::InvalidEntry { index, .. } => assert_eq!(index, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_command_names_are_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("queue.json");
        fs::write(&path, r#"[{"id": 1, "command": "  "}]"#).expect("write");

        let error = QueueStore::new(&path).load().expect_err("blank name must be rejected");
        assert!(matches!(error, QueueError::InvalidEntry { index: 0, .. }));
    }
}
