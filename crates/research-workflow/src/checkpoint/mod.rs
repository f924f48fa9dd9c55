//! Checkpoint persistence for research sessions
//!
//! The engine writes one checkpoint after every stage transition. A
//! checkpoint holds the full [`SessionState`] plus the cursor the router
//! chose, so a later run resumes exactly where the last one stopped.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                CheckpointStore                │
//! │   ┌──────────┐   ┌──────────┐   ┌──────────┐  │
//! │   │  Memory  │   │   File   │   │  SQLite  │  │
//! │   └──────────┘   └──────────┘   └──────────┘  │
//! │         └──────────────┼──────────────┘       │
//! │                        ▼                      │
//! │      Checkpoint { thread_id, step, state }    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use research_workflow::checkpoint::{create_store, CheckpointerConfig};
//!
//! let store = create_store(CheckpointerConfig::File {
//!     path: PathBuf::from("./checkpoints"),
//!     compression: true,
//! })
//! .await?;
//!
//! if let Some(checkpoint) = store.load("thread-42").await? {
//!     println!("{} is at step {}", checkpoint.thread_id, checkpoint.step);
//! }
//! ```

mod file;
#[cfg(feature = "checkpointer-sqlite")]
mod sqlite;

pub use file::FileCheckpointStore;
#[cfg(feature = "checkpointer-sqlite")]
pub use sqlite::SqliteCheckpointStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::CheckpointError;
use crate::state::{Cursor, SessionState, Stage, StageOutcome};

/// Snapshot of a session after one transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,

    /// Monotonic per thread, starting at 0
    pub step: usize,

    /// Stage that just ran
    pub stage: Stage,

    pub outcome: StageOutcome,

    /// Where the session goes next
    pub next: Cursor,

    pub state: SessionState,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Checkpoint {
    pub fn new(
        step: usize,
        stage: Stage,
        outcome: StageOutcome,
        next: Cursor,
        state: SessionState,
    ) -> Self {
        Self {
            thread_id: state.thread_id.clone(),
            step,
            stage,
            outcome,
            next,
            state,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.next, Cursor::Finished(_))
    }
}

/// Durable keyed storage for checkpoints.
///
/// Backends implement the per-step primitives; thread-level operations
/// have default implementations on top of them.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Save a checkpoint. Writes must be atomic: a reader sees either the
    /// previous state or the new one.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Load one step of a thread.
    async fn load_step(
        &self,
        thread_id: &str,
        step: usize,
    ) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Step numbers stored for a thread, sorted ascending.
    async fn steps(&self, thread_id: &str) -> Result<Vec<usize>, CheckpointError>;

    /// All thread ids with at least one checkpoint, sorted.
    async fn threads(&self) -> Result<Vec<String>, CheckpointError>;

    async fn delete_step(&self, thread_id: &str, step: usize) -> Result<(), CheckpointError>;

    /// Latest checkpoint of a thread.
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        match self.steps(thread_id).await?.last() {
            Some(&step) => self.load_step(thread_id, step).await,
            None => Ok(None),
        }
    }

    /// Every checkpoint of a thread in step order.
    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        let mut checkpoints = Vec::new();
        for step in self.steps(thread_id).await? {
            if let Some(checkpoint) = self.load_step(thread_id, step).await? {
                checkpoints.push(checkpoint);
            }
        }
        Ok(checkpoints)
    }

    /// Remove a thread entirely.
    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointError> {
        for step in self.steps(thread_id).await? {
            self.delete_step(thread_id, step).await?;
        }
        Ok(())
    }

    /// Keep only the most recent `keep` checkpoints of a thread.
    async fn prune(&self, thread_id: &str, keep: usize) -> Result<usize, CheckpointError> {
        let steps = self.steps(thread_id).await?;
        let to_delete = steps.len().saturating_sub(keep);
        for &step in steps.iter().take(to_delete) {
            self.delete_step(thread_id, step).await?;
        }
        Ok(to_delete)
    }
}

/// Configuration for creating checkpoint stores.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CheckpointerConfig {
    /// In-memory (tests and one-shot runs, not durable)
    #[default]
    Memory,

    /// One directory per thread under `path`
    File {
        path: PathBuf,
        /// Compress checkpoint files with zstd
        compression: bool,
    },

    /// SQLite database (requires `checkpointer-sqlite` feature)
    #[cfg(feature = "checkpointer-sqlite")]
    Sqlite {
        /// Database file, or `:memory:`
        path: String,
        compression: bool,
    },
}

/// Create a checkpoint store from configuration.
pub async fn create_store(
    config: CheckpointerConfig,
) -> Result<Arc<dyn CheckpointStore>, CheckpointError> {
    match config {
        CheckpointerConfig::Memory => Ok(Arc::new(MemoryCheckpointStore::new())),

        CheckpointerConfig::File { path, compression } => {
            Ok(Arc::new(FileCheckpointStore::new(path, compression)))
        }

        #[cfg(feature = "checkpointer-sqlite")]
        CheckpointerConfig::Sqlite { path, compression } => {
            let store = SqliteCheckpointStore::with_compression(&path, compression).await?;
            Ok(Arc::new(store))
        }
    }
}

/// In-memory checkpoint store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    threads: tokio::sync::RwLock<HashMap<String, BTreeMap<usize, Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        validate_thread_id(&checkpoint.thread_id)?;
        let mut threads = self.threads.write().await;
        threads
            .entry(checkpoint.thread_id.clone())
            .or_default()
            .insert(checkpoint.step, checkpoint.clone());
        Ok(())
    }

    async fn load_step(
        &self,
        thread_id: &str,
        step: usize,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).and_then(|t| t.get(&step)).cloned())
    }

    async fn steps(&self, thread_id: &str) -> Result<Vec<usize>, CheckpointError> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(thread_id)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn threads(&self) -> Result<Vec<String>, CheckpointError> {
        let threads = self.threads.read().await;
        let mut ids: Vec<String> = threads
            .iter()
            .filter(|(_, steps)| !steps.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete_step(&self, thread_id: &str, step: usize) -> Result<(), CheckpointError> {
        let mut threads = self.threads.write().await;
        if let Some(steps) = threads.get_mut(thread_id) {
            steps.remove(&step);
            if steps.is_empty() {
                threads.remove(thread_id);
            }
        }
        Ok(())
    }
}

/// Thread ids become directory names and database keys: ASCII letters,
/// digits, `-`, `_` and `.`, not starting with `.`.
pub fn validate_thread_id(thread_id: &str) -> Result<(), CheckpointError> {
    let valid = !thread_id.is_empty()
        && thread_id.len() <= 128
        && !thread_id.starts_with('.')
        && thread_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::InvalidThreadId(thread_id.to_string()))
    }
}

/// Serialize a checkpoint, optionally zstd-compressed
fn encode(checkpoint: &Checkpoint, compression: bool) -> Result<Vec<u8>, CheckpointError> {
    let json = serde_json::to_vec_pretty(checkpoint)
        .map_err(|e| CheckpointError::serialization(format!("Serialization failed: {}", e)))?;
    if !compression {
        return Ok(json);
    }

    let mut encoder = zstd::stream::Encoder::new(Vec::new(), 3)
        .map_err(|e| CheckpointError::io(format!("Compression init failed: {}", e)))?;
    encoder
        .write_all(&json)
        .map_err(|e| CheckpointError::io(format!("Compression write failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| CheckpointError::io(format!("Compression finish failed: {}", e)))
}

fn decode(data: &[u8], compressed: bool) -> Result<Checkpoint, CheckpointError> {
    let json = if compressed {
        zstd::stream::decode_all(data)
            .map_err(|e| CheckpointError::io(format!("Decompression failed: {}", e)))?
    } else {
        data.to_vec()
    };
    serde_json::from_slice(&json)
        .map_err(|e| CheckpointError::serialization(format!("Deserialization failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionStatus;

    pub(crate) fn sample(thread_id: &str, step: usize) -> Checkpoint {
        let state = SessionState::new(thread_id, "how do heat pumps work", 3);
        Checkpoint::new(
            step,
            Stage::Plan,
            StageOutcome::ok(),
            Cursor::Pending(Stage::Search),
            state,
        )
    }

    #[test]
    fn test_checkpoint_creation() {
        let checkpoint = sample("thread-1", 4).with_metadata("version", "1");
        assert_eq!(checkpoint.thread_id, "thread-1");
        assert_eq!(checkpoint.step, 4);
        assert!(!checkpoint.is_terminal());
        assert_eq!(checkpoint.metadata.get("version"), Some(&"1".to_string()));
    }

    #[test]
    fn test_terminal_checkpoint() {
        let mut checkpoint = sample("thread-1", 9);
        checkpoint.next = Cursor::Finished(SessionStatus::Success);
        assert!(checkpoint.is_terminal());
    }

    #[test]
    fn test_validate_thread_id() {
        assert!(validate_thread_id("3f2b9c1e-7a4d-4e8b-9c1d-2f3a4b5c6d7e").is_ok());
        assert!(validate_thread_id("my_thread.v2").is_ok());
        assert!(validate_thread_id("").is_err());
        assert!(validate_thread_id("../etc").is_err());
        assert!(validate_thread_id("a/b").is_err());
        assert!(validate_thread_id(".hidden").is_err());
    }

    #[test]
    fn test_encode_decode_compressed() {
        let checkpoint = sample("thread-1", 2);
        let bytes = encode(&checkpoint, true).unwrap();
        assert_eq!(decode(&bytes, true).unwrap(), checkpoint);
    }

    #[tokio::test]
    async fn test_memory_store_latest_and_history() {
        let store = MemoryCheckpointStore::new();
        for step in [2, 0, 1] {
            store.save(&sample("thread-a", step)).await.unwrap();
        }
        store.save(&sample("thread-b", 0)).await.unwrap();

        let latest = store.load("thread-a").await.unwrap().unwrap();
        assert_eq!(latest.step, 2);

        let history = store.history("thread-a").await.unwrap();
        let steps: Vec<usize> = history.iter().map(|c| c.step).collect();
        assert_eq!(steps, vec![0, 1, 2]);

        assert_eq!(store.threads().await.unwrap(), vec!["thread-a", "thread-b"]);
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_delete_and_prune() {
        let store = MemoryCheckpointStore::new();
        for step in 0..5 {
            store.save(&sample("thread-a", step)).await.unwrap();
        }

        assert_eq!(store.prune("thread-a", 2).await.unwrap(), 3);
        assert_eq!(store.steps("thread-a").await.unwrap(), vec![3, 4]);

        store.delete("thread-a").await.unwrap();
        assert!(store.threads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_rejects_bad_thread_id() {
        let store = MemoryCheckpointStore::new();
        let err = store.save(&sample("../escape", 0)).await.unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidThreadId(_)));
    }

    #[tokio::test]
    async fn test_create_store_memory() {
        let store = create_store(CheckpointerConfig::Memory).await.unwrap();
        store.save(&sample("thread-z", 0)).await.unwrap();
        assert_eq!(store.steps("thread-z").await.unwrap(), vec![0]);
    }
}
