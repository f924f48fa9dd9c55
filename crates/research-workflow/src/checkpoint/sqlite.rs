//! SQLite checkpoint store
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS checkpoints (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     thread_id TEXT NOT NULL,
//!     step INTEGER NOT NULL,
//!     stage TEXT NOT NULL,
//!     compressed INTEGER NOT NULL,
//!     data BLOB NOT NULL,
//!     created_at TEXT NOT NULL,
//!     UNIQUE(thread_id, step)
//! );
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use tokio_rusqlite::Connection;

use super::{decode, encode, validate_thread_id, Checkpoint, CheckpointStore};
use crate::error::CheckpointError;

#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    conn: Arc<Connection>,
    compression: bool,
}

impl SqliteCheckpointStore {
    /// Open (or create) a store. `path` may be `:memory:`.
    pub async fn new(path: impl AsRef<str>) -> Result<Self, CheckpointError> {
        Self::with_compression(path, false).await
    }

    pub async fn with_compression(
        path: impl AsRef<str>,
        compression: bool,
    ) -> Result<Self, CheckpointError> {
        let conn = Connection::open(path.as_ref())
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to open SQLite: {}", e)))?;

        conn.call(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS checkpoints (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    thread_id TEXT NOT NULL,
                    step INTEGER NOT NULL,
                    stage TEXT NOT NULL,
                    compressed INTEGER NOT NULL,
                    data BLOB NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE(thread_id, step)
                );
                CREATE INDEX IF NOT EXISTS idx_thread_step
                    ON checkpoints(thread_id, step);
                "#,
            )?;
            Ok(())
        })
        .await
        .map_err(|e| CheckpointError::io(format!("Failed to create schema: {}", e)))?;

        Ok(Self {
            conn: Arc::new(conn),
            compression,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        validate_thread_id(&checkpoint.thread_id)?;
        let data = encode(checkpoint, self.compression)?;
        let thread_id = checkpoint.thread_id.clone();
        let step = checkpoint.step as i64;
        let stage = checkpoint.stage.name().to_string();
        let compressed = self.compression;
        let created_at = checkpoint.timestamp.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO checkpoints
                        (thread_id, step, stage, compressed, data, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    rusqlite::params![thread_id, step, stage, compressed, data, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to save checkpoint: {}", e)))
    }

    async fn load_step(
        &self,
        thread_id: &str,
        step: usize,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        let id = thread_id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT compressed, data FROM checkpoints WHERE thread_id = ?1 AND step = ?2",
                )?;
                let mut rows = stmt.query(rusqlite::params![id, step as i64])?;
                if let Some(row) = rows.next()? {
                    let compressed: bool = row.get(0)?;
                    let data: Vec<u8> = row.get(1)?;
                    Ok(Some((compressed, data)))
                } else {
                    Ok(None)
                }
            })
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to load checkpoint: {}", e)))?;

        match row {
            Some((compressed, data)) => decode(&data, compressed).map(Some),
            None => Ok(None),
        }
    }

    async fn steps(&self, thread_id: &str) -> Result<Vec<usize>, CheckpointError> {
        let id = thread_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT step FROM checkpoints WHERE thread_id = ?1 ORDER BY step ASC")?;
                let rows = stmt.query_map(rusqlite::params![id], |row| {
                    let step: i64 = row.get(0)?;
                    Ok(step as usize)
                })?;

                let mut steps = Vec::new();
                for row in rows {
                    steps.push(row?);
                }
                Ok(steps)
            })
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to list checkpoints: {}", e)))
    }

    async fn threads(&self) -> Result<Vec<String>, CheckpointError> {
        self.conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT DISTINCT thread_id FROM checkpoints ORDER BY thread_id")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

                let mut threads = Vec::new();
                for row in rows {
                    threads.push(row?);
                }
                Ok(threads)
            })
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to list threads: {}", e)))
    }

    async fn delete_step(&self, thread_id: &str, step: usize) -> Result<(), CheckpointError> {
        let id = thread_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM checkpoints WHERE thread_id = ?1 AND step = ?2",
                    rusqlite::params![id, step as i64],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to delete checkpoint: {}", e)))
    }

    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointError> {
        let id = thread_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM checkpoints WHERE thread_id = ?1",
                    rusqlite::params![id],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to delete thread: {}", e)))
    }
}
