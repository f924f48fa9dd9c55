//! File-based checkpoint store
//!
//! # Directory Structure
//!
//! ```text
//! checkpoints/
//! └── {thread_id}/
//!     ├── checkpoint_00000.json[.zst]
//!     ├── checkpoint_00001.json[.zst]
//!     └── checkpoint_00002.json[.zst]
//! ```
//!
//! Writes go to a temp file, are synced, then renamed into place.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{decode, encode, validate_thread_id, Checkpoint, CheckpointStore};
use crate::error::CheckpointError;

#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    base_path: PathBuf,
    /// Compress new checkpoints with zstd. Existing files are read in
    /// either form.
    compression: bool,
}

impl FileCheckpointStore {
    pub fn new(base_path: impl Into<PathBuf>, compression: bool) -> Self {
        Self {
            base_path: base_path.into(),
            compression,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn thread_path(&self, thread_id: &str) -> Result<PathBuf, CheckpointError> {
        validate_thread_id(thread_id)?;
        Ok(self.base_path.join(thread_id))
    }

    fn checkpoint_path(thread_path: &Path, step: usize, compressed: bool) -> PathBuf {
        let filename = if compressed {
            format!("checkpoint_{:05}.json.zst", step)
        } else {
            format!("checkpoint_{:05}.json", step)
        };
        thread_path.join(filename)
    }

    fn temp_path(thread_path: &Path, step: usize) -> PathBuf {
        thread_path.join(format!("checkpoint_{:05}.tmp", step))
    }

    /// Parse the step number from a checkpoint file name
    fn parse_step(path: &Path) -> Option<usize> {
        let filename = path.file_name()?.to_str()?;
        if !filename.ends_with(".json") && !filename.ends_with(".json.zst") {
            return None;
        }
        filename
            .strip_prefix("checkpoint_")?
            .split('.')
            .next()?
            .parse()
            .ok()
    }

    async fn read_file(path: &Path) -> Result<Vec<u8>, CheckpointError> {
        let mut file = fs::File::open(path)
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to open file: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to read file: {}", e)))?;
        Ok(data)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let thread_path = self.thread_path(&checkpoint.thread_id)?;
        fs::create_dir_all(&thread_path)
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to create directory: {}", e)))?;

        let data = encode(checkpoint, self.compression)?;
        let temp_path = Self::temp_path(&thread_path, checkpoint.step);
        let final_path = Self::checkpoint_path(&thread_path, checkpoint.step, self.compression);

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to create temp file: {}", e)))?;
        file.write_all(&data)
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to write data: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to sync file: {}", e)))?;

        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to rename file: {}", e)))?;

        // A step rewritten with the other compression setting must not
        // leave a stale sibling behind.
        let stale = Self::checkpoint_path(&thread_path, checkpoint.step, !self.compression);
        if stale.exists() {
            fs::remove_file(&stale)
                .await
                .map_err(|e| CheckpointError::io(format!("Failed to remove stale file: {}", e)))?;
        }

        Ok(())
    }

    async fn load_step(
        &self,
        thread_id: &str,
        step: usize,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        let thread_path = self.thread_path(thread_id)?;

        for compressed in [self.compression, !self.compression] {
            let path = Self::checkpoint_path(&thread_path, step, compressed);
            if !path.exists() {
                continue;
            }
            let data = Self::read_file(&path).await?;
            let checkpoint = decode(&data, compressed)?;
            if checkpoint.thread_id != thread_id {
                return Err(CheckpointError::ThreadMismatch {
                    expected: thread_id.to_string(),
                    found: checkpoint.thread_id,
                });
            }
            return Ok(Some(checkpoint));
        }

        Ok(None)
    }

    async fn steps(&self, thread_id: &str) -> Result<Vec<usize>, CheckpointError> {
        let thread_path = self.thread_path(thread_id)?;
        if !thread_path.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&thread_path)
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to read directory: {}", e)))?;

        let mut steps = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to read entry: {}", e)))?
        {
            if let Some(step) = Self::parse_step(&entry.path()) {
                steps.push(step);
            }
        }

        steps.sort_unstable();
        steps.dedup();
        Ok(steps)
    }

    async fn threads(&self) -> Result<Vec<String>, CheckpointError> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to read directory: {}", e)))?;

        let mut threads = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CheckpointError::io(format!("Failed to read entry: {}", e)))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_dir && validate_thread_id(&name).is_ok() && !self.steps(&name).await?.is_empty() {
                threads.push(name);
            }
        }

        threads.sort();
        Ok(threads)
    }

    async fn delete_step(&self, thread_id: &str, step: usize) -> Result<(), CheckpointError> {
        let thread_path = self.thread_path(thread_id)?;
        for compressed in [false, true] {
            let path = Self::checkpoint_path(&thread_path, step, compressed);
            if path.exists() {
                fs::remove_file(&path)
                    .await
                    .map_err(|e| CheckpointError::io(format!("Failed to delete file: {}", e)))?;
            }
        }
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointError> {
        let thread_path = self.thread_path(thread_id)?;
        if thread_path.exists() {
            fs::remove_dir_all(&thread_path)
                .await
                .map_err(|e| CheckpointError::io(format!("Failed to delete thread: {}", e)))?;
        }
        Ok(())
    }
}
