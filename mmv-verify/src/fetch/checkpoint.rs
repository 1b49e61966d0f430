//! Checkpoint persistence
//!
//! The batch fetcher only knows the [`CheckpointStore`] contract: read
//! before start, write after each record (and on cancellation), discard on
//! successful completion. Files are written atomically so a crash mid-write
//! leaves the previous checkpoint intact.

use crate::error::{VerifyError, VerifyResult};
use crate::types::Checkpoint;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Persistence interface for batch checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Checkpoint of a previous run of `batch_id`, if any
    async fn load(&self, batch_id: &str) -> VerifyResult<Option<Checkpoint>>;

    /// Replace the stored checkpoint
    async fn save(&self, checkpoint: &Checkpoint) -> VerifyResult<()>;

    /// Remove the checkpoint after the batch completed
    async fn discard(&self, batch_id: &str) -> VerifyResult<()>;
}

/// One JSON file per batch: `<dir>/<batch_id>.checkpoint.json`
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a batch; ids are restricted to a safe file-name alphabet
    pub fn path_for(&self, batch_id: &str) -> VerifyResult<PathBuf> {
        let valid = !batch_id.is_empty()
            && batch_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !batch_id.starts_with('.');
        if !valid {
            return Err(VerifyError::Checkpoint(format!(
                "batch id '{}' is not usable as a file name",
                batch_id
            )));
        }
        Ok(self.dir.join(format!("{}.checkpoint.json", batch_id)))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, batch_id: &str) -> VerifyResult<Option<Checkpoint>> {
        let path = self.path_for(batch_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let checkpoint: Checkpoint = serde_json::from_slice(&bytes).map_err(|e| {
            VerifyError::Checkpoint(format!("{} is corrupt: {}", path.display(), e))
        })?;
        if checkpoint.batch_id != batch_id {
            return Err(VerifyError::Checkpoint(format!(
                "{} belongs to batch '{}'",
                path.display(),
                checkpoint.batch_id
            )));
        }

        info!(
            batch_id = %batch_id,
            processed = checkpoint.processed_ids().len(),
            "Loaded checkpoint"
        );
        Ok(Some(checkpoint))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> VerifyResult<()> {
        let path = self.path_for(&checkpoint.batch_id)?;
        let bytes = serde_json::to_vec_pretty(checkpoint)?;

        tokio::task::spawn_blocking(move || mmv_common::config::write_atomic(&path, &bytes))
            .await
            .map_err(|e| VerifyError::Task(format!("checkpoint writer panicked: {}", e)))??;

        debug!(
            batch_id = %checkpoint.batch_id,
            processed = checkpoint.processed_ids().len(),
            "Checkpoint saved"
        );
        Ok(())
    }

    async fn discard(&self, batch_id: &str) -> VerifyResult<()> {
        let path = self.path_for(batch_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(batch_id = %batch_id, "Checkpoint discarded");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store, for tests and embedders with their own persistence
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an existing checkpoint
    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        let mut map = HashMap::new();
        map.insert(checkpoint.batch_id.clone(), checkpoint);
        Self {
            checkpoints: Mutex::new(map),
        }
    }

    pub async fn get(&self, batch_id: &str) -> Option<Checkpoint> {
        self.checkpoints.lock().await.get(batch_id).cloned()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, batch_id: &str) -> VerifyResult<Option<Checkpoint>> {
        Ok(self.get(batch_id).await)
    }

    async fn save(&self, checkpoint: &Checkpoint) -> VerifyResult<()> {
        self.checkpoints
            .lock()
            .await
            .insert(checkpoint.batch_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn discard(&self, batch_id: &str) -> VerifyResult<()> {
        self.checkpoints.lock().await.remove(batch_id);
        Ok(())
    }
}
