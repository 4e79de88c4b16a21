use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::{PipelineError, Result};

/// Durable progress marker for one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stage: String,
    /// Id of the last item visited in this session
    pub cursor: Option<String>,
    pub processed_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub review_count: u64,
    pub per_platform_counts: BTreeMap<String, u64>,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(stage: impl Into<String>, session_id: Uuid) -> Self {
        Self {
            stage: stage.into(),
            cursor: None,
            processed_count: 0,
            success_count: 0,
            failure_count: 0,
            review_count: 0,
            per_platform_counts: BTreeMap::new(),
            session_id,
            timestamp: Utc::now(),
        }
    }
}

/// Persistence for checkpoints; `save` must be all-or-nothing
pub trait CheckpointStore: Send + Sync {
    fn load(&self) -> Result<Option<Checkpoint>>;
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
}

/// Checkpoint kept as a JSON file, replaced by atomic rename
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for `stage` under `dir`, one file per stage
    pub fn for_stage(dir: &Path, stage: &str) -> Self {
        Self::new(dir.join(format!("{}.json", stage)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the stored checkpoint, if any
    pub fn reset(&self) -> Result<()> {
        match fs_err::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>> {
        let content = match fs_err::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let checkpoint = serde_json::from_str(&content).map_err(|e| {
            PipelineError::Corruption(format!("checkpoint {}: {}", self.path.display(), e))
        })?;
        Ok(Some(checkpoint))
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(previous) = self.load()? {
            let regressed = previous.session_id == checkpoint.session_id
                && match (&previous.cursor, &checkpoint.cursor) {
                    (Some(prev), Some(next)) => next < prev,
                    (Some(_), None) => true,
                    _ => false,
                };
            if regressed {
                return Err(PipelineError::Corruption(format!(
                    "checkpoint cursor moved backwards within session {}",
                    checkpoint.session_id
                )));
            }
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs_err::create_dir_all(&dir)?;

        // Temp file in the same directory so the rename stays on one filesystem
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        let content = serde_json::to_vec_pretty(checkpoint)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| PipelineError::Io(e.error))?;

        tracing::debug!(
            "Checkpoint saved for stage {} at cursor {:?}",
            checkpoint.stage,
            checkpoint.cursor
        );
        Ok(())
    }
}
