//! Progress checkpoints for the split pipeline.
//!
//! A split always restarts from the first record; checkpoints only record
//! how far a run got.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Called periodically with the number of data records processed and the
/// offset the scan will continue from.
pub trait Checkpoint {
    fn save(&mut self, processed: u64, next_offset: u64) -> Result<()>;
}

/// Discards checkpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCheckpoint;

impl Checkpoint for NoCheckpoint {
    fn save(&mut self, _processed: u64, _next_offset: u64) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub processed: u64,
    pub next_offset: u64,
}

/// Persists the latest checkpoint as a small JSON file, replaced atomically.
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    path: PathBuf,
}

impl FileCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last saved state, `None` if nothing was saved yet.
    pub fn load(&self) -> Result<Option<CheckpointState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }
}

impl Checkpoint for FileCheckpoint {
    fn save(&mut self, processed: u64, next_offset: u64) -> Result<()> {
        let state = CheckpointState { processed, next_offset };
        let tmp_path = self.path.with_extension("tmp");
        let mut file = File::create(&tmp_path)?;
        file.write_all(serde_json::to_string(&state)?.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
