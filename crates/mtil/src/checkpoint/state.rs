//! Checkpoint metadata and the trait for checkpointable components.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Components that can write their state into a checkpoint directory and
/// restore it later.
pub trait Checkpointable {
    fn save_checkpoint(&self, dir: &Path) -> Result<()>;

    fn load_checkpoint(&mut self, dir: &Path) -> Result<()>;
}

/// Stored next to the learner state as `metadata.json`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CheckpointMetadata {
    pub epoch: u64,
    pub num_updates: u64,
    pub average_return: f64,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
    pub version: String,
}

impl CheckpointMetadata {
    pub fn new(epoch: u64, num_updates: u64, average_return: f64) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            epoch,
            num_updates,
            average_return,
            timestamp,
            version: crate::VERSION.to_string(),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}
