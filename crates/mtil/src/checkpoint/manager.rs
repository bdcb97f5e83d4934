//! Checkpoint manager with rotation.

use super::state::{CheckpointMetadata, Checkpointable};
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};

const METADATA_FILE: &str = "metadata.json";
const PREFIX: &str = "checkpoint_epoch_";

#[derive(Clone, Debug)]
pub struct CheckpointConfig {
    /// Directory holding one subdirectory per checkpoint
    pub checkpoint_dir: PathBuf,
    /// Save every N epochs (0 disables periodic saving)
    pub save_every: u64,
    /// Keep only the last N checkpoints (0 keeps all)
    pub keep_last: usize,
}

impl CheckpointConfig {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            save_every: 10,
            keep_last: 5,
        }
    }

    pub fn save_every(mut self, epochs: u64) -> Self {
        self.save_every = epochs;
        self
    }

    pub fn keep_last(mut self, n: usize) -> Self {
        self.keep_last = n;
        self
    }
}

/// Saves, rotates and restores checkpoints.
pub struct CheckpointManager {
    config: CheckpointConfig,
}

impl CheckpointManager {
    pub fn new(config: CheckpointConfig) -> Result<Self> {
        fs::create_dir_all(&config.checkpoint_dir)?;
        Ok(Self { config })
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.config.checkpoint_dir
    }

    /// Save when `metadata.epoch` is a positive multiple of `save_every`.
    pub fn maybe_save<T: Checkpointable>(
        &self,
        component: &T,
        metadata: &CheckpointMetadata,
    ) -> Result<Option<PathBuf>> {
        let every = self.config.save_every;
        if every == 0 || metadata.epoch == 0 || metadata.epoch % every != 0 {
            return Ok(None);
        }
        self.save(component, metadata).map(Some)
    }

    pub fn save<T: Checkpointable>(
        &self,
        component: &T,
        metadata: &CheckpointMetadata,
    ) -> Result<PathBuf> {
        let dir = self
            .config
            .checkpoint_dir
            .join(format!("{PREFIX}{:06}", metadata.epoch));
        fs::create_dir_all(&dir)?;
        component.save_checkpoint(&dir)?;
        metadata.save(dir.join(METADATA_FILE))?;
        tracing::info!(path = %dir.display(), epoch = metadata.epoch, "Saved checkpoint");

        if self.config.keep_last > 0 {
            self.cleanup_old_checkpoints()?;
        }
        Ok(dir)
    }

    /// Restore the most recent checkpoint, if any.
    pub fn load_latest<T: Checkpointable>(
        &self,
        component: &mut T,
    ) -> Result<Option<CheckpointMetadata>> {
        match self.list_checkpoints()?.pop() {
            Some(dir) => Self::load_from_path(component, dir).map(Some),
            None => Ok(None),
        }
    }

    /// Restore a specific checkpoint directory.
    pub fn load_from_path<T: Checkpointable>(
        component: &mut T,
        dir: impl AsRef<Path>,
    ) -> Result<CheckpointMetadata> {
        let dir = dir.as_ref();
        let metadata = CheckpointMetadata::load(dir.join(METADATA_FILE))?;
        component.load_checkpoint(dir)?;
        tracing::info!(path = %dir.display(), epoch = metadata.epoch, "Loaded checkpoint");
        Ok(metadata)
    }

    /// Checkpoint directories, oldest first.
    pub fn list_checkpoints(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.config.checkpoint_dir) {
            Ok(e) => e,
            Err(_) => return Ok(Vec::new()),
        };

        let mut checkpoints: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_dir()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with(PREFIX))
                        .unwrap_or(false)
            })
            .collect();

        checkpoints.sort();
        Ok(checkpoints)
    }

    fn cleanup_old_checkpoints(&self) -> Result<()> {
        let mut checkpoints = self.list_checkpoints()?;
        while checkpoints.len() > self.config.keep_last {
            let old = checkpoints.remove(0);
            if let Err(e) = fs::remove_dir_all(&old) {
                tracing::warn!(path = %old.display(), "Failed to remove old checkpoint: {}", e);
            } else {
                tracing::debug!(path = %old.display(), "Removed old checkpoint");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct Counter {
        value: u32,
    }

    impl Checkpointable for Counter {
        fn save_checkpoint(&self, dir: &Path) -> Result<()> {
            fs::write(dir.join("counter.txt"), self.value.to_string())?;
            Ok(())
        }

        fn load_checkpoint(&mut self, dir: &Path) -> Result<()> {
            let text = fs::read_to_string(dir.join("counter.txt"))?;
            self.value = text
                .trim()
                .parse()
                .map_err(|_| crate::MtilError::Training("bad counter".to_string()))?;
            Ok(())
        }
    }

    #[test]
    fn test_maybe_save_respects_frequency() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(CheckpointConfig::new(dir.path()).save_every(5)).unwrap();
        let counter = Counter { value: 1 };

        assert!(manager
            .maybe_save(&counter, &CheckpointMetadata::new(3, 3, 0.0))
            .unwrap()
            .is_none());
        assert!(manager
            .maybe_save(&counter, &CheckpointMetadata::new(5, 5, 1.0))
            .unwrap()
            .is_some());
        assert_eq!(manager.list_checkpoints().unwrap().len(), 1);
    }

    #[test]
    fn test_rotation_and_load_latest() {
        let dir = tempdir().unwrap();
        let config = CheckpointConfig::new(dir.path()).save_every(1).keep_last(2);
        let manager = CheckpointManager::new(config).unwrap();

        for epoch in 1..=4 {
            let counter = Counter { value: epoch as u32 * 10 };
            manager
                .save(&counter, &CheckpointMetadata::new(epoch, epoch * 2, 0.5))
                .unwrap();
        }
        assert_eq!(manager.list_checkpoints().unwrap().len(), 2);

        let mut restored = Counter { value: 0 };
        let metadata = manager.load_latest(&mut restored).unwrap().unwrap();
        assert_eq!(metadata.epoch, 4);
        assert_eq!(metadata.num_updates, 8);
        assert_eq!(restored.value, 40);
    }

    #[test]
    fn test_load_latest_without_checkpoints() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(CheckpointConfig::new(dir.path().join("none"))).unwrap();
        let mut counter = Counter { value: 7 };
        assert!(manager.load_latest(&mut counter).unwrap().is_none());
        assert_eq!(counter.value, 7);
    }
}
