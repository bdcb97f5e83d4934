//! Epoch loop around a [`Learner`].

use super::Learner;
use crate::checkpoint::{CheckpointConfig, CheckpointManager, CheckpointMetadata};
use crate::config::{ExperimentConfig, TrainConfig};
use crate::log::{Metrics, MetricLogger};
use crate::utils::format_duration;
use crate::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;

const CONFIG_FILE: &str = "config.json";
const CHECKPOINT_DIR: &str = "checkpoints";

/// Drives a learner for `num_epochs` updates, logging and checkpointing on
/// the configured intervals.
pub struct Trainer<L: Learner> {
    learner: L,
    config: TrainConfig,
    logger: Box<dyn MetricLogger>,
    checkpoints: Option<CheckpointManager>,
    /// Completed epochs
    epoch: u64,
    start_time: Instant,
    last_metrics: Metrics,
}

impl<L: Learner> Trainer<L> {
    /// Create a trainer. Checkpointing is active when the config has both a
    /// `save_path` and a positive `checkpoint_interval`; the checkpoint
    /// directory is created up front.
    pub fn new(learner: L, config: TrainConfig, logger: Box<dyn MetricLogger>) -> Result<Self> {
        let checkpoints = match config.run_dir() {
            Some(run_dir) if config.checkpoint_interval > 0 => {
                let checkpoint_config = CheckpointConfig::new(run_dir.join(CHECKPOINT_DIR))
                    .save_every(config.checkpoint_interval);
                Some(CheckpointManager::new(checkpoint_config)?)
            }
            _ => None,
        };

        Ok(Self {
            learner,
            config,
            logger,
            checkpoints,
            epoch: 0,
            start_time: Instant::now(),
            last_metrics: Metrics::new(),
        })
    }

    /// Write the experiment config as `config.json` in the run directory.
    /// Returns the written path, or `None` when saving is disabled.
    pub fn save_config(&self, experiment: &ExperimentConfig) -> Result<Option<PathBuf>> {
        let Some(run_dir) = self.config.run_dir() else {
            return Ok(None);
        };
        std::fs::create_dir_all(&run_dir)?;
        let path = run_dir.join(CONFIG_FILE);
        experiment.save(&path)?;
        tracing::info!(path = %path.display(), "Saved experiment config");
        Ok(Some(path))
    }

    /// Run the remaining epochs.
    pub fn train(&mut self) -> Result<()> {
        let progress = self.progress_bar();
        self.start_time = Instant::now();

        while self.epoch < self.config.num_epochs {
            let metrics = self.learner.update()?;
            self.epoch += 1;

            if self.epoch % self.config.log_interval == 0 {
                self.logger.log_metrics(&metrics, self.epoch);
                if progress.is_none() {
                    tracing::info!(
                        epoch = self.epoch,
                        updates = self.learner.num_updates(),
                        average_return = self.learner.latest_average_return(),
                        "Training progress"
                    );
                }
            }
            self.last_metrics = metrics;

            if let Some(manager) = &self.checkpoints {
                manager.maybe_save(&self.learner, &self.metadata())?;
            }

            if let Some(pb) = &progress {
                pb.set_position(self.epoch);
                pb.set_message(format!(
                    "return: {:.2} loss: {:.4}",
                    self.learner.latest_average_return(),
                    self.last_metrics
                        .get("losses/aggregate_loss")
                        .copied()
                        .unwrap_or(f64::NAN)
                ));
            }
        }

        if let Some(pb) = progress {
            pb.finish_with_message("Training complete");
        }
        self.logger.close();
        tracing::info!(
            epochs = self.epoch,
            env_steps = self.learner.env_steps(),
            elapsed = %format_duration(self.start_time.elapsed().as_secs_f64()),
            "Training finished"
        );
        Ok(())
    }

    fn progress_bar(&self) -> Option<ProgressBar> {
        if !self.config.show_progress || self.epoch >= self.config.num_epochs {
            return None;
        }
        let pb = ProgressBar::new(self.config.num_epochs);
        pb.set_position(self.epoch);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        Some(pb)
    }

    fn metadata(&self) -> CheckpointMetadata {
        CheckpointMetadata::new(
            self.epoch,
            self.learner.num_updates(),
            self.learner.latest_average_return(),
        )
    }

    /// Save a checkpoint of the current state into `dir`.
    pub fn save_checkpoint(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let manager = CheckpointManager::new(CheckpointConfig::new(dir.as_ref()).keep_last(0))?;
        manager.save(&self.learner, &self.metadata())
    }

    /// Restore learner state and epoch counter from a checkpoint directory.
    pub fn load_checkpoint(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let metadata = CheckpointManager::load_from_path(&mut self.learner, dir)?;
        self.epoch = metadata.epoch;
        tracing::info!(
            epoch = metadata.epoch,
            updates = metadata.num_updates,
            average_return = metadata.average_return,
            "Checkpoint restored"
        );
        Ok(())
    }

    /// Restore the latest checkpoint of this run, if one exists. Returns
    /// whether anything was restored.
    pub fn resume(&mut self) -> Result<bool> {
        let Some(manager) = &self.checkpoints else {
            return Ok(false);
        };
        match manager.load_latest(&mut self.learner)? {
            Some(metadata) => {
                self.epoch = metadata.epoch;
                tracing::info!(epoch = self.epoch, "Resuming training");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn learner(&self) -> &L {
        &self.learner
    }

    pub fn learner_mut(&mut self) -> &mut L {
        &mut self.learner
    }

    /// Metrics of the most recent update
    pub fn last_metrics(&self) -> &Metrics {
        &self.last_metrics
    }

    pub fn into_learner(self) -> L {
        self.learner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpointable;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct CountingLearner {
        updates: u64,
    }

    impl Checkpointable for CountingLearner {
        fn save_checkpoint(&self, dir: &Path) -> Result<()> {
            std::fs::write(dir.join("updates.txt"), self.updates.to_string())?;
            Ok(())
        }

        fn load_checkpoint(&mut self, dir: &Path) -> Result<()> {
            let text = std::fs::read_to_string(dir.join("updates.txt"))?;
            self.updates = text
                .trim()
                .parse()
                .map_err(|_| crate::MtilError::Training("bad count".to_string()))?;
            Ok(())
        }
    }

    impl Learner for CountingLearner {
        fn update(&mut self) -> Result<Metrics> {
            self.updates += 1;
            let mut metrics = Metrics::new();
            metrics.insert("losses/aggregate_loss".to_string(), 1.0 / self.updates as f64);
            Ok(metrics)
        }

        fn num_updates(&self) -> u64 {
            self.updates
        }

        fn latest_average_return(&self) -> f64 {
            self.updates as f64
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        steps: Arc<Mutex<Vec<u64>>>,
    }

    impl MetricLogger for Recorder {
        fn log_scalar(&self, _name: &str, _value: f64, step: u64) {
            self.steps.lock().unwrap().push(step);
        }
    }

    fn config(num_epochs: u64) -> TrainConfig {
        TrainConfig {
            num_epochs,
            show_progress: false,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_runs_all_epochs_and_logs_on_interval() {
        let recorder = Recorder::default();
        let train_config = TrainConfig {
            log_interval: 2,
            ..config(5)
        };
        let mut trainer = Trainer::new(
            CountingLearner::default(),
            train_config,
            Box::new(recorder.clone()),
        )
        .unwrap();
        trainer.train().unwrap();

        assert_eq!(trainer.epoch(), 5);
        assert_eq!(trainer.learner().num_updates(), 5);
        assert_eq!(*recorder.steps.lock().unwrap(), vec![2, 4]);
        assert_eq!(trainer.last_metrics()["losses/aggregate_loss"], 0.2);
    }

    #[test]
    fn test_periodic_checkpoints_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let train_config = TrainConfig {
            checkpoint_interval: 2,
            save_path: Some(dir.path().to_path_buf()),
            experiment_name: "run".to_string(),
            ..config(5)
        };
        let mut trainer = Trainer::new(
            CountingLearner::default(),
            train_config.clone(),
            Box::new(crate::log::NoOpLogger),
        )
        .unwrap();
        trainer.train().unwrap();

        let checkpoint_dir = dir.path().join("run").join(CHECKPOINT_DIR);
        assert!(checkpoint_dir.join("checkpoint_epoch_000002").is_dir());
        assert!(checkpoint_dir.join("checkpoint_epoch_000004").is_dir());
        assert!(!checkpoint_dir.join("checkpoint_epoch_000005").exists());

        let mut resumed = Trainer::new(
            CountingLearner::default(),
            train_config,
            Box::new(crate::log::NoOpLogger),
        )
        .unwrap();
        assert!(resumed.resume().unwrap());
        assert_eq!(resumed.epoch(), 4);
        assert_eq!(resumed.learner().num_updates(), 4);
        resumed.train().unwrap();
        assert_eq!(resumed.learner().num_updates(), 5);
    }

    #[test]
    fn test_explicit_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = Trainer::new(
            CountingLearner::default(),
            config(3),
            Box::new(crate::log::NoOpLogger),
        )
        .unwrap();
        trainer.train().unwrap();
        let path = trainer.save_checkpoint(dir.path()).unwrap();

        let mut restored = Trainer::new(
            CountingLearner::default(),
            config(3),
            Box::new(crate::log::NoOpLogger),
        )
        .unwrap();
        restored.load_checkpoint(&path).unwrap();
        assert_eq!(restored.epoch(), 3);
        assert_eq!(restored.learner().num_updates(), 3);
    }

    #[test]
    fn test_unwritable_checkpoint_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not_a_dir");
        std::fs::write(&file, b"").unwrap();
        let train_config = TrainConfig {
            checkpoint_interval: 1,
            save_path: Some(file),
            experiment_name: "run".to_string(),
            ..config(1)
        };
        let result = Trainer::new(
            CountingLearner::default(),
            train_config,
            Box::new(crate::log::NoOpLogger),
        );
        assert!(matches!(result, Err(crate::MtilError::Io(_))));
    }

    #[test]
    fn test_save_config() {
        let dir = tempfile::tempdir().unwrap();
        let train_config = TrainConfig {
            save_path: Some(dir.path().to_path_buf()),
            experiment_name: "exp".to_string(),
            ..config(1)
        };
        let trainer = Trainer::new(
            CountingLearner::default(),
            train_config,
            Box::new(crate::log::NoOpLogger),
        )
        .unwrap();
        let path = trainer
            .save_config(&ExperimentConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(path, dir.path().join("exp").join(CONFIG_FILE));
        ExperimentConfig::from_file(path).unwrap();

        let unsaved = Trainer::new(
            CountingLearner::default(),
            config(1),
            Box::new(crate::log::NoOpLogger),
        )
        .unwrap();
        assert!(unsaved.save_config(&ExperimentConfig::default()).unwrap().is_none());
    }
}
