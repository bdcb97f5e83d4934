//! Experiment configuration.
//!
//! Experiments are described by a single JSON document with one section per
//! concern:
//!
//! ```json
//! {
//!   "learner_config": { "update_frequency": 2048, "opt_batch_size": 64, ... },
//!   "model_config": { "policy": { ... }, "vf": { ... } },
//!   "optimizer_config": { "policy": { ... }, "vf": { ... } },
//!   "train_config": { "num_epochs": 100, "log_interval": 1, ... }
//! }
//! ```
//!
//! Every section has defaults, so partial documents are accepted.

mod learner;
mod model;
mod optimizer;

pub use learner::{
    LearnerConfig, PiLossSetting, PolicyDistribution, PpoObjective, Seeds, VfLossSetting,
};
pub use model::{ActorCriticModelConfig, MlpConfig, ModelConfig};
pub use optimizer::{ActorCriticOptimizerConfig, OptimizerConfig, OptimizerKind};

use crate::{MtilError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Training loop configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Number of learner updates to run
    pub num_epochs: u64,
    /// Log metrics every N epochs
    pub log_interval: u64,
    /// Checkpoint every N epochs (0 disables)
    pub checkpoint_interval: u64,
    /// Directory for run outputs (config, checkpoints, tensorboard)
    pub save_path: Option<PathBuf>,
    /// Name of the run directory under `save_path`
    pub experiment_name: String,
    /// Show a progress bar
    pub show_progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            num_epochs: 100,
            log_interval: 1,
            checkpoint_interval: 0,
            save_path: None,
            experiment_name: "ppo".to_string(),
            show_progress: true,
        }
    }
}

impl TrainConfig {
    /// Directory holding this run's outputs, if saving is enabled.
    pub fn run_dir(&self) -> Option<PathBuf> {
        self.save_path
            .as_ref()
            .map(|path| path.join(&self.experiment_name))
    }

    /// Set number of epochs
    pub fn with_epochs(mut self, num_epochs: u64) -> Self {
        self.num_epochs = num_epochs;
        self
    }
}

/// Complete experiment description
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub learner_config: LearnerConfig,
    pub model_config: ActorCriticModelConfig,
    pub optimizer_config: ActorCriticOptimizerConfig,
    pub train_config: TrainConfig,
}

impl ExperimentConfig {
    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let config: ExperimentConfig = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded experiment config");
        Ok(config)
    }

    /// Write the config as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.learner_config.validate()?;
        self.model_config.policy.validate()?;
        self.model_config.vf.validate()?;
        self.optimizer_config.policy.validate()?;
        self.optimizer_config.vf.validate()?;
        if self.train_config.log_interval == 0 {
            return Err(MtilError::Config(
                "log_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
