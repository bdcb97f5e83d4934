//! # mtil
//!
//! Learners, model modules and datasets for multitask imitation learning
//! and reinforcement learning experiments.
//!
//! ## Overview
//!
//! mtil provides:
//! - A PPO learner with GAE returns, clipped or KL-penalized policy losses,
//!   approximate-KL early stopping and PRNG-keyed minibatch shuffling
//! - Model modules (MLP, CNN, GPT blocks) on top of `candle`
//! - Policy distributions (softmax, Gaussian, squashed Gaussian)
//! - Multitask datasets (polynomial regression, MNIST-derived classification)
//! - Metric loggers and a training loop with checkpointing
//!
//! ## Features
//!
//! - `tensorboard` - Enable the TensorBoard metric logger
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mtil::prelude::*;
//! use mtil_envs::CartPole;
//!
//! let config = ExperimentConfig::default();
//! let learner = Ppo::new(&config, CartPole::new())?;
//! let mut trainer = Trainer::new(learner, config.train_config.clone(), Box::new(ConsoleLogger::new()))?;
//! trainer.train()?;
//! ```

pub mod buffer;
pub mod checkpoint;
pub mod config;
pub mod datasets;
pub mod env;
pub mod log;
pub mod nn;
pub mod normalization;
pub mod policy;
pub mod schedule;
pub mod training;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::buffer::RolloutBuffer;
    pub use crate::config::{
        ExperimentConfig, LearnerConfig, ModelConfig, OptimizerConfig, PolicyDistribution,
        TrainConfig,
    };
    pub use crate::datasets::{get_dataset, Dataset, DatasetConfig, Sample};
    pub use crate::env::{Env, EnvInfo, Space, StepResult};
    #[cfg(feature = "tensorboard")]
    pub use crate::log::TensorBoardLogger;
    pub use crate::log::{CompositeLogger, ConsoleLogger, MetricLogger, NoOpLogger};
    pub use crate::nn::{Activation, CnnModule, GptBlock, GptModule, MlpModule, Model};
    pub use crate::policy::Policy;
    pub use crate::schedule::Schedule;
    pub use crate::training::{Ppo, Trainer};
    pub use crate::utils::PrngKey;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum MtilError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Training error: {0}")]
    Training(String),

    #[error("Loss became non-finite: {0}")]
    NonFiniteLoss(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, MtilError>;
