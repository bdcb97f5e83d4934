//! PPO learner configuration.

use crate::schedule::Schedule;
use crate::{MtilError, Result};
use serde::{Deserialize, Serialize};

/// Lower bound added to Gaussian standard deviations
pub const DEFAULT_MIN_STD: f64 = 1e-7;

/// Seeds for the independent sources of randomness
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Seeds {
    /// Parameter initialization
    pub model_seed: u64,
    /// Minibatch shuffling
    pub buffer_seed: u64,
    /// Environment resets and action sampling
    pub env_seed: u64,
}

impl Default for Seeds {
    fn default() -> Self {
        Self {
            model_seed: 0,
            buffer_seed: 0,
            env_seed: 42,
        }
    }
}

/// Distribution family the policy network parameterizes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDistribution {
    Deterministic,
    Gaussian,
    Softmax,
    SquashedGaussian,
}

/// Surrogate objective for the policy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PpoObjective {
    /// Clipped importance-ratio objective. `None` disables clipping.
    Clip { clip_param: Option<f64> },
    /// Importance-ratio objective with a KL penalty of weight `beta`.
    ReverseKl { beta: f64 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PiLossSetting {
    pub objective: PpoObjective,
    pub coefficient: f64,
}

impl Default for PiLossSetting {
    fn default() -> Self {
        Self {
            objective: PpoObjective::Clip {
                clip_param: Some(0.2),
            },
            coefficient: 1.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VfLossSetting {
    /// Value clipping around the rollout-time prediction. `None` uses a
    /// plain squared loss.
    pub clip_param: Option<f64>,
    pub coefficient: f64,
}

impl Default for VfLossSetting {
    fn default() -> Self {
        Self {
            clip_param: None,
            coefficient: 0.5,
        }
    }
}

/// Configuration for the PPO learner
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    pub seeds: Seeds,

    // Rollout
    /// Transitions collected per update step
    pub update_frequency: usize,
    /// Rollout/optimize iterations per `update()` call
    pub num_update_steps: usize,

    // Returns
    /// Discount factor
    pub gamma: f64,
    /// GAE lambda
    pub gae_lambda: f64,
    /// Standardize advantages per rollout
    pub normalize_advantage: bool,
    /// Added to the advantage standard deviation
    pub eps: f64,

    // Optimization
    /// Minibatch gradient steps per rollout
    pub opt_epochs: usize,
    /// Minibatch size
    pub opt_batch_size: usize,
    /// Approximate KL above which updates stop
    pub kl_threshold: Option<f64>,
    /// Apply the update that crossed the KL threshold before stopping
    pub update_before_early_stopping: bool,

    // Losses
    pub policy_distribution: PolicyDistribution,
    pub min_std: f64,
    pub pi_loss_setting: PiLossSetting,
    pub vf_loss_setting: VfLossSetting,
    /// Entropy coefficient schedule, indexed by update count
    pub ent_loss_setting: Schedule,

    // Normalization
    /// Running normalization of observations
    pub obs_rms: bool,
    /// Running normalization of value targets
    pub value_rms: bool,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            seeds: Seeds::default(),
            update_frequency: 2048,
            num_update_steps: 1,
            gamma: 0.99,
            gae_lambda: 0.95,
            normalize_advantage: true,
            eps: 1e-5,
            opt_epochs: 64,
            opt_batch_size: 64,
            kl_threshold: None,
            update_before_early_stopping: false,
            policy_distribution: PolicyDistribution::Gaussian,
            min_std: DEFAULT_MIN_STD,
            pi_loss_setting: PiLossSetting::default(),
            vf_loss_setting: VfLossSetting::default(),
            ent_loss_setting: Schedule::constant(0.0),
            obs_rms: false,
            value_rms: false,
        }
    }
}

impl LearnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.update_frequency == 0 {
            return Err(MtilError::Config(
                "update_frequency must be positive".to_string(),
            ));
        }
        if self.opt_batch_size == 0 {
            return Err(MtilError::Config(
                "opt_batch_size must be positive".to_string(),
            ));
        }
        if self.opt_batch_size > self.update_frequency {
            return Err(MtilError::Config(format!(
                "optimization batch size {} cannot be larger than update frequency {}",
                self.opt_batch_size, self.update_frequency
            )));
        }
        if !(0.0..=1.0).contains(&self.gamma) || !(0.0..=1.0).contains(&self.gae_lambda) {
            return Err(MtilError::Config(format!(
                "gamma ({}) and gae_lambda ({}) must lie in [0, 1]",
                self.gamma, self.gae_lambda
            )));
        }
        if self.min_std < 0.0 {
            return Err(MtilError::Config("min_std must be non-negative".to_string()));
        }
        if let Some(threshold) = self.kl_threshold {
            if threshold <= 0.0 {
                return Err(MtilError::Config(
                    "kl_threshold must be positive when set".to_string(),
                ));
            }
        }
        match self.pi_loss_setting.objective {
            PpoObjective::Clip {
                clip_param: Some(clip),
            } if clip <= 0.0 => {
                return Err(MtilError::Config("clip_param must be positive".to_string()))
            }
            PpoObjective::ReverseKl { beta } if beta < 0.0 => {
                return Err(MtilError::Config("beta must be non-negative".to_string()))
            }
            _ => {}
        }
        if self.policy_distribution == PolicyDistribution::Deterministic {
            return Err(MtilError::Config(
                "PPO requires a stochastic policy distribution".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the rollout length and minibatch size together
    pub fn with_batching(mut self, update_frequency: usize, opt_batch_size: usize) -> Self {
        self.update_frequency = update_frequency;
        self.opt_batch_size = opt_batch_size;
        self
    }
}
