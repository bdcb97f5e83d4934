//! Optimizer configuration.

use crate::schedule::Schedule;
use crate::{MtilError, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Adamw,
    Sgd,
}

/// Optimizer for one network
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub optimizer: OptimizerKind,
    /// Learning rate schedule, indexed by gradient step
    pub lr: Schedule,
    /// Global gradient norm clip. `None` disables clipping.
    pub max_grad_norm: Option<f64>,
    /// Decoupled weight decay (AdamW only)
    pub weight_decay: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::Adam,
            lr: Schedule::constant(3e-4),
            max_grad_norm: Some(0.5),
            weight_decay: 1e-4,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lr.value(0) < 0.0 {
            return Err(MtilError::Config(
                "learning rate must be non-negative".to_string(),
            ));
        }
        if let Some(norm) = self.max_grad_norm {
            if norm <= 0.0 {
                return Err(MtilError::Config(
                    "max_grad_norm must be positive when set".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Set a constant learning rate
    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = Schedule::constant(lr);
        self
    }
}

/// Policy and value network optimizers
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorCriticOptimizerConfig {
    pub policy: OptimizerConfig,
    pub vf: OptimizerConfig,
}
