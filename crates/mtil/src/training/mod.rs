//! Learners and the training loop.
//!
//! Provides:
//! - `Ppo` - PPO learner over a single environment
//! - `Rollout` - Environment interaction writing into a `RolloutBuffer`
//! - `NetworkOptimizer` - Per-network optimizer with gradient clipping
//! - `Trainer` - Epoch loop with logging and checkpointing

mod learner;
mod optimizer;
mod ppo;
mod rollout;
mod trainer;

pub use learner::Ppo;
pub use optimizer::NetworkOptimizer;
pub use ppo::{approx_kl, gae_lambda_returns, ppo_pi_loss, ppo_vf_loss, PiLossInfo};
pub use rollout::Rollout;
pub use trainer::Trainer;

use crate::checkpoint::Checkpointable;
use crate::log::Metrics;
use crate::Result;
use candle_core::{Device, Tensor};
use ndarray::ArrayView2;

/// An algorithm the [`Trainer`] can drive.
pub trait Learner: Checkpointable {
    /// Run one learner update and report its metrics.
    fn update(&mut self) -> Result<Metrics>;

    /// Completed update steps.
    fn num_updates(&self) -> u64;

    /// Mean return of the most recently finished episodes.
    fn latest_average_return(&self) -> f64;

    /// Environment transitions collected so far.
    fn env_steps(&self) -> u64 {
        0
    }
}

/// Copy a host matrix to a `[rows, cols]` tensor.
pub(crate) fn array_to_tensor(arr: ArrayView2<f32>, device: &Device) -> Result<Tensor> {
    let values: Vec<f32> = arr.iter().copied().collect();
    Ok(Tensor::from_vec(values, arr.dim(), device)?)
}
