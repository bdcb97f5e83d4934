//! PPO return and loss computations.

use crate::config::PpoObjective;
use crate::{MtilError, Result};
use candle_core::Tensor;
use ndarray::{Array1, ArrayView1};

/// GAE-lambda returns.
///
/// `values` holds one more entry than `rewards`: the bootstrap value of the
/// state following the last transition. Scanning backwards,
///
/// `ret_t = r_t + gamma * (1 - d_t) * ((1 - lambda) * v_{t+1} + lambda * ret_{t+1})`
///
/// with `ret_T = v_T`.
pub fn gae_lambda_returns(
    rewards: ArrayView1<f32>,
    values: ArrayView1<f32>,
    dones: ArrayView1<f32>,
    gamma: f64,
    gae_lambda: f64,
) -> Result<Array1<f32>> {
    let steps = rewards.len();
    if values.len() != steps + 1 {
        return Err(MtilError::ShapeMismatch {
            expected: vec![steps + 1],
            actual: vec![values.len()],
        });
    }
    if dones.len() != steps {
        return Err(MtilError::ShapeMismatch {
            expected: vec![steps],
            actual: vec![dones.len()],
        });
    }

    let mut returns = Array1::zeros(steps);
    let mut next_return = f64::from(values[steps]);
    for t in (0..steps).rev() {
        let next_value = f64::from(values[t + 1]);
        let not_done = 1.0 - f64::from(dones[t]);
        next_return = f64::from(rewards[t])
            + gamma * not_done * ((1.0 - gae_lambda) * next_value + gae_lambda * next_return);
        returns[t] = next_return as f32;
    }
    Ok(returns)
}

/// Scalar diagnostics of the policy loss.
#[derive(Clone, Copy, Debug, Default)]
pub struct PiLossInfo {
    /// Samples whose ratio left the clip range
    pub num_clipped: f64,
    /// Mean importance ratio
    pub is_ratio: f64,
    /// Mean log-probability under the current policy
    pub log_prob: f64,
}

fn count_outside(xs: &Tensor, center: f64, radius: f64) -> Result<f64> {
    let values: Vec<f32> = xs.flatten_all()?.to_vec1()?;
    Ok(values
        .iter()
        .filter(|&&x| (f64::from(x) - center).abs() > radius)
        .count() as f64)
}

fn scalar(xs: &Tensor) -> Result<f64> {
    Ok(f64::from(xs.mean_all()?.to_scalar::<f32>()?))
}

/// Policy surrogate loss on a minibatch of `[batch]` tensors.
pub fn ppo_pi_loss(
    objective: &PpoObjective,
    log_probs: &Tensor,
    old_log_probs: &Tensor,
    advantages: &Tensor,
) -> Result<(Tensor, PiLossInfo)> {
    let log_ratio = log_probs.sub(old_log_probs)?;
    let ratio = log_ratio.exp()?;
    let surrogate = ratio.mul(advantages)?;

    let (loss, num_clipped) = match *objective {
        PpoObjective::Clip {
            clip_param: Some(clip),
        } => {
            let clipped = ratio.clamp(1.0 - clip, 1.0 + clip)?.mul(advantages)?;
            let loss = surrogate.minimum(&clipped)?.mean_all()?.neg()?;
            (loss, count_outside(&ratio, 1.0, clip)?)
        }
        PpoObjective::Clip { clip_param: None } => (surrogate.mean_all()?.neg()?, 0.0),
        PpoObjective::ReverseKl { beta } => {
            let kl = ratio.affine(1.0, -1.0)?.sub(&log_ratio)?.mean_all()?;
            let loss = surrogate.mean_all()?.neg()?.add(&(kl * beta)?)?;
            (loss, 0.0)
        }
    };

    let info = PiLossInfo {
        num_clipped,
        is_ratio: scalar(&ratio)?,
        log_prob: scalar(log_probs)?,
    };
    Ok((loss, info))
}

/// Value loss. With `clip_param`, predictions may move at most `clip_param`
/// away from the rollout-time values before the larger error is taken.
/// Returns the loss and the number of clipped predictions.
pub fn ppo_vf_loss(
    clip_param: Option<f64>,
    values: &Tensor,
    old_values: &Tensor,
    returns: &Tensor,
) -> Result<(Tensor, f64)> {
    let squared = values.sub(returns)?.sqr()?;
    match clip_param {
        Some(clip) => {
            let delta = values.sub(old_values)?;
            let clipped_values = old_values.add(&delta.clamp(-clip, clip)?)?;
            let clipped = clipped_values.sub(returns)?.sqr()?;
            let loss = squared.maximum(&clipped)?.mean_all()?;
            Ok((loss, count_outside(&delta, 0.0, clip)?))
        }
        None => Ok((squared.mean_all()?, 0.0)),
    }
}

/// Approximate KL divergence `mean(old - new)`.
pub fn approx_kl(log_probs: &Tensor, old_log_probs: &Tensor) -> Result<f64> {
    scalar(&old_log_probs.sub(log_probs)?)
}
