//! Action distributions parameterized by network outputs.

use crate::{MtilError, Result};
use candle_core::{DType, Tensor, D};
use ndarray::Array2;
use rand::distributions::{Distribution as _, WeightedIndex};
use rand::Rng;
use rand_distr::StandardNormal;

const HALF_LOG_2PI: f64 = 0.918_938_533_204_672_8;
/// Keeps squashed actions away from the tanh asymptotes.
const SQUASH_EPS: f64 = 1e-6;

/// Distribution over a batch of actions. All tensors are `[batch, dim]`.
#[derive(Clone, Debug)]
pub enum Distribution {
    /// Softmax over logits. Actions are `[batch, 1]` indices stored as f32.
    Categorical { logits: Tensor },
    /// Diagonal Gaussian.
    Gaussian { mean: Tensor, std: Tensor },
    /// Diagonal Gaussian passed through tanh.
    SquashedGaussian { mean: Tensor, std: Tensor },
    /// Point mass at `action`.
    Deterministic { action: Tensor },
}

fn gaussian_log_prob(mean: &Tensor, std: &Tensor, xs: &Tensor) -> Result<Tensor> {
    let z = xs.sub(mean)?.div(std)?;
    let per_dim = (z.sqr()? * -0.5)?
        .sub(&std.log()?)?
        .affine(1.0, -HALF_LOG_2PI)?;
    Ok(per_dim.sum(D::Minus1)?)
}

fn gaussian_entropy(std: &Tensor) -> Result<Tensor> {
    Ok(std.log()?.affine(1.0, 0.5 + HALF_LOG_2PI)?.sum(D::Minus1)?)
}

impl Distribution {
    /// Log-probability of `actions`, one value per batch row.
    pub fn log_prob(&self, actions: &Tensor) -> Result<Tensor> {
        match self {
            Distribution::Categorical { logits } => {
                let idx = if actions.rank() == 1 {
                    actions.unsqueeze(1)?
                } else {
                    actions.clone()
                };
                let idx = idx.to_dtype(DType::U32)?.contiguous()?;
                let log_probs = candle_nn::ops::log_softmax(logits, D::Minus1)?;
                Ok(log_probs.gather(&idx, D::Minus1)?.squeeze(D::Minus1)?)
            }
            Distribution::Gaussian { mean, std } => gaussian_log_prob(mean, std, actions),
            Distribution::SquashedGaussian { mean, std } => {
                let acts = actions.clamp(-1.0 + SQUASH_EPS, 1.0 - SQUASH_EPS)?;
                let pre_tanh = (acts
                    .affine(1.0, 1.0)?
                    .log()?
                    .sub(&acts.affine(-1.0, 1.0)?.log()?)?
                    * 0.5)?;
                let log_det = acts
                    .sqr()?
                    .affine(-1.0, 1.0 + SQUASH_EPS)?
                    .log()?
                    .sum(D::Minus1)?;
                Ok(gaussian_log_prob(mean, std, &pre_tanh)?.sub(&log_det)?)
            }
            Distribution::Deterministic { .. } => Err(MtilError::Config(
                "deterministic policies have no log-probability".to_string(),
            )),
        }
    }

    /// Entropy per batch row. The squashed Gaussian reports the entropy of
    /// its pre-squash Gaussian.
    pub fn entropy(&self) -> Result<Tensor> {
        match self {
            Distribution::Categorical { logits } => {
                let log_probs = candle_nn::ops::log_softmax(logits, D::Minus1)?;
                Ok(log_probs
                    .exp()?
                    .mul(&log_probs)?
                    .sum(D::Minus1)?
                    .neg()?)
            }
            Distribution::Gaussian { std, .. } | Distribution::SquashedGaussian { std, .. } => {
                gaussian_entropy(std)
            }
            Distribution::Deterministic { action } => {
                Ok(Tensor::zeros(action.dim(0)?, DType::F32, action.device())?)
            }
        }
    }

    /// Draw one action per batch row on the host.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Result<Array2<f32>> {
        match self {
            Distribution::Categorical { logits } => {
                let probs: Vec<Vec<f32>> =
                    candle_nn::ops::softmax(logits, D::Minus1)?.to_vec2()?;
                let mut actions = Array2::zeros((probs.len(), 1));
                for (row, p) in probs.iter().enumerate() {
                    let dist = WeightedIndex::new(p).map_err(|e| {
                        MtilError::Training(format!("invalid action probabilities: {e}"))
                    })?;
                    actions[[row, 0]] = dist.sample(rng) as f32;
                }
                Ok(actions)
            }
            Distribution::Gaussian { mean, std } => sample_gaussian(mean, std, rng, false),
            Distribution::SquashedGaussian { mean, std } => sample_gaussian(mean, std, rng, true),
            Distribution::Deterministic { action } => to_array2(action),
        }
    }

    /// Most likely action per batch row.
    pub fn mode(&self) -> Result<Array2<f32>> {
        match self {
            Distribution::Categorical { logits } => {
                let idx = logits.argmax_keepdim(D::Minus1)?.to_dtype(DType::F32)?;
                to_array2(&idx)
            }
            Distribution::Gaussian { mean, .. } => to_array2(mean),
            Distribution::SquashedGaussian { mean, .. } => to_array2(&mean.tanh()?),
            Distribution::Deterministic { action } => to_array2(action),
        }
    }

    /// Named parameter tensors, for logging.
    pub fn params(&self) -> Vec<(&'static str, &Tensor)> {
        match self {
            Distribution::Categorical { logits } => vec![("logits", logits)],
            Distribution::Gaussian { mean, std } | Distribution::SquashedGaussian { mean, std } => {
                vec![("mean", mean), ("std", std)]
            }
            Distribution::Deterministic { action } => vec![("action", action)],
        }
    }
}

fn to_array2(xs: &Tensor) -> Result<Array2<f32>> {
    let (rows, cols) = xs.dims2()?;
    let values = xs.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
    Array2::from_shape_vec((rows, cols), values).map_err(|_| MtilError::ShapeMismatch {
        expected: vec![rows, cols],
        actual: xs.dims().to_vec(),
    })
}

fn sample_gaussian<R: Rng>(
    mean: &Tensor,
    std: &Tensor,
    rng: &mut R,
    squash: bool,
) -> Result<Array2<f32>> {
    let mean = to_array2(mean)?;
    let std = to_array2(std)?;
    let mut actions = Array2::zeros(mean.raw_dim());
    for ((a, &m), &s) in actions.iter_mut().zip(mean.iter()).zip(std.iter()) {
        let noise: f32 = rng.sample(StandardNormal);
        let x = m + s * noise;
        *a = if squash { x.tanh() } else { x };
    }
    Ok(actions)
}
