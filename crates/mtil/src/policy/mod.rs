//! Policies mapping network outputs to action distributions.

mod distribution;

pub use distribution::Distribution;

use crate::config::PolicyDistribution;
use crate::env::Space;
use crate::nn::Network;
use crate::{MtilError, Result};
use candle_core::{Tensor, D};
use ndarray::Array2;
use rand::Rng;

/// Interprets a policy network's output as a [`Distribution`].
#[derive(Clone, Debug)]
pub struct Policy {
    kind: PolicyDistribution,
    action_dim: usize,
    min_std: f64,
}

impl Policy {
    pub fn new(kind: PolicyDistribution, action_space: &Space, min_std: f64) -> Result<Self> {
        match (kind, action_space.is_discrete()) {
            (PolicyDistribution::Softmax, false) => {
                return Err(MtilError::Config(
                    "softmax policies need a discrete action space".to_string(),
                ))
            }
            (PolicyDistribution::Softmax, true) => {}
            (_, true) => {
                return Err(MtilError::Config(format!(
                    "{:?} policies need a box action space",
                    kind
                )))
            }
            (_, false) => {}
        }
        Ok(Self {
            kind,
            action_dim: action_space.action_dim(),
            min_std,
        })
    }

    pub fn kind(&self) -> PolicyDistribution {
        self.kind
    }

    /// Width of the network output this policy consumes: means and raw
    /// standard deviations for Gaussian families, otherwise one value per
    /// action choice or element.
    pub fn output_dim(&self) -> usize {
        match self.kind {
            PolicyDistribution::Gaussian | PolicyDistribution::SquashedGaussian => {
                2 * self.action_dim
            }
            PolicyDistribution::Softmax | PolicyDistribution::Deterministic => self.action_dim,
        }
    }

    /// Number of columns of a stored action.
    pub fn stored_action_dim(&self) -> usize {
        match self.kind {
            PolicyDistribution::Softmax => 1,
            _ => self.action_dim,
        }
    }

    /// Distribution for a batch of (already normalized) observations.
    pub fn distribution(&self, net: &Network, obs: &Tensor) -> Result<Distribution> {
        let out = net.forward(obs)?;
        let dist = match self.kind {
            PolicyDistribution::Softmax => Distribution::Categorical { logits: out },
            PolicyDistribution::Deterministic => Distribution::Deterministic { action: out },
            PolicyDistribution::Gaussian | PolicyDistribution::SquashedGaussian => {
                let mean = out.narrow(D::Minus1, 0, self.action_dim)?;
                let raw_std = out.narrow(D::Minus1, self.action_dim, self.action_dim)?;
                let std = softplus(&raw_std)?.affine(1.0, self.min_std)?;
                if self.kind == PolicyDistribution::Gaussian {
                    Distribution::Gaussian { mean, std }
                } else {
                    Distribution::SquashedGaussian { mean, std }
                }
            }
        };
        Ok(dist)
    }

    /// Sample actions for a batch of observations.
    pub fn sample<R: Rng>(
        &self,
        net: &Network,
        obs: &Tensor,
        rng: &mut R,
    ) -> Result<Array2<f32>> {
        self.distribution(net, obs)?.sample(rng)
    }

    pub fn deterministic_action(&self, net: &Network, obs: &Tensor) -> Result<Array2<f32>> {
        self.distribution(net, obs)?.mode()
    }

    /// Log-probabilities of `acts` along with the distribution that produced
    /// them.
    pub fn lprob(
        &self,
        net: &Network,
        obs: &Tensor,
        acts: &Tensor,
    ) -> Result<(Tensor, Distribution)> {
        let dist = self.distribution(net, obs)?;
        let lprob = dist.log_prob(acts)?;
        Ok((lprob, dist))
    }
}

/// `log(1 + exp(x))` without overflow.
fn softplus(xs: &Tensor) -> candle_core::Result<Tensor> {
    xs.relu()? + xs.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?
}
