//! Neural network modules on top of `candle`.
//!
//! - [`MlpModule`]: dense stack
//! - [`CnnModule`]: stride-1 SAME-padded convolutions over NHWC input
//! - [`GptBlock`] / [`GptModule`]: causal pre-norm transformer blocks
//! - [`Model`] / [`Network`]: config-driven networks owning their parameters

mod cnn;
mod gpt;
mod mlp;
mod model;

pub use cnn::CnnModule;
pub use gpt::{GptBlock, GptModule};
pub use mlp::MlpModule;
pub use model::{HasVarMap, Model, Network};

use candle_core::{Result as CandleResult, Tensor};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Identity,
    #[default]
    Relu,
    Tanh,
    Gelu,
}

impl Activation {
    pub fn apply(&self, xs: &Tensor) -> CandleResult<Tensor> {
        match self {
            Activation::Identity => Ok(xs.clone()),
            Activation::Relu => xs.relu(),
            Activation::Tanh => xs.tanh(),
            Activation::Gelu => xs.gelu(),
        }
    }
}
