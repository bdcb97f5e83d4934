//! Network architecture configuration.

use crate::nn::Activation;
use crate::{MtilError, Result};
use serde::{Deserialize, Serialize};

/// A stack of dense layers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MlpConfig {
    /// Layer widths. For a model's final stage the output width is appended.
    pub layers: Vec<usize>,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default = "identity")]
    pub output_activation: Activation,
}

fn identity() -> Activation {
    Activation::Identity
}

/// Architecture of a single network
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "architecture", rename_all = "snake_case")]
pub enum ModelConfig {
    /// Hidden layers followed by a linear head of the output width
    Mlp {
        layers: Vec<usize>,
        #[serde(default)]
        activation: Activation,
    },
    /// An encoder producing an embedding followed by a predictor head
    EncoderPredictor {
        encoder: MlpConfig,
        predictor: MlpConfig,
    },
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig::Mlp {
            layers: vec![64, 64],
            activation: Activation::Tanh,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            ModelConfig::Mlp { layers, .. } => {
                if layers.contains(&0) {
                    return Err(MtilError::Config(
                        "hidden layer widths must be positive".to_string(),
                    ));
                }
            }
            ModelConfig::EncoderPredictor { encoder, predictor } => {
                if encoder.layers.is_empty() {
                    return Err(MtilError::Config(
                        "encoder needs at least one layer".to_string(),
                    ));
                }
                if encoder.layers.contains(&0) || predictor.layers.contains(&0) {
                    return Err(MtilError::Config(
                        "layer widths must be positive".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Policy and value network architectures
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorCriticModelConfig {
    pub policy: ModelConfig,
    pub vf: ModelConfig,
}
