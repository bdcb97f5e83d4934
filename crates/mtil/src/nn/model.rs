//! Config-driven networks.

use super::{Activation, MlpModule};
use crate::config::ModelConfig;
use crate::utils::PrngKey;
use crate::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Module, VarBuilder, VarMap};
use rand::Rng;
use std::collections::BTreeMap;
use std::path::Path;

/// Network architecture built from a [`ModelConfig`].
pub enum Model {
    Mlp(MlpModule),
    EncoderPredictor {
        encoder: MlpModule,
        predictor: MlpModule,
    },
}

impl Model {
    pub fn new(
        config: &ModelConfig,
        input_dim: usize,
        output_dim: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;
        match config {
            ModelConfig::Mlp { layers, activation } => {
                let widths: Vec<usize> = layers.iter().copied().chain([output_dim]).collect();
                Ok(Model::Mlp(MlpModule::new(
                    input_dim,
                    &widths,
                    *activation,
                    Activation::Identity,
                    vb.pp("mlp"),
                )?))
            }
            ModelConfig::EncoderPredictor { encoder, predictor } => {
                let encoder = MlpModule::new(
                    input_dim,
                    &encoder.layers,
                    encoder.activation,
                    encoder.output_activation,
                    vb.pp("encoder"),
                )?;
                let widths: Vec<usize> = predictor
                    .layers
                    .iter()
                    .copied()
                    .chain([output_dim])
                    .collect();
                let predictor = MlpModule::new(
                    encoder.output_dim(),
                    &widths,
                    predictor.activation,
                    predictor.output_activation,
                    vb.pp("predictor"),
                )?;
                Ok(Model::EncoderPredictor { encoder, predictor })
            }
        }
    }
}

impl Module for Model {
    /// Flattens everything after the batch dimension first.
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs = if xs.rank() > 2 {
            xs.flatten_from(1)?
        } else {
            xs.clone()
        };
        match self {
            Model::Mlp(mlp) => mlp.forward(&xs),
            Model::EncoderPredictor { encoder, predictor } => {
                predictor.forward(&encoder.forward(&xs)?)
            }
        }
    }
}

/// Access to the parameters backing a network.
pub trait HasVarMap {
    fn var_map(&self) -> &VarMap;
    fn var_map_mut(&mut self) -> &mut VarMap;
}

/// A [`Model`] together with the parameters it reads.
pub struct Network {
    model: Model,
    varmap: VarMap,
    device: Device,
}

impl HasVarMap for Network {
    fn var_map(&self) -> &VarMap {
        &self.varmap
    }

    fn var_map_mut(&mut self) -> &mut VarMap {
        &mut self.varmap
    }
}

impl Network {
    /// Build a network and initialize its parameters from `key`.
    pub fn new(
        config: &ModelConfig,
        input_dim: usize,
        output_dim: usize,
        device: &Device,
        key: PrngKey,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Model::new(config, input_dim, output_dim, vb)?;
        reinitialize(&varmap, key)?;
        Ok(Self {
            model,
            varmap,
            device: device.clone(),
        })
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        Ok(self.model.forward(xs)?)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn num_parameters(&self) -> usize {
        self.varmap
            .all_vars()
            .iter()
            .map(|var| var.elem_count())
            .sum()
    }

    /// L2 norm of every named parameter tensor.
    pub fn param_norms(&self) -> Result<BTreeMap<String, f64>> {
        let data = lock_vars(&self.varmap)?;
        let mut norms = BTreeMap::new();
        for (name, var) in data.iter() {
            let norm = var
                .as_tensor()
                .sqr()?
                .sum_all()?
                .to_dtype(DType::F64)?
                .to_scalar::<f64>()?
                .sqrt();
            norms.insert(name.clone(), norm);
        }
        Ok(norms)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.load(path)?;
        Ok(())
    }
}

fn lock_vars(
    varmap: &VarMap,
) -> Result<std::sync::MutexGuard<'_, std::collections::HashMap<String, candle_core::Var>>> {
    varmap
        .data()
        .lock()
        .map_err(|_| crate::MtilError::Training("parameter store lock poisoned".to_string()))
}

/// Re-draw parameters from `key` so initialization is reproducible.
///
/// Weights (rank >= 2) and their biases draw from `U(-1/sqrt(fan_in),
/// 1/sqrt(fan_in))`. LayerNorm scales and offsets keep their constant init.
fn reinitialize(varmap: &VarMap, key: PrngKey) -> Result<()> {
    let data = lock_vars(varmap)?;
    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    let fan_in = |name: &str| -> Option<usize> {
        let prefix = name.strip_suffix(".bias").or(name.strip_suffix(".weight"))?;
        let weight = data.get(&format!("{prefix}.weight"))?;
        let dims = weight.dims();
        (dims.len() >= 2).then(|| dims[1..].iter().product())
    };

    let mut rng = key.rng();
    for name in names {
        let Some(fan_in) = fan_in(name) else {
            continue;
        };
        let var = &data[name];
        let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
        let values: Vec<f32> = (0..var.elem_count())
            .map(|_| rng.gen_range(-bound..=bound))
            .collect();
        let fresh = Tensor::from_vec(values, var.dims(), var.device())?;
        var.set(&fresh)?;
    }
    Ok(())
}
