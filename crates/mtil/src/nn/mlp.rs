//! Multi-layer perceptron.

use super::Activation;
use crate::{MtilError, Result};
use candle_core::Tensor;
use candle_nn::{Linear, Module, VarBuilder};

/// Dense layers with `activation` between them and `output_activation`
/// after the last one.
pub struct MlpModule {
    layers: Vec<Linear>,
    activation: Activation,
    output_activation: Activation,
}

impl MlpModule {
    /// `layers` lists the width of every dense layer, output included.
    pub fn new(
        input_dim: usize,
        layers: &[usize],
        activation: Activation,
        output_activation: Activation,
        vb: VarBuilder,
    ) -> Result<Self> {
        if layers.is_empty() {
            return Err(MtilError::Config(
                "MLP needs at least one layer".to_string(),
            ));
        }
        let mut dense = Vec::with_capacity(layers.len());
        let mut in_dim = input_dim;
        for (i, &out_dim) in layers.iter().enumerate() {
            dense.push(candle_nn::linear(in_dim, out_dim, vb.pp(format!("dense_{i}")))?);
            in_dim = out_dim;
        }
        Ok(Self {
            layers: dense,
            activation,
            output_activation,
        })
    }

    pub fn output_dim(&self) -> usize {
        self.layers
            .last()
            .map(|layer| layer.weight().dims()[0])
            .unwrap_or(0)
    }
}

impl Module for MlpModule {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let last = self.layers.len() - 1;
        let mut xs = xs.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            xs = layer.forward(&xs)?;
            xs = if i < last {
                self.activation.apply(&xs)?
            } else {
                self.output_activation.apply(&xs)?
            };
        }
        Ok(xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_mlp_shapes() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mlp = MlpModule::new(4, &[16, 16, 3], Activation::Relu, Activation::Identity, vb)
            .unwrap();
        assert_eq!(mlp.output_dim(), 3);
        let xs = Tensor::zeros((5, 4), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(mlp.forward(&xs).unwrap().dims(), &[5, 3]);
        assert_eq!(varmap.all_vars().len(), 6);
    }

    #[test]
    fn test_output_activation_applies() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mlp = MlpModule::new(2, &[8, 4], Activation::Relu, Activation::Tanh, vb).unwrap();
        let xs = Tensor::new(&[[100f32, -100.0]], &Device::Cpu).unwrap();
        let out: Vec<f32> = mlp.forward(&xs).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert!(out.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn test_empty_layers_rejected() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let result = MlpModule::new(2, &[], Activation::Relu, Activation::Identity, vb);
        assert!(matches!(result, Err(MtilError::Config(_))));
    }
}
