//! Convolutional feature extractor.

use super::Activation;
use crate::{MtilError, Result};
use candle_core::Tensor;
use candle_nn::{Init, Module, VarBuilder};

struct Conv {
    weight: Tensor,
    bias: Tensor,
    kernel: (usize, usize),
}

impl Conv {
    /// Stride-1 convolution with SAME padding on NCHW input. Even kernels pad
    /// one more row/column after than before.
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (kh, kw) = self.kernel;
        let (top, left) = ((kh - 1) / 2, (kw - 1) / 2);
        let xs = xs
            .pad_with_zeros(2, top, kh - 1 - top)?
            .pad_with_zeros(3, left, kw - 1 - left)?;
        let out_channels = self.bias.dims()[0];
        xs.conv2d(&self.weight, 0, 1, 1, 1)?
            .broadcast_add(&self.bias.reshape((1, out_channels, 1, 1))?)
    }
}

/// Stack of convolutions over `[batch, height, width, channels]` input,
/// each followed by `activation`. Output keeps the spatial size.
pub struct CnnModule {
    convs: Vec<Conv>,
    activation: Activation,
}

impl CnnModule {
    pub fn new(
        in_channels: usize,
        features: &[usize],
        kernel_sizes: &[(usize, usize)],
        activation: Activation,
        vb: VarBuilder,
    ) -> Result<Self> {
        if features.len() != kernel_sizes.len() {
            return Err(MtilError::Config(format!(
                "got {} feature sizes but {} kernel sizes",
                features.len(),
                kernel_sizes.len()
            )));
        }
        let mut convs = Vec::with_capacity(features.len());
        let mut in_c = in_channels;
        for (i, (&out_c, &(kh, kw))) in features.iter().zip(kernel_sizes).enumerate() {
            if kh == 0 || kw == 0 {
                return Err(MtilError::Config("kernel sizes must be positive".to_string()));
            }
            let vb = vb.pp(format!("conv_{i}"));
            let bound = 1.0 / ((in_c * kh * kw) as f64).sqrt();
            let weight = vb.get_with_hints(
                (out_c, in_c, kh, kw),
                "weight",
                Init::Uniform {
                    lo: -bound,
                    up: bound,
                },
            )?;
            let bias = vb.get_with_hints(out_c, "bias", Init::Const(0.0))?;
            convs.push(Conv {
                weight,
                bias,
                kernel: (kh, kw),
            });
            in_c = out_c;
        }
        Ok(Self { convs, activation })
    }
}

impl Module for CnnModule {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        if xs.rank() != 4 {
            candle_core::bail!("CnnModule expects NHWC input, got shape {:?}", xs.dims());
        }
        let mut xs = xs.permute((0, 3, 1, 2))?.contiguous()?;
        for conv in &self.convs {
            xs = self.activation.apply(&conv.forward(&xs)?)?;
        }
        xs.permute((0, 2, 3, 1))?.contiguous()
    }
}
