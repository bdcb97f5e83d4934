//! GPT-style causal transformer blocks.

use crate::{MtilError, Result};
use candle_core::{Device, Tensor, D};
use candle_nn::{LayerNorm, Linear, Module, VarBuilder};

const LAYER_NORM_EPS: f64 = 1e-6;

/// Lower-triangular `[t, t]` mask, 1 where query `i` may attend key `j`.
fn causal_mask(t: usize, device: &Device) -> candle_core::Result<Tensor> {
    let mask: Vec<u8> = (0..t)
        .flat_map(|i| (0..t).map(move |j| u8::from(j <= i)))
        .collect();
    Tensor::from_vec(mask, (t, t), device)
}

struct CausalSelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    out: Linear,
    num_heads: usize,
    head_dim: usize,
}

impl CausalSelfAttention {
    fn new(embed_dim: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            query: candle_nn::linear(embed_dim, embed_dim, vb.pp("query"))?,
            key: candle_nn::linear(embed_dim, embed_dim, vb.pp("key"))?,
            value: candle_nn::linear(embed_dim, embed_dim, vb.pp("value"))?,
            out: candle_nn::linear(embed_dim, embed_dim, vb.pp("out"))?,
            num_heads,
            head_dim: embed_dim / num_heads,
        })
    }

    /// `[b, t, e]` -> `[b, heads, t, head_dim]`
    fn split_heads(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (b, t, _) = xs.dims3()?;
        xs.reshape((b, t, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (b, t, e) = xs.dims3()?;
        let q = self.split_heads(&self.query.forward(xs)?)?;
        let k = self.split_heads(&self.key.forward(xs)?)?;
        let v = self.split_heads(&self.value.forward(xs)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?.contiguous()?)? * scale)?;
        let mask = causal_mask(t, xs.device())?.broadcast_as(scores.shape())?;
        let neg_inf =
            Tensor::new(f32::NEG_INFINITY, xs.device())?.broadcast_as(scores.shape())?;
        let weights = candle_nn::ops::softmax(&mask.where_cond(&scores, &neg_inf)?, D::Minus1)?;

        let attended = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, t, e))?;
        self.out.forward(&attended)
    }
}

/// Pre-norm transformer block with causal self-attention and a dense
/// residual branch of width `embed_dim`.
pub struct GptBlock {
    ln_attn: LayerNorm,
    attention: CausalSelfAttention,
    ln_dense: LayerNorm,
    dense_in: Linear,
    dense_out: Linear,
    embed_dim: usize,
}

impl GptBlock {
    pub fn new(num_heads: usize, embed_dim: usize, vb: VarBuilder) -> Result<Self> {
        if num_heads == 0 || embed_dim % num_heads != 0 {
            return Err(MtilError::Config(format!(
                "embed_dim {} must be divisible by num_heads {}",
                embed_dim, num_heads
            )));
        }
        Ok(Self {
            ln_attn: candle_nn::layer_norm(embed_dim, LAYER_NORM_EPS, vb.pp("ln_attn"))?,
            attention: CausalSelfAttention::new(embed_dim, num_heads, vb.pp("attention"))?,
            ln_dense: candle_nn::layer_norm(embed_dim, LAYER_NORM_EPS, vb.pp("ln_dense"))?,
            dense_in: candle_nn::linear(embed_dim, embed_dim, vb.pp("dense_in"))?,
            dense_out: candle_nn::linear(embed_dim, embed_dim, vb.pp("dense_out"))?,
            embed_dim,
        })
    }
}

impl Module for GptBlock {
    /// `xs`: `[batch, time, embed_dim]`
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (_, _, e) = xs.dims3()?;
        if e != self.embed_dim {
            candle_core::bail!("expected embedding size {}, got {}", self.embed_dim, e);
        }
        let xs = (xs + self.attention.forward(&self.ln_attn.forward(xs)?)?)?;
        let hidden = self.dense_in.forward(&self.ln_dense.forward(&xs)?)?.gelu()?;
        xs + self.dense_out.forward(&hidden)?
    }
}

/// `num_blocks` GPT blocks followed by a final LayerNorm.
pub struct GptModule {
    blocks: Vec<GptBlock>,
    ln_final: LayerNorm,
}

impl GptModule {
    pub fn new(
        num_blocks: usize,
        num_heads: usize,
        embed_dim: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let blocks = (0..num_blocks)
            .map(|i| GptBlock::new(num_heads, embed_dim, vb.pp(format!("block_{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let ln_final = candle_nn::layer_norm(embed_dim, LAYER_NORM_EPS, vb.pp("ln_final"))?;
        Ok(Self { blocks, ln_final })
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

impl Module for GptModule {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut xs = xs.clone();
        for block in &self.blocks {
            xs = block.forward(&xs)?;
        }
        self.ln_final.forward(&xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, IndexOp};
    use candle_nn::VarMap;

    fn builder(varmap: &VarMap) -> VarBuilder<'_> {
        VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu)
    }

    #[test]
    fn test_causal_mask() {
        let mask: Vec<Vec<u8>> = causal_mask(3, &Device::Cpu).unwrap().to_vec2().unwrap();
        assert_eq!(mask, vec![vec![1, 0, 0], vec![1, 1, 0], vec![1, 1, 1]]);
    }

    #[test]
    fn test_block_shape_and_heads_check() {
        let varmap = VarMap::new();
        let block = GptBlock::new(2, 8, builder(&varmap)).unwrap();
        let xs = Tensor::randn(0f32, 1.0, (3, 5, 8), &Device::Cpu).unwrap();
        assert_eq!(block.forward(&xs).unwrap().dims(), &[3, 5, 8]);

        let varmap = VarMap::new();
        assert!(matches!(
            GptBlock::new(3, 8, builder(&varmap)),
            Err(MtilError::Config(_))
        ));
    }

    #[test]
    fn test_future_tokens_do_not_leak() {
        let varmap = VarMap::new();
        let gpt = GptModule::new(2, 2, 4, builder(&varmap)).unwrap();
        assert_eq!(gpt.num_blocks(), 2);

        let xs = Tensor::randn(0f32, 1.0, (1, 4, 4), &Device::Cpu).unwrap();
        let changed = xs
            .slice_assign(
                &[0..1, 3..4, 0..4],
                &Tensor::zeros((1, 1, 4), DType::F32, &Device::Cpu).unwrap(),
            )
            .unwrap();

        let a = gpt.forward(&xs).unwrap();
        let b = gpt.forward(&changed).unwrap();
        let prefix_a: Vec<Vec<f32>> = a.i((0, 0..3)).unwrap().to_vec2().unwrap();
        let prefix_b: Vec<Vec<f32>> = b.i((0, 0..3)).unwrap().to_vec2().unwrap();
        for (ra, rb) in prefix_a.iter().zip(&prefix_b) {
            for (x, y) in ra.iter().zip(rb) {
                assert!((x - y).abs() < 1e-5);
            }
        }
    }
}
