//! Multitask 1D regression on a fixed basis.

use super::{check_index, Dataset, Sample};
use crate::utils::PrngKey;
use crate::{MtilError, Result};
use ndarray::{Array1, Array2, Array3, Axis};
use rand::Rng;
use rand_distr::StandardNormal;

/// Supported basis names
pub const BASIS_NAMES: &[&str] = &["polynomial"];

/// Feature map applied to scalar inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Basis {
    /// `[1, x, x^2, ..., x^degree]`
    Polynomial { degree: usize },
}

impl Basis {
    pub fn dim(&self) -> usize {
        match self {
            Basis::Polynomial { degree } => degree + 1,
        }
    }

    pub fn eval(&self, x: f32) -> Array1<f32> {
        match self {
            Basis::Polynomial { degree } => (0..=*degree).map(|p| x.powi(p as i32)).collect(),
        }
    }
}

/// Look up a basis by name.
pub fn get_basis(name: &str, degree: usize) -> Result<Basis> {
    match name {
        "polynomial" => Ok(Basis::Polynomial { degree }),
        other => Err(MtilError::Config(format!(
            "{other} is not supported (one of {BASIS_NAMES:?})"
        ))),
    }
}

/// Each sequence is a separate regression task `y = basis(x) . w + noise`
/// with its own weights `w ~ U(params_bound)`.
pub struct MultitaskFixedBasisRegression1D {
    basis: Basis,
    /// `[num_sequences, basis_dim]`
    params: Array2<f32>,
    /// `[num_sequences, sequence_length, 1]`
    inputs: Array3<f32>,
    targets: Array3<f32>,
}

impl MultitaskFixedBasisRegression1D {
    pub fn new(
        num_sequences: usize,
        sequence_length: usize,
        basis: Basis,
        seed: u64,
        noise: f32,
        params_bound: [f32; 2],
    ) -> Result<Self> {
        let [low, high] = params_bound;
        if low >= high {
            return Err(MtilError::Config(format!(
                "params_bound must be increasing, got [{low}, {high}]"
            )));
        }
        if sequence_length == 0 {
            return Err(MtilError::Config(
                "sequence_length must be positive".to_string(),
            ));
        }

        let keys = PrngKey::new(seed).split(3);
        let mut params_rng = keys[0].rng();
        let mut inputs_rng = keys[1].rng();
        let mut noise_rng = keys[2].rng();

        let params = Array2::from_shape_simple_fn((num_sequences, basis.dim()), || {
            params_rng.gen_range(low..high)
        });
        let inputs = Array3::from_shape_simple_fn((num_sequences, sequence_length, 1), || {
            inputs_rng.gen_range(-1.0f32..1.0)
        });
        let mut targets = Array3::zeros((num_sequences, sequence_length, 1));
        for (seq_i, mut seq_targets) in targets.axis_iter_mut(Axis(0)).enumerate() {
            let weights = params.row(seq_i);
            for t in 0..sequence_length {
                let eps: f32 = noise_rng.sample(StandardNormal);
                seq_targets[[t, 0]] = basis.eval(inputs[[seq_i, t, 0]]).dot(&weights) + noise * eps;
            }
        }

        Ok(Self {
            basis,
            params,
            inputs,
            targets,
        })
    }

    pub fn basis(&self) -> Basis {
        self.basis
    }

    /// Task weights, one row per sequence.
    pub fn params(&self) -> &Array2<f32> {
        &self.params
    }
}

impl Dataset for MultitaskFixedBasisRegression1D {
    fn len(&self) -> usize {
        self.params.nrows()
    }

    fn get(&self, idx: usize) -> Result<Sample> {
        check_index(idx, self.len())?;
        Ok(Sample::Sequence {
            inputs: self.inputs.index_axis(Axis(0), idx).to_owned().into_dyn(),
            targets: self.targets.index_axis(Axis(0), idx).to_owned(),
        })
    }

    fn input_dim(&self) -> Vec<usize> {
        vec![1]
    }

    fn output_dim(&self) -> Vec<usize> {
        vec![1]
    }

    fn sequence_length(&self) -> Option<usize> {
        Some(self.inputs.len_of(Axis(1)))
    }
}
