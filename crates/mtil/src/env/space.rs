//! Observation and action spaces.

use ndarray::{ArrayD, IxDyn};
use rand::Rng;

#[derive(Clone, Debug, PartialEq)]
pub enum Space {
    /// `n` choices `{0, ..., n-1}`
    Discrete { n: usize },
    /// Bounded array with per-element limits
    Box {
        low: Vec<f32>,
        high: Vec<f32>,
        shape: Vec<usize>,
    },
}

impl Space {
    pub fn discrete(n: usize) -> Self {
        Space::Discrete { n }
    }

    /// Box with the same bounds for every element.
    pub fn uniform(shape: &[usize], low: f32, high: f32) -> Self {
        let size = shape.iter().product();
        Space::Box {
            low: vec![low; size],
            high: vec![high; size],
            shape: shape.to_vec(),
        }
    }

    pub fn unbounded(shape: &[usize]) -> Self {
        Self::uniform(shape, f32::NEG_INFINITY, f32::INFINITY)
    }

    /// Shape of one sample
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Space::Discrete { .. } => vec![1],
            Space::Box { shape, .. } => shape.clone(),
        }
    }

    /// Number of scalars in a flattened sample
    pub fn flat_dim(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, Space::Discrete { .. })
    }

    /// Number of action choices for discrete spaces, number of action
    /// elements for boxes.
    pub fn action_dim(&self) -> usize {
        match self {
            Space::Discrete { n } => *n,
            Space::Box { .. } => self.flat_dim(),
        }
    }

    /// Uniform sample. Unbounded box elements sample from a unit normal.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> ArrayD<f32> {
        match self {
            Space::Discrete { n } => {
                ArrayD::from_elem(IxDyn(&[1]), rng.gen_range(0..*n) as f32)
            }
            Space::Box { low, high, shape } => {
                let values: Vec<f32> = low
                    .iter()
                    .zip(high)
                    .map(|(&l, &h)| {
                        if l.is_finite() && h.is_finite() && l < h {
                            rng.gen_range(l..h)
                        } else {
                            rng.sample::<f32, _>(rand_distr::StandardNormal)
                        }
                    })
                    .collect();
                ArrayD::from_shape_vec(IxDyn(shape), values)
                    .unwrap_or_else(|_| ArrayD::zeros(IxDyn(shape)))
            }
        }
    }

    pub fn contains(&self, value: &ArrayD<f32>) -> bool {
        match self {
            Space::Discrete { n } => {
                value.len() == 1
                    && value
                        .iter()
                        .all(|&v| v >= 0.0 && v.fract() == 0.0 && (v as usize) < *n)
            }
            Space::Box { low, high, shape } => {
                value.shape() == shape.as_slice()
                    && value
                        .iter()
                        .zip(low.iter().zip(high))
                        .all(|(&v, (&l, &h))| v >= l && v <= h)
            }
        }
    }

    /// Clip a box action into bounds. Discrete actions pass through.
    pub fn clip(&self, value: &ArrayD<f32>) -> ArrayD<f32> {
        match self {
            Space::Discrete { .. } => value.clone(),
            Space::Box { low, high, .. } => {
                let mut clipped = value.clone();
                for ((a, &l), &h) in clipped.iter_mut().zip(low).zip(high) {
                    *a = a.max(l).min(h);
                }
                clipped
            }
        }
    }
}
