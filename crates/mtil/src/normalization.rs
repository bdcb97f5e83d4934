//! Running statistics for observation and value normalization.

use crate::log::Metrics;
use crate::{MtilError, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

const DEFAULT_EPS: f64 = 1e-8;

/// Serializable snapshot of a [`RunningMeanStd`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RmsState {
    pub mean: Vec<f64>,
    pub var: Vec<f64>,
    pub count: f64,
}

/// Per-feature running mean and variance, merged batch by batch with the
/// parallel variance update.
#[derive(Clone, Debug)]
pub struct RunningMeanStd {
    mean: Array1<f64>,
    var: Array1<f64>,
    count: f64,
    eps: f64,
}

impl RunningMeanStd {
    pub fn new(dim: usize) -> Self {
        Self {
            mean: Array1::zeros(dim),
            var: Array1::ones(dim),
            count: DEFAULT_EPS,
            eps: DEFAULT_EPS,
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn var(&self) -> &Array1<f64> {
        &self.var
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn state(&self) -> RmsState {
        RmsState {
            mean: self.mean.to_vec(),
            var: self.var.to_vec(),
            count: self.count,
        }
    }

    pub fn from_state(state: RmsState) -> Result<Self> {
        if state.mean.len() != state.var.len() {
            return Err(MtilError::ShapeMismatch {
                expected: vec![state.mean.len()],
                actual: vec![state.var.len()],
            });
        }
        Ok(Self {
            mean: Array1::from(state.mean),
            var: Array1::from(state.var),
            count: state.count,
            eps: DEFAULT_EPS,
        })
    }

    fn check(&self, batch: &ArrayView2<f32>) -> Result<()> {
        if batch.ncols() != self.dim() {
            return Err(MtilError::ShapeMismatch {
                expected: vec![batch.nrows(), self.dim()],
                actual: batch.shape().to_vec(),
            });
        }
        Ok(())
    }

    /// Fold a `[n, dim]` batch into the statistics.
    pub fn update(&mut self, batch: ArrayView2<f32>) -> Result<()> {
        self.check(&batch)?;
        let n = batch.nrows();
        if n == 0 {
            return Ok(());
        }
        let batch = batch.mapv(f64::from);
        let batch_mean = batch.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(self.dim()));
        let batch_var = batch.var_axis(Axis(0), 0.0);
        let batch_count = n as f64;

        let delta = &batch_mean - &self.mean;
        let total = self.count + batch_count;
        let m2 = &self.var * self.count
            + &batch_var * batch_count
            + delta.mapv(|d| d * d) * (self.count * batch_count / total);

        self.mean = &self.mean + &(delta * (batch_count / total));
        self.var = m2 / total;
        self.count = total;
        Ok(())
    }

    /// `(x - mean) / sqrt(var + eps)` row by row.
    pub fn normalize(&self, batch: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check(&batch)?;
        let std = self.var.mapv(|v| (v + self.eps).sqrt());
        let mut out = batch.mapv(f64::from);
        for mut row in out.rows_mut() {
            row -= &self.mean;
            row /= &std;
        }
        Ok(out.mapv(|v| v as f32))
    }

    /// Inverse of [`normalize`](Self::normalize).
    pub fn unnormalize(&self, batch: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check(&batch)?;
        let std = self.var.mapv(|v| (v + self.eps).sqrt());
        let mut out = batch.mapv(f64::from);
        for mut row in out.rows_mut() {
            row *= &std;
            row += &self.mean;
        }
        Ok(out.mapv(|v| v as f32))
    }

    /// Summary statistics under `prefix`.
    pub fn metrics(&self, prefix: &str) -> Metrics {
        let mut metrics = Metrics::new();
        let dim = self.dim().max(1) as f64;
        metrics.insert(format!("{prefix}/mean"), self.mean.sum() / dim);
        metrics.insert(format!("{prefix}/var"), self.var.sum() / dim);
        metrics.insert(
            format!("{prefix}/max_var"),
            self.var.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        );
        metrics.insert(format!("{prefix}/count"), self.count);
        metrics
    }
}
