//! Gradient optimizers with learning-rate schedules and norm clipping.

use crate::config::{OptimizerConfig, OptimizerKind};
use crate::schedule::Schedule;
use crate::Result;
use candle_core::backprop::GradStore;
use candle_core::Var;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, SGD};

enum Inner {
    AdamW(AdamW),
    Sgd(SGD),
}

/// Optimizer over one network's variables.
///
/// Several optimizers may step from the same [`GradStore`]; each only reads
/// the gradients of its own variables.
pub struct NetworkOptimizer {
    inner: Inner,
    vars: Vec<Var>,
    lr: Schedule,
    max_grad_norm: Option<f64>,
    step_count: u64,
}

impl NetworkOptimizer {
    pub fn new(config: &OptimizerConfig, vars: Vec<Var>) -> Result<Self> {
        let lr = config.lr.value(0);
        let inner = match config.optimizer {
            OptimizerKind::Adam | OptimizerKind::Adamw => {
                let params = ParamsAdamW {
                    lr,
                    beta1: config.beta1,
                    beta2: config.beta2,
                    eps: config.eps,
                    weight_decay: if config.optimizer == OptimizerKind::Adamw {
                        config.weight_decay
                    } else {
                        0.0
                    },
                };
                Inner::AdamW(AdamW::new(vars.clone(), params)?)
            }
            OptimizerKind::Sgd => Inner::Sgd(SGD::new(vars.clone(), lr)?),
        };
        Ok(Self {
            inner,
            vars,
            lr: config.lr.clone(),
            max_grad_norm: config.max_grad_norm,
            step_count: 0,
        })
    }

    pub fn learning_rate(&self) -> f64 {
        match &self.inner {
            Inner::AdamW(opt) => opt.learning_rate(),
            Inner::Sgd(opt) => opt.learning_rate(),
        }
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Global L2 norm of this optimizer's gradients.
    pub fn grad_norm(&self, grads: &GradStore) -> Result<f64> {
        let mut total = 0.0f64;
        for var in &self.vars {
            if let Some(grad) = grads.get(var.as_tensor()) {
                let sq = grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
                total += f64::from(sq);
            }
        }
        Ok(total.sqrt())
    }

    /// Scale gradients so their global norm is at most `max_grad_norm`.
    fn clip(&self, grads: &mut GradStore, norm: f64) -> Result<()> {
        let Some(max_norm) = self.max_grad_norm else {
            return Ok(());
        };
        if norm <= max_norm {
            return Ok(());
        }
        let coef = max_norm / (norm + 1e-6);
        for var in &self.vars {
            if let Some(grad) = grads.remove(var.as_tensor()) {
                grads.insert(var.as_tensor(), (grad * coef)?);
            }
        }
        Ok(())
    }

    /// Clip, then apply one update at the scheduled learning rate.
    /// Returns the pre-clip gradient norm.
    pub fn step(&mut self, grads: &mut GradStore) -> Result<f64> {
        let norm = self.grad_norm(grads)?;
        self.clip(grads, norm)?;
        let lr = self.lr.value(self.step_count);
        match &mut self.inner {
            Inner::AdamW(opt) => {
                opt.set_learning_rate(lr);
                opt.step(grads)?;
            }
            Inner::Sgd(opt) => {
                opt.set_learning_rate(lr);
                opt.step(grads)?;
            }
        }
        self.step_count += 1;
        Ok(norm)
    }
}
