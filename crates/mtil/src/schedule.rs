//! Scalar schedules indexed by update count.

use serde::{Deserialize, Serialize};

/// A scalar that varies with the number of updates performed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheduler", content = "scheduler_kwargs")]
pub enum Schedule {
    /// Fixed value.
    #[serde(rename = "constant_schedule")]
    Constant { value: f64 },
    /// Linear interpolation from `init_value` to `end_value` over
    /// `transition_steps`, starting after `transition_begin` updates.
    #[serde(rename = "linear_schedule")]
    Linear {
        init_value: f64,
        end_value: f64,
        #[serde(default)]
        transition_begin: u64,
        transition_steps: u64,
    },
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::Constant { value: 0.0 }
    }
}

impl Schedule {
    pub fn constant(value: f64) -> Self {
        Schedule::Constant { value }
    }

    /// Value of the schedule at `count` updates.
    pub fn value(&self, count: u64) -> f64 {
        match *self {
            Schedule::Constant { value } => value,
            Schedule::Linear {
                init_value,
                end_value,
                transition_begin,
                transition_steps,
            } => {
                if transition_steps == 0 {
                    return init_value;
                }
                let progress = count.saturating_sub(transition_begin) as f64
                    / transition_steps as f64;
                let frac = progress.clamp(0.0, 1.0);
                init_value + frac * (end_value - init_value)
            }
        }
    }
}
