//! Metric logging.
//!
//! Learners report a flat [`Metrics`] map per update, keyed by
//! slash-separated names such as `losses/pi` or `interaction/average_return`.
//! The trainer forwards them to a [`MetricLogger`] backend:
//! - `ConsoleLogger` writes grouped lines through `tracing`
//! - `TensorBoardLogger` writes event files (feature `tensorboard`)
//! - `CompositeLogger` fans out to several backends

mod console;
mod logger;
#[cfg(feature = "tensorboard")]
mod tensorboard;

pub use console::ConsoleLogger;
pub use logger::{CompositeLogger, MetricLogger, NoOpLogger};
#[cfg(feature = "tensorboard")]
pub use tensorboard::TensorBoardLogger;

use std::collections::BTreeMap;

/// Scalar metrics for one update, ordered by name.
pub type Metrics = BTreeMap<String, f64>;
