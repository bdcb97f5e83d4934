//! Checkpointing of learner state.
//!
//! A checkpoint is a directory holding whatever the learner writes through
//! [`Checkpointable`] plus a `metadata.json` describing when it was taken.

mod manager;
mod state;

pub use manager::{CheckpointConfig, CheckpointManager};
pub use state::{CheckpointMetadata, Checkpointable};
