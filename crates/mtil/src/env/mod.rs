//! Environment interface consumed by the PPO rollout.
//!
//! Environments are single-agent with array observations and either a
//! discrete or a box action space. Discrete actions travel as a
//! one-element array holding the action index.

mod space;
mod traits;
mod wrappers;

pub use space::Space;
pub use traits::{Env, EnvInfo, StepResult};
pub use wrappers::EpisodeStats;
