//! Core environment trait definitions.

use super::Space;
use ndarray::ArrayD;

/// Information returned from environment steps
#[derive(Clone, Debug, Default)]
pub struct EnvInfo {
    /// Episode return (if done)
    pub episode_return: Option<f32>,
    /// Episode length (if done)
    pub episode_length: Option<u32>,
}

impl EnvInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_episode_stats(mut self, ret: f32, len: u32) -> Self {
        self.episode_return = Some(ret);
        self.episode_length = Some(len);
        self
    }
}

/// Result from a single environment step
#[derive(Clone, Debug)]
pub struct StepResult {
    /// Observation after the step
    pub observation: ArrayD<f32>,
    pub reward: f32,
    /// Episode ended in a terminal state
    pub terminated: bool,
    /// Episode was cut short (time limit)
    pub truncated: bool,
    pub info: EnvInfo,
}

impl StepResult {
    /// Check if episode is done (terminated or truncated)
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Single-agent environment driven by the rollout.
///
/// The rollout resets the environment itself once `step` reports `done()`.
pub trait Env: Send {
    fn observation_space(&self) -> Space;

    fn action_space(&self) -> Space;

    /// Reset to an initial state. `seed` reseeds the environment's generator.
    fn reset(&mut self, seed: Option<u64>) -> (ArrayD<f32>, EnvInfo);

    fn step(&mut self, action: &ArrayD<f32>) -> StepResult;

    fn render(&self) -> Option<String> {
        None
    }

    fn close(&mut self) {}
}

impl<E: Env + ?Sized> Env for Box<E> {
    fn observation_space(&self) -> Space {
        (**self).observation_space()
    }

    fn action_space(&self) -> Space {
        (**self).action_space()
    }

    fn reset(&mut self, seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
        (**self).reset(seed)
    }

    fn step(&mut self, action: &ArrayD<f32>) -> StepResult {
        (**self).step(action)
    }

    fn render(&self) -> Option<String> {
        (**self).render()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
