//! Environment interaction for on-policy learners.

use super::array_to_tensor;
use crate::buffer::RolloutBuffer;
use crate::env::{Env, EpisodeStats, Space};
use crate::nn::Network;
use crate::normalization::RunningMeanStd;
use crate::policy::Policy;
use crate::utils::{mean, PrngKey};
use crate::{MtilError, Result};
use ndarray::{Array1, ArrayD, Axis, IxDyn};
use rand_chacha::ChaCha8Rng;

/// Steps a single environment with the current policy and writes
/// transitions into a [`RolloutBuffer`]. Episodes continue across calls.
pub struct Rollout<E: Env> {
    env: EpisodeStats<E>,
    action_space: Space,
    curr_obs: Option<ArrayD<f32>>,
    curr_episode_length: u32,
    env_seed: u64,
    rng: ChaCha8Rng,
    latest_average_return: f64,
    latest_average_episode_length: f64,
    episodes_completed: u64,
    steps_taken: u64,
}

impl<E: Env> Rollout<E> {
    /// `key` drives action sampling. The first reset uses `env_seed`.
    pub fn new(env: E, env_seed: u64, key: PrngKey) -> Self {
        let action_space = env.action_space();
        Self {
            env: EpisodeStats::new(env),
            action_space,
            curr_obs: None,
            curr_episode_length: 0,
            env_seed,
            rng: key.rng(),
            latest_average_return: 0.0,
            latest_average_episode_length: 0.0,
            episodes_completed: 0,
            steps_taken: 0,
        }
    }

    pub fn env(&self) -> &E {
        self.env.inner()
    }

    /// Mean return of the episodes finished during the latest call to
    /// [`rollout`](Self::rollout), or the previous value if none finished.
    pub fn latest_average_return(&self) -> f64 {
        self.latest_average_return
    }

    pub fn latest_average_episode_length(&self) -> f64 {
        self.latest_average_episode_length
    }

    pub fn episodes_completed(&self) -> u64 {
        self.episodes_completed
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    fn current_observation(&mut self) -> ArrayD<f32> {
        match self.curr_obs.take() {
            Some(obs) => obs,
            None => {
                self.curr_episode_length = 0;
                self.env.reset(Some(self.env_seed)).0
            }
        }
    }

    fn to_env_action(&self, action: &[f32]) -> Result<ArrayD<f32>> {
        let shape = match &self.action_space {
            Space::Discrete { .. } => vec![1],
            Space::Box { shape, .. } => shape.clone(),
        };
        let action = ArrayD::from_shape_vec(IxDyn(&shape), action.to_vec()).map_err(|_| {
            MtilError::ShapeMismatch {
                expected: shape.clone(),
                actual: vec![action.len()],
            }
        })?;
        Ok(self.action_space.clip(&action))
    }

    /// Collect `num_steps` transitions. Observations are normalized with
    /// `obs_rms` for action selection but stored raw. Returns the raw
    /// observation following the last stored transition.
    pub fn rollout(
        &mut self,
        policy: &Policy,
        pi: &Network,
        obs_rms: Option<&RunningMeanStd>,
        buffer: &mut RolloutBuffer,
        num_steps: usize,
    ) -> Result<Array1<f32>> {
        let mut returns = Vec::new();
        let mut lengths = Vec::new();
        let mut obs = self.current_observation();

        for _ in 0..num_steps {
            let flat: Vec<f32> = obs.iter().copied().collect();
            let batch = Array1::from(flat.clone()).insert_axis(Axis(0));
            let policy_obs = match obs_rms {
                Some(rms) => rms.normalize(batch.view())?,
                None => batch,
            };
            let obs_tensor = array_to_tensor(policy_obs.view(), pi.device())?;
            let action = policy.sample(pi, &obs_tensor, &mut self.rng)?;
            let action = action.row(0).to_vec();

            let result = self.env.step(&self.to_env_action(&action)?);
            self.curr_episode_length += 1;
            self.steps_taken += 1;
            buffer.push(
                &flat,
                &action,
                result.reward,
                result.terminated,
                result.truncated,
                self.curr_episode_length,
            )?;

            if result.done() {
                if let Some(ret) = result.info.episode_return {
                    returns.push(f64::from(ret));
                }
                lengths.push(f64::from(self.curr_episode_length));
                self.episodes_completed += 1;
                self.curr_episode_length = 0;
                obs = self.env.reset(None).0;
            } else {
                obs = result.observation;
            }
        }

        if !returns.is_empty() {
            self.latest_average_return = mean(&returns);
            self.latest_average_episode_length = mean(&lengths);
        }
        tracing::debug!(
            num_steps,
            episodes = returns.len(),
            average_return = self.latest_average_return,
            "Rollout complete"
        );

        let next_obs = obs.iter().copied().collect();
        self.curr_obs = Some(obs);
        Ok(next_obs)
    }
}
