//! Environment wrappers.

use super::{Env, EnvInfo, Space, StepResult};
use ndarray::ArrayD;

/// Tracks episode return and length, reporting them in the info of the
/// step that ends an episode.
pub struct EpisodeStats<E: Env> {
    env: E,
    episode_return: f32,
    episode_length: u32,
}

impl<E: Env> EpisodeStats<E> {
    pub fn new(env: E) -> Self {
        Self {
            env,
            episode_return: 0.0,
            episode_length: 0,
        }
    }

    pub fn inner(&self) -> &E {
        &self.env
    }

    pub fn inner_mut(&mut self) -> &mut E {
        &mut self.env
    }
}

impl<E: Env> Env for EpisodeStats<E> {
    fn observation_space(&self) -> Space {
        self.env.observation_space()
    }

    fn action_space(&self) -> Space {
        self.env.action_space()
    }

    fn reset(&mut self, seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
        self.episode_return = 0.0;
        self.episode_length = 0;
        self.env.reset(seed)
    }

    fn step(&mut self, action: &ArrayD<f32>) -> StepResult {
        let mut result = self.env.step(action);

        self.episode_return += result.reward;
        self.episode_length += 1;

        if result.done() {
            result.info = result
                .info
                .with_episode_stats(self.episode_return, self.episode_length);
            self.episode_return = 0.0;
            self.episode_length = 0;
        }

        result
    }

    fn render(&self) -> Option<String> {
        self.env.render()
    }

    fn close(&mut self) {
        self.env.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    struct CountdownEnv {
        step_count: u32,
    }

    impl Env for CountdownEnv {
        fn observation_space(&self) -> Space {
            Space::uniform(&[2], 0.0, 1.0)
        }

        fn action_space(&self) -> Space {
            Space::discrete(2)
        }

        fn reset(&mut self, _seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
            self.step_count = 0;
            (ArrayD::zeros(IxDyn(&[2])), EnvInfo::new())
        }

        fn step(&mut self, _action: &ArrayD<f32>) -> StepResult {
            self.step_count += 1;
            StepResult {
                observation: ArrayD::zeros(IxDyn(&[2])),
                reward: 1.0,
                terminated: self.step_count >= 5,
                truncated: false,
                info: EnvInfo::new(),
            }
        }
    }

    #[test]
    fn test_episode_stats() {
        let mut wrapped = EpisodeStats::new(CountdownEnv { step_count: 0 });
        wrapped.reset(None);

        let action = ArrayD::zeros(IxDyn(&[1]));
        for _ in 0..4 {
            let result = wrapped.step(&action);
            assert!(!result.done());
            assert!(result.info.episode_return.is_none());
        }

        let result = wrapped.step(&action);
        assert!(result.done());
        assert_eq!(result.info.episode_return, Some(5.0));
        assert_eq!(result.info.episode_length, Some(5));
    }
}
