//! CartPole classic control environment.

use mtil::env::{Env, EnvInfo, Space, StepResult};
use ndarray::{ArrayD, IxDyn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::f32::consts::PI;

const GRAVITY: f32 = 9.8;
const MASS_CART: f32 = 1.0;
const MASS_POLE: f32 = 0.1;
const TOTAL_MASS: f32 = MASS_CART + MASS_POLE;
/// Half the pole length
const LENGTH: f32 = 0.5;
const POLE_MASS_LENGTH: f32 = MASS_POLE * LENGTH;
const FORCE_MAG: f32 = 10.0;
const TAU: f32 = 0.02;
const THETA_THRESHOLD: f32 = 12.0 * 2.0 * PI / 360.0;
const X_THRESHOLD: f32 = 2.4;
const MAX_STEPS: u32 = 500;

/// Cart-pole dynamics shared by the discrete and continuous variants.
struct Physics {
    /// x, x_dot, theta, theta_dot
    state: [f32; 4],
    steps: u32,
    rng: ChaCha8Rng,
}

impl Physics {
    fn new() -> Self {
        Self {
            state: [0.0; 4],
            steps: 0,
            rng: ChaCha8Rng::seed_from_u64(0),
        }
    }

    fn observation(&self) -> ArrayD<f32> {
        ArrayD::from_shape_fn(IxDyn(&[4]), |idx| self.state[idx[0]])
    }

    fn reset(&mut self, seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
        if let Some(s) = seed {
            self.rng = ChaCha8Rng::seed_from_u64(s);
        }
        for value in self.state.iter_mut() {
            *value = self.rng.gen_range(-0.05..0.05);
        }
        self.steps = 0;
        (self.observation(), EnvInfo::new())
    }

    fn step(&mut self, force: f32) -> StepResult {
        let [x, x_dot, theta, theta_dot] = self.state;
        let cos_theta = theta.cos();
        let sin_theta = theta.sin();

        let temp = (force + POLE_MASS_LENGTH * theta_dot * theta_dot * sin_theta) / TOTAL_MASS;
        let theta_acc = (GRAVITY * sin_theta - cos_theta * temp)
            / (LENGTH * (4.0 / 3.0 - MASS_POLE * cos_theta * cos_theta / TOTAL_MASS));
        let x_acc = temp - POLE_MASS_LENGTH * theta_acc * cos_theta / TOTAL_MASS;

        // Euler integration
        self.state = [
            x + TAU * x_dot,
            x_dot + TAU * x_acc,
            theta + TAU * theta_dot,
            theta_dot + TAU * theta_acc,
        ];
        self.steps += 1;

        let terminated =
            self.state[0].abs() > X_THRESHOLD || self.state[2].abs() > THETA_THRESHOLD;
        let truncated = !terminated && self.steps >= MAX_STEPS;

        StepResult {
            observation: self.observation(),
            reward: if terminated { 0.0 } else { 1.0 },
            terminated,
            truncated,
            info: EnvInfo::new(),
        }
    }

    fn render(&self) -> String {
        let [x, _, theta, _] = self.state;
        let cart_pos = (((x + X_THRESHOLD) / (2.0 * X_THRESHOLD) * 20.0) as i32).clamp(0, 20);
        let mut line = vec![' '; 21];
        line[cart_pos as usize] = if theta.abs() < 0.1 { '|' } else { '/' };
        format!("[{}]", line.iter().collect::<String>())
    }
}

fn observation_space() -> Space {
    Space::uniform(&[4], -4.8, 4.8)
}

/// A pole is attached to a cart on a frictionless track. The goal is to
/// keep the pole upright by pushing the cart.
///
/// Observation: `[cart_pos, cart_vel, pole_angle, pole_vel]`
/// Action: 0 = push left, 1 = push right
pub struct CartPole {
    physics: Physics,
}

impl CartPole {
    pub fn new() -> Self {
        Self {
            physics: Physics::new(),
        }
    }
}

impl Default for CartPole {
    fn default() -> Self {
        Self::new()
    }
}

impl Env for CartPole {
    fn observation_space(&self) -> Space {
        observation_space()
    }

    fn action_space(&self) -> Space {
        Space::discrete(2)
    }

    fn reset(&mut self, seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
        self.physics.reset(seed)
    }

    fn step(&mut self, action: &ArrayD<f32>) -> StepResult {
        let push_right = action.iter().next().is_some_and(|a| a.round() >= 1.0);
        let force = if push_right { FORCE_MAG } else { -FORCE_MAG };
        self.physics.step(force)
    }

    fn render(&self) -> Option<String> {
        Some(self.physics.render())
    }
}

/// CartPole with a continuous action in `[-1, 1]` scaling the push force.
pub struct ContinuousCartPole {
    physics: Physics,
}

impl ContinuousCartPole {
    pub fn new() -> Self {
        Self {
            physics: Physics::new(),
        }
    }
}

impl Default for ContinuousCartPole {
    fn default() -> Self {
        Self::new()
    }
}

impl Env for ContinuousCartPole {
    fn observation_space(&self) -> Space {
        observation_space()
    }

    fn action_space(&self) -> Space {
        Space::uniform(&[1], -1.0, 1.0)
    }

    fn reset(&mut self, seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
        self.physics.reset(seed)
    }

    fn step(&mut self, action: &ArrayD<f32>) -> StepResult {
        let a = action.iter().next().copied().unwrap_or(0.0).clamp(-1.0, 1.0);
        self.physics.step(a * FORCE_MAG)
    }

    fn render(&self) -> Option<String> {
        Some(self.physics.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(value: f32) -> ArrayD<f32> {
        ArrayD::from_elem(IxDyn(&[1]), value)
    }

    #[test]
    fn test_cartpole_reset() {
        let mut env = CartPole::new();
        let (obs, _) = env.reset(Some(42));
        assert_eq!(obs.len(), 4);
        assert!(obs.iter().all(|v| v.abs() <= 0.05));
        assert!(env.observation_space().contains(&obs));
    }

    #[test]
    fn test_cartpole_step() {
        let mut env = CartPole::new();
        env.reset(Some(42));
        let result = env.step(&push(1.0));
        assert_eq!(result.observation.len(), 4);
        assert_eq!(result.reward, 1.0);
        assert!(!result.done());
    }

    #[test]
    fn test_cartpole_determinism() {
        let mut env1 = CartPole::new();
        let mut env2 = CartPole::new();
        env1.reset(Some(42));
        env2.reset(Some(42));
        for _ in 0..10 {
            let res1 = env1.step(&push(1.0));
            let res2 = env2.step(&push(1.0));
            assert_eq!(res1.observation, res2.observation);
        }
    }

    #[test]
    fn test_constant_push_terminates() {
        let mut env = CartPole::new();
        env.reset(Some(0));
        let mut steps = 0;
        loop {
            let result = env.step(&push(1.0));
            steps += 1;
            if result.done() {
                assert!(result.terminated);
                assert_eq!(result.reward, 0.0);
                break;
            }
        }
        assert!(steps < 100);
    }

    #[test]
    fn test_continuous_matches_discrete_at_full_force() {
        let mut discrete = CartPole::new();
        let mut continuous = ContinuousCartPole::new();
        discrete.reset(Some(7));
        continuous.reset(Some(7));
        for action in [1.0, 0.0, 1.0] {
            let expected = discrete.step(&push(action));
            let actual = continuous.step(&push(2.0 * action - 1.0));
            assert_eq!(expected.observation, actual.observation);
        }
        assert!(!continuous.action_space().is_discrete());
    }

    #[test]
    fn test_render() {
        let mut env = CartPole::new();
        env.reset(Some(1));
        let frame = env.render().unwrap();
        assert!(frame.starts_with('[') && frame.contains('|'));
    }
}
