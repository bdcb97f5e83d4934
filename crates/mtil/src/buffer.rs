//! Rollout storage.

use crate::{MtilError, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Fixed-capacity store for one rollout of transitions.
///
/// Observations are stored flattened and unnormalized. The learner reads
/// the buffer only once it is full.
pub struct RolloutBuffer {
    observations: Array2<f32>,
    actions: Array2<f32>,
    rewards: Array1<f32>,
    terminated: Array1<bool>,
    truncated: Array1<bool>,
    /// Length of the episode each transition belongs to, so far
    episode_lengths: Array1<u32>,
    pos: usize,
}

impl RolloutBuffer {
    pub fn new(capacity: usize, obs_dim: usize, action_dim: usize) -> Self {
        Self {
            observations: Array2::zeros((capacity, obs_dim)),
            actions: Array2::zeros((capacity, action_dim)),
            rewards: Array1::zeros(capacity),
            terminated: Array1::from_elem(capacity, false),
            truncated: Array1::from_elem(capacity, false),
            episode_lengths: Array1::zeros(capacity),
            pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.rewards.len()
    }

    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn is_full(&self) -> bool {
        self.pos == self.capacity()
    }

    /// Drop all stored transitions.
    pub fn clear(&mut self) {
        self.pos = 0;
    }

    /// Append one transition.
    pub fn push(
        &mut self,
        observation: &[f32],
        action: &[f32],
        reward: f32,
        terminated: bool,
        truncated: bool,
        episode_length: u32,
    ) -> Result<()> {
        if self.is_full() {
            return Err(MtilError::Training(format!(
                "rollout buffer is full ({} transitions)",
                self.capacity()
            )));
        }
        if observation.len() != self.observations.ncols() {
            return Err(MtilError::ShapeMismatch {
                expected: vec![self.observations.ncols()],
                actual: vec![observation.len()],
            });
        }
        if action.len() != self.actions.ncols() {
            return Err(MtilError::ShapeMismatch {
                expected: vec![self.actions.ncols()],
                actual: vec![action.len()],
            });
        }
        let i = self.pos;
        self.observations
            .row_mut(i)
            .assign(&ArrayView1::from(observation));
        self.actions.row_mut(i).assign(&ArrayView1::from(action));
        self.rewards[i] = reward;
        self.terminated[i] = terminated;
        self.truncated[i] = truncated;
        self.episode_lengths[i] = episode_length;
        self.pos += 1;
        Ok(())
    }

    pub fn observations(&self) -> ArrayView2<'_, f32> {
        self.observations.slice(ndarray::s![..self.pos, ..])
    }

    pub fn actions(&self) -> ArrayView2<'_, f32> {
        self.actions.slice(ndarray::s![..self.pos, ..])
    }

    pub fn rewards(&self) -> ArrayView1<'_, f32> {
        self.rewards.slice(ndarray::s![..self.pos])
    }

    pub fn terminated(&self) -> ArrayView1<'_, bool> {
        self.terminated.slice(ndarray::s![..self.pos])
    }

    pub fn truncated(&self) -> ArrayView1<'_, bool> {
        self.truncated.slice(ndarray::s![..self.pos])
    }

    pub fn episode_lengths(&self) -> ArrayView1<'_, u32> {
        self.episode_lengths.slice(ndarray::s![..self.pos])
    }

    /// 1.0 where the episode ended after the transition, else 0.0.
    pub fn dones(&self) -> Array1<f32> {
        self.terminated()
            .iter()
            .zip(self.truncated().iter())
            .map(|(&term, &trunc)| if term || trunc { 1.0 } else { 0.0 })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_until_full() {
        let mut buffer = RolloutBuffer::new(3, 2, 1);
        assert!(buffer.is_empty());
        buffer.push(&[0.0, 1.0], &[1.0], 1.0, false, false, 1).unwrap();
        buffer.push(&[1.0, 2.0], &[0.0], 0.5, true, false, 2).unwrap();
        buffer.push(&[2.0, 3.0], &[1.0], 0.0, false, true, 1).unwrap();
        assert!(buffer.is_full());
        assert!(buffer.push(&[0.0, 0.0], &[0.0], 0.0, false, false, 1).is_err());

        assert_eq!(buffer.observations().row(1).to_vec(), vec![1.0, 2.0]);
        assert_eq!(buffer.dones().to_vec(), vec![0.0, 1.0, 1.0]);
        assert_eq!(buffer.episode_lengths().to_vec(), vec![1, 2, 1]);

        buffer.clear();
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.rewards().len(), 0);
    }

    #[test]
    fn test_shape_checks() {
        let mut buffer = RolloutBuffer::new(2, 2, 1);
        assert!(matches!(
            buffer.push(&[0.0], &[0.0], 0.0, false, false, 1),
            Err(MtilError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            buffer.push(&[0.0, 0.0], &[0.0, 1.0], 0.0, false, false, 1),
            Err(MtilError::ShapeMismatch { .. })
        ));
    }
}
