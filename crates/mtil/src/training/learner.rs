//! Proximal Policy Optimization learner.

use super::optimizer::NetworkOptimizer;
use super::ppo::{approx_kl, gae_lambda_returns, ppo_pi_loss, ppo_vf_loss};
use super::rollout::Rollout;
use super::{array_to_tensor, Learner};
use crate::buffer::RolloutBuffer;
use crate::checkpoint::Checkpointable;
use crate::config::{ExperimentConfig, LearnerConfig};
use crate::env::Env;
use crate::log::Metrics;
use crate::nn::{HasVarMap, Network};
use crate::normalization::{RmsState, RunningMeanStd};
use crate::policy::Policy;
use crate::utils::PrngKey;
use crate::{MtilError, Result};
use candle_core::{Device, Tensor, D};
use ndarray::{s, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

const POLICY_FILE: &str = "policy.safetensors";
const VF_FILE: &str = "vf.safetensors";
const LEARNER_STATE_FILE: &str = "learner_state.json";

/// Running means of named scalars.
#[derive(Default)]
struct MeanTracker {
    sums: BTreeMap<String, (f64, u64)>,
}

impl MeanTracker {
    fn add(&mut self, name: impl Into<String>, value: f64) {
        let entry = self.sums.entry(name.into()).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }

    fn means(&self) -> impl Iterator<Item = (&String, f64)> {
        self.sums
            .iter()
            .map(|(name, (sum, count))| (name, sum / (*count).max(1) as f64))
    }

    /// Add the means of `other` as single observations.
    fn add_means(&mut self, other: &MeanTracker) {
        for (name, value) in other.means() {
            self.add(name.clone(), value);
        }
    }
}

/// Learner state that lives outside the network weights.
#[derive(Serialize, Deserialize)]
struct LearnerState {
    num_updates: u64,
    sample_key: u64,
    obs_rms: Option<RmsState>,
    value_rms: Option<RmsState>,
}

/// Result of the minibatch loop on one rollout.
struct OptimizeOutcome {
    /// Gradient steps applied to the networks
    applied: usize,
    /// Index of the last minibatch visited
    last_step: usize,
    /// Whether the approximate KL ended the loop
    stopped: bool,
}

/// Rollout data prepared for the minibatch loop. Every tensor has the
/// rollout length as its first dimension.
struct Batch {
    obs: Tensor,
    acts: Tensor,
    rets: Tensor,
    vals: Tensor,
    advs: Tensor,
    old_lprobs: Tensor,
}

/// PPO with separate policy and value networks.
///
/// Each call to [`update`](Learner::update) runs `num_update_steps`
/// iterations of rollout collection followed by `opt_epochs` minibatch
/// gradient steps. An approximate-KL early stop ends the whole call.
///
/// `losses_info/num_updates` is the index `update_i * opt_epochs + opt_i`
/// of the last optimization step reached, less one when that step was
/// skipped; `losses_info/num_gradient_steps` counts applied steps.
pub struct Ppo<E: Env> {
    config: LearnerConfig,
    policy: Policy,
    pi: Network,
    vf: Network,
    pi_opt: NetworkOptimizer,
    vf_opt: NetworkOptimizer,
    rollout: Rollout<E>,
    buffer: RolloutBuffer,
    obs_rms: Option<RunningMeanStd>,
    value_rms: Option<RunningMeanStd>,
    sample_key: PrngKey,
    num_updates: u64,
    device: Device,
}

impl<E: Env> Ppo<E> {
    pub fn new(config: &ExperimentConfig, env: E) -> Result<Self> {
        Self::with_device(config, env, Device::Cpu)
    }

    pub fn with_device(config: &ExperimentConfig, env: E, device: Device) -> Result<Self> {
        config.validate()?;
        let learner_config = config.learner_config.clone();
        let seeds = &learner_config.seeds;

        let obs_dim = env.observation_space().flat_dim();
        let action_space = env.action_space();
        let policy = Policy::new(
            learner_config.policy_distribution,
            &action_space,
            learner_config.min_std,
        )?;

        let (pi_key, vf_key) = PrngKey::new(seeds.model_seed).split2();
        let pi = Network::new(
            &config.model_config.policy,
            obs_dim,
            policy.output_dim(),
            &device,
            pi_key,
        )?;
        let vf = Network::new(&config.model_config.vf, obs_dim, 1, &device, vf_key)?;
        let pi_opt = NetworkOptimizer::new(&config.optimizer_config.policy, pi.var_map().all_vars())?;
        let vf_opt = NetworkOptimizer::new(&config.optimizer_config.vf, vf.var_map().all_vars())?;

        let rollout = Rollout::new(env, seeds.env_seed, PrngKey::new(seeds.env_seed));
        let sample_key = PrngKey::new(seeds.buffer_seed);
        let buffer = RolloutBuffer::new(
            learner_config.update_frequency,
            obs_dim,
            policy.stored_action_dim(),
        );

        tracing::info!(
            obs_dim,
            action_dim = action_space.action_dim(),
            policy = ?learner_config.policy_distribution,
            pi_params = pi.num_parameters(),
            vf_params = vf.num_parameters(),
            "Initialized PPO learner"
        );

        Ok(Self {
            obs_rms: learner_config
                .obs_rms
                .then(|| RunningMeanStd::new(obs_dim)),
            value_rms: learner_config.value_rms.then(|| RunningMeanStd::new(1)),
            config: learner_config,
            policy,
            pi,
            vf,
            pi_opt,
            vf_opt,
            rollout,
            buffer,
            sample_key,
            num_updates: 0,
            device,
        })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn policy_network(&self) -> &Network {
        &self.pi
    }

    pub fn value_network(&self) -> &Network {
        &self.vf
    }

    pub fn rollout(&self) -> &Rollout<E> {
        &self.rollout
    }

    pub fn obs_rms(&self) -> Option<&RunningMeanStd> {
        self.obs_rms.as_ref()
    }

    /// Greedy action for a single raw observation.
    pub fn act(&self, obs: &[f32]) -> Result<Vec<f32>> {
        let batch = Array1::from(obs.to_vec()).insert_axis(Axis(0));
        let batch = match &self.obs_rms {
            Some(rms) => rms.normalize(batch.view())?,
            None => batch,
        };
        let obs = array_to_tensor(batch.view(), &self.device)?;
        Ok(self.policy.deterministic_action(&self.pi, &obs)?.row(0).to_vec())
    }

    /// Critic predictions, one per row.
    fn values(&self, obs: &Array2<f32>) -> Result<Array1<f32>> {
        let obs = array_to_tensor(obs.view(), &self.device)?;
        let vals: Vec<f32> = self
            .vf
            .forward(&obs)?
            .detach()
            .squeeze(D::Minus1)?
            .to_vec1()?;
        Ok(Array1::from(vals))
    }

    /// Normalize observations, compute returns and advantages, and record
    /// the per-rollout statistics.
    fn prepare_batch(&mut self, next_obs: Array1<f32>, info: &mut MeanTracker) -> Result<Batch> {
        let steps = self.buffer.len();
        let raw_obs = self.buffer.observations().to_owned();
        let next_obs = next_obs.insert_axis(Axis(0));
        let (obs, next_obs) = match self.obs_rms.as_mut() {
            Some(rms) => {
                rms.update(raw_obs.view())?;
                (rms.normalize(raw_obs.view())?, rms.normalize(next_obs.view())?)
            }
            None => (raw_obs, next_obs),
        };

        let all_obs = ndarray::concatenate(Axis(0), &[obs.view(), next_obs.view()])
            .map_err(|e| MtilError::Training(format!("cannot stack observations: {e}")))?;
        let vals = self.values(&all_obs)?;
        let vals_unnormalized = match &self.value_rms {
            Some(rms) => rms
                .unnormalize(vals.view().insert_axis(Axis(1)))?
                .remove_axis(Axis(1)),
            None => vals.clone(),
        };

        let dones = self.buffer.dones();
        let rets = gae_lambda_returns(
            self.buffer.rewards(),
            vals_unnormalized.view(),
            dones.view(),
            self.config.gamma,
            self.config.gae_lambda,
        )?;
        let rets = match self.value_rms.as_mut() {
            Some(rms) => {
                let rets = rets.insert_axis(Axis(1));
                rms.update(rets.view())?;
                rms.normalize(rets.view())?.remove_axis(Axis(1))
            }
            None => rets,
        };

        let vals = vals.slice(s![..steps]).to_owned();
        let mut advs = &rets - &vals;
        if self.config.normalize_advantage {
            let mean = advs.mean().unwrap_or(0.0);
            let std = advs.std(0.0);
            advs.mapv_inplace(|a| (a - mean) / (std + self.config.eps as f32));
        }

        info.add("losses_info/return", f64::from(rets.mean().unwrap_or(0.0)));
        info.add("losses_info/advantage", f64::from(advs.mean().unwrap_or(0.0)));
        info.add("losses_info/value", f64::from(vals.mean().unwrap_or(0.0)));

        let obs = array_to_tensor(obs.view(), &self.device)?;
        let acts = array_to_tensor(self.buffer.actions(), &self.device)?;
        let (old_lprobs, _) = self.policy.lprob(&self.pi, &obs, &acts)?;

        Ok(Batch {
            obs,
            acts,
            rets: Tensor::from_vec(rets.to_vec(), steps, &self.device)?,
            vals: Tensor::from_vec(vals.to_vec(), steps, &self.device)?,
            advs: Tensor::from_vec(advs.to_vec(), steps, &self.device)?,
            old_lprobs: old_lprobs.detach(),
        })
    }

    /// Minibatch order for one rollout: one permutation of the rollout per
    /// optimization step, concatenated. The learner keeps the first split
    /// key for the next rollout.
    fn minibatch_indices(&mut self) -> Vec<u32> {
        let keys = self.sample_key.split(self.config.opt_epochs + 1);
        self.sample_key = keys[0];
        keys[1..]
            .iter()
            .flat_map(|key| key.permutation(self.config.update_frequency))
            .map(|i| i as u32)
            .collect()
    }

    /// Minibatch gradient steps on one rollout.
    fn optimize(&mut self, batch: &Batch, info: &mut MeanTracker) -> Result<OptimizeOutcome> {
        let idxes = self.minibatch_indices();
        let batch_size = self.config.opt_batch_size;
        let ent_coef = self.config.ent_loss_setting.value(self.num_updates);
        let pi_coef = self.config.pi_loss_setting.coefficient;
        let vf_coef = self.config.vf_loss_setting.coefficient;
        let mut outcome = OptimizeOutcome {
            applied: 0,
            last_step: 0,
            stopped: false,
        };

        for opt_i in 0..self.config.opt_epochs {
            outcome.last_step = opt_i;
            let mb = &idxes[opt_i * batch_size..(opt_i + 1) * batch_size];
            let mb = Tensor::from_slice(mb, mb.len(), &self.device)?;
            let obs = batch.obs.index_select(&mb, 0)?;
            let acts = batch.acts.index_select(&mb, 0)?;
            let old_lprobs = batch.old_lprobs.index_select(&mb, 0)?;

            let (lprobs, dist) = self.policy.lprob(&self.pi, &obs, &acts)?;
            let (pi_loss, pi_info) = ppo_pi_loss(
                &self.config.pi_loss_setting.objective,
                &lprobs,
                &old_lprobs,
                &batch.advs.index_select(&mb, 0)?,
            )?;
            let entropy = dist.entropy()?.mean_all()?;

            let vals = self.vf.forward(&obs)?.squeeze(D::Minus1)?;
            let (vf_loss, vf_num_clipped) = ppo_vf_loss(
                self.config.vf_loss_setting.clip_param,
                &vals,
                &batch.vals.index_select(&mb, 0)?,
                &batch.rets.index_select(&mb, 0)?,
            )?;

            let agg_loss = (pi_loss.affine(pi_coef, 0.0)? + vf_loss.affine(vf_coef, 0.0)?)?
                .sub(&entropy.affine(ent_coef, 0.0)?)?;
            let agg_value = f64::from(agg_loss.to_scalar::<f32>()?);
            if !agg_value.is_finite() {
                return Err(MtilError::NonFiniteLoss(format!(
                    "aggregate loss {agg_value} at update {} step {opt_i}",
                    self.num_updates
                )));
            }

            let kl = approx_kl(&lprobs, &old_lprobs)?;
            let stop = self.config.kl_threshold.is_some_and(|threshold| kl > threshold);

            let mut grads = agg_loss.backward()?;
            let pi_grad_norm = self.pi_opt.grad_norm(&grads)?;
            let vf_grad_norm = self.vf_opt.grad_norm(&grads)?;
            if !stop || self.config.update_before_early_stopping {
                self.pi_opt.step(&mut grads)?;
                self.vf_opt.step(&mut grads)?;
                outcome.applied += 1;
            }

            info.add("losses/aggregate_loss", agg_value);
            info.add("losses/pi", f64::from(pi_loss.to_scalar::<f32>()?));
            info.add("losses/vf", f64::from(vf_loss.to_scalar::<f32>()?));
            info.add("losses_info/entropy", f64::from(entropy.to_scalar::<f32>()?));
            info.add("losses_info/pi_num_clipped", pi_info.num_clipped);
            info.add("losses_info/pi_log_prob", pi_info.log_prob);
            info.add("losses_info/is_ratio", pi_info.is_ratio);
            info.add("losses_info/vf_num_clipped", vf_num_clipped);
            info.add("losses_info/approx_kl", kl);
            info.add("grad_norm/pi", pi_grad_norm);
            info.add("grad_norm/vf", vf_grad_norm);
            for (name, param) in dist.params() {
                let mean_abs = param.abs()?.mean_all()?.to_scalar::<f32>()?;
                info.add(format!("policy/{name}"), f64::from(mean_abs));
            }

            if stop {
                outcome.stopped = true;
                tracing::info!(
                    update = self.num_updates,
                    step = opt_i,
                    kl,
                    applied = self.config.update_before_early_stopping,
                    "Early stopping on approximate KL"
                );
                break;
            }
        }
        Ok(outcome)
    }

    fn action_metrics(&self, metrics: &mut Metrics) {
        let acts = self.buffer.actions();
        for (i, column) in acts.axis_iter(Axis(1)).enumerate() {
            let abs = column.mapv(f32::abs);
            let saturation = abs.iter().copied().fold(0.0f32, f32::max);
            metrics.insert(
                format!("action/action_{i}_saturation"),
                f64::from(saturation),
            );
            metrics.insert(
                format!("action/action_{i}_mean"),
                f64::from(abs.mean().unwrap_or(0.0)),
            );
        }
    }
}

impl<E: Env> Learner for Ppo<E> {
    fn update(&mut self) -> Result<Metrics> {
        let mut info = MeanTracker::default();
        let mut num_gradient_steps = 0;
        let mut step_count = 0i64;
        let mut rollout_time = 0.0;
        let mut update_time = 0.0;

        for update_i in 0..self.config.num_update_steps {
            let tic = Instant::now();
            self.buffer.clear();
            let next_obs = self.rollout.rollout(
                &self.policy,
                &self.pi,
                self.obs_rms.as_ref(),
                &mut self.buffer,
                self.config.update_frequency,
            )?;
            rollout_time += tic.elapsed().as_secs_f64();

            let tic = Instant::now();
            let mut step_info = MeanTracker::default();
            let batch = self.prepare_batch(next_obs, &mut step_info)?;
            let outcome = self.optimize(&batch, &mut step_info)?;
            self.num_updates += 1;
            update_time += tic.elapsed().as_secs_f64();

            // Minibatch means first, then the mean over rollouts.
            info.add_means(&step_info);
            num_gradient_steps += outcome.applied;
            let skipped = outcome.stopped && !self.config.update_before_early_stopping;
            step_count = (update_i * self.config.opt_epochs + outcome.last_step) as i64
                - i64::from(skipped);
            if outcome.stopped {
                break;
            }
        }

        let mut metrics: Metrics = info
            .means()
            .map(|(name, value)| (name.clone(), value))
            .collect();
        metrics.insert("losses_info/num_updates".to_string(), step_count as f64);
        metrics.insert(
            "losses_info/num_gradient_steps".to_string(),
            num_gradient_steps as f64,
        );
        metrics.insert(
            "interaction/average_return".to_string(),
            self.rollout.latest_average_return(),
        );
        metrics.insert(
            "interaction/average_episode_length".to_string(),
            self.rollout.latest_average_episode_length(),
        );
        metrics.insert("time/rollout_time".to_string(), rollout_time);
        metrics.insert("time/update_time".to_string(), update_time);
        for (name, norm) in self.pi.param_norms()? {
            metrics.insert(format!("param_norm/pi/{name}"), norm);
        }
        for (name, norm) in self.vf.param_norms()? {
            metrics.insert(format!("param_norm/vf/{name}"), norm);
        }
        self.action_metrics(&mut metrics);
        if let Some(rms) = &self.obs_rms {
            metrics.extend(rms.metrics("rms/obs"));
        }
        if let Some(rms) = &self.value_rms {
            metrics.extend(rms.metrics("rms/value"));
        }
        Ok(metrics)
    }

    fn num_updates(&self) -> u64 {
        self.num_updates
    }

    fn latest_average_return(&self) -> f64 {
        self.rollout.latest_average_return()
    }

    fn env_steps(&self) -> u64 {
        self.rollout.steps_taken()
    }
}

impl<E: Env> Checkpointable for Ppo<E> {
    fn save_checkpoint(&self, dir: &Path) -> Result<()> {
        self.pi.save(dir.join(POLICY_FILE))?;
        self.vf.save(dir.join(VF_FILE))?;
        let state = LearnerState {
            num_updates: self.num_updates,
            sample_key: self.sample_key.seed(),
            obs_rms: self.obs_rms.as_ref().map(RunningMeanStd::state),
            value_rms: self.value_rms.as_ref().map(RunningMeanStd::state),
        };
        let file = std::fs::File::create(dir.join(LEARNER_STATE_FILE))?;
        serde_json::to_writer_pretty(file, &state)?;
        Ok(())
    }

    fn load_checkpoint(&mut self, dir: &Path) -> Result<()> {
        self.pi.load(dir.join(POLICY_FILE))?;
        self.vf.load(dir.join(VF_FILE))?;
        let file = std::fs::File::open(dir.join(LEARNER_STATE_FILE))?;
        let state: LearnerState = serde_json::from_reader(std::io::BufReader::new(file))?;
        self.num_updates = state.num_updates;
        self.sample_key = PrngKey::new(state.sample_key);
        if let Some(rms) = state.obs_rms {
            self.obs_rms = Some(RunningMeanStd::from_state(rms)?);
        }
        if let Some(rms) = state.value_rms {
            self.value_rms = Some(RunningMeanStd::from_state(rms)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PolicyDistribution, PpoObjective};
    use crate::env::{EnvInfo, Space, StepResult};
    use crate::schedule::Schedule;
    use ndarray::{ArrayD, IxDyn};

    /// Reward 1 for choosing the action matching the sign of the observation.
    struct SignEnv {
        state: f32,
        t: u32,
        rng: rand_chacha::ChaCha8Rng,
    }

    impl SignEnv {
        fn new() -> Self {
            Self {
                state: 1.0,
                t: 0,
                rng: PrngKey::new(0).rng(),
            }
        }

        fn obs(&self) -> ArrayD<f32> {
            ArrayD::from_elem(IxDyn(&[1]), self.state)
        }
    }

    impl Env for SignEnv {
        fn observation_space(&self) -> Space {
            Space::uniform(&[1], -1.0, 1.0)
        }

        fn action_space(&self) -> Space {
            Space::discrete(2)
        }

        fn reset(&mut self, seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
            use rand::{Rng, SeedableRng};
            if let Some(seed) = seed {
                self.rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
            }
            self.t = 0;
            self.state = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            (self.obs(), EnvInfo::new())
        }

        fn step(&mut self, action: &ArrayD<f32>) -> StepResult {
            use rand::Rng;
            let correct = (action[[0]] > 0.5) == (self.state > 0.0);
            self.t += 1;
            self.state = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            StepResult {
                observation: self.obs(),
                reward: if correct { 1.0 } else { 0.0 },
                terminated: false,
                truncated: self.t >= 10,
                info: EnvInfo::new(),
            }
        }
    }

    /// Constant observation with a one-dimensional continuous action.
    struct PointEnv {
        t: u32,
    }

    impl Env for PointEnv {
        fn observation_space(&self) -> Space {
            Space::uniform(&[2], -1.0, 1.0)
        }

        fn action_space(&self) -> Space {
            Space::uniform(&[1], -1.0, 1.0)
        }

        fn reset(&mut self, _seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
            self.t = 0;
            (ArrayD::from_elem(IxDyn(&[2]), 0.5), EnvInfo::new())
        }

        fn step(&mut self, action: &ArrayD<f32>) -> StepResult {
            self.t += 1;
            StepResult {
                observation: ArrayD::from_elem(IxDyn(&[2]), 0.5),
                reward: -(action[[0]] - 0.5).powi(2),
                terminated: self.t >= 5,
                truncated: false,
                info: EnvInfo::new(),
            }
        }
    }

    fn discrete_config() -> ExperimentConfig {
        let mut config = ExperimentConfig::default();
        config.learner_config = LearnerConfig {
            policy_distribution: PolicyDistribution::Softmax,
            opt_epochs: 4,
            ..LearnerConfig::default().with_batching(64, 16)
        };
        config
    }

    #[test]
    fn test_metrics_average_per_rollout_first() {
        let mut first = MeanTracker::default();
        for loss in [1.0, 1.0, 1.0, 1.0] {
            first.add("losses/pi", loss);
        }
        let mut stopped_early = MeanTracker::default();
        stopped_early.add("losses/pi", 4.0);

        let mut info = MeanTracker::default();
        info.add_means(&first);
        info.add_means(&stopped_early);
        let means: BTreeMap<_, _> = info.means().collect();
        assert_eq!(means[&"losses/pi".to_string()], 2.5);
    }

    #[test]
    fn test_update_reports_metrics() {
        let mut ppo = Ppo::new(&discrete_config(), SignEnv::new()).unwrap();
        let metrics = ppo.update().unwrap();

        for key in [
            "losses/aggregate_loss",
            "losses/pi",
            "losses/vf",
            "losses_info/entropy",
            "losses_info/num_updates",
            "losses_info/num_gradient_steps",
            "losses_info/return",
            "losses_info/advantage",
            "losses_info/value",
            "losses_info/pi_num_clipped",
            "losses_info/pi_log_prob",
            "losses_info/vf_num_clipped",
            "losses_info/is_ratio",
            "losses_info/approx_kl",
            "grad_norm/pi",
            "grad_norm/vf",
            "interaction/average_return",
            "interaction/average_episode_length",
            "time/rollout_time",
            "time/update_time",
            "action/action_0_saturation",
            "action/action_0_mean",
        ] {
            assert!(metrics.contains_key(key), "missing metric {key}");
        }
        assert_eq!(metrics["losses_info/num_updates"], 3.0);
        assert_eq!(metrics["losses_info/num_gradient_steps"], 4.0);
        assert_eq!(metrics["interaction/average_episode_length"], 10.0);
        assert!(metrics.keys().any(|k| k.starts_with("param_norm/pi/")));
        assert_eq!(ppo.num_updates(), 1);
        assert_eq!(ppo.env_steps(), 64);
    }

    #[test]
    fn test_num_update_steps_counts_updates() {
        let mut config = discrete_config();
        config.learner_config.num_update_steps = 3;
        let mut ppo = Ppo::new(&config, SignEnv::new()).unwrap();
        let metrics = ppo.update().unwrap();
        assert_eq!(ppo.num_updates(), 3);
        assert_eq!(metrics["losses_info/num_updates"], 11.0);
        assert_eq!(metrics["losses_info/num_gradient_steps"], 12.0);
    }

    #[test]
    fn test_updates_are_deterministic() {
        let run = || {
            let mut ppo = Ppo::new(&discrete_config(), SignEnv::new()).unwrap();
            ppo.update().unwrap();
            ppo.update().unwrap()["losses/aggregate_loss"]
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_kl_early_stopping() {
        let mut config = discrete_config();
        config.learner_config.kl_threshold = Some(1e-12);
        config.optimizer_config.policy = config.optimizer_config.policy.clone().with_lr(0.5);
        config.learner_config.opt_epochs = 8;

        // The first minibatch has zero KL, the second one sees the update.
        let mut ppo = Ppo::new(&config, SignEnv::new()).unwrap();
        let metrics = ppo.update().unwrap();
        assert!(metrics["losses_info/num_gradient_steps"] < 8.0);

        config.learner_config.update_before_early_stopping = true;
        let mut eager = Ppo::new(&config, SignEnv::new()).unwrap();
        let eager_metrics = eager.update().unwrap();
        assert_eq!(
            eager_metrics["losses_info/num_gradient_steps"],
            metrics["losses_info/num_gradient_steps"] + 1.0
        );
        assert_eq!(
            eager_metrics["losses_info/num_updates"],
            metrics["losses_info/num_updates"] + 1.0
        );
    }

    #[test]
    fn test_kl_early_stop_ends_update() {
        let mut config = discrete_config();
        config.learner_config.kl_threshold = Some(1e-12);
        config.learner_config.num_update_steps = 3;
        config.learner_config.opt_epochs = 8;
        config.optimizer_config.policy = config.optimizer_config.policy.clone().with_lr(0.5);

        let mut ppo = Ppo::new(&config, SignEnv::new()).unwrap();
        let metrics = ppo.update().unwrap();
        assert_eq!(ppo.num_updates(), 1);
        assert_eq!(ppo.env_steps(), 64);
        assert!(metrics["losses_info/num_gradient_steps"] < 8.0);
        assert!(metrics["losses_info/num_updates"] < 8.0);

        // The next call starts from a fresh rollout.
        ppo.update().unwrap();
        assert_eq!(ppo.num_updates(), 2);
        assert_eq!(ppo.env_steps(), 128);
    }

    /// Reward 1 on every step, never ending within a rollout.
    struct ConstantRewardEnv;

    impl Env for ConstantRewardEnv {
        fn observation_space(&self) -> Space {
            Space::uniform(&[1], -1.0, 1.0)
        }

        fn action_space(&self) -> Space {
            Space::discrete(2)
        }

        fn reset(&mut self, _seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
            (ArrayD::zeros(IxDyn(&[1])), EnvInfo::new())
        }

        fn step(&mut self, _action: &ArrayD<f32>) -> StepResult {
            StepResult {
                observation: ArrayD::zeros(IxDyn(&[1])),
                reward: 1.0,
                terminated: false,
                truncated: false,
                info: EnvInfo::new(),
            }
        }
    }

    #[test]
    fn test_value_rms_unnormalizes_critic_before_gae() {
        let mut config = discrete_config();
        config.learner_config.value_rms = true;
        config.learner_config.gamma = 0.5;
        let mut ppo = Ppo::new(&config, ConstantRewardEnv).unwrap();

        // A zero critic predicts the running mean once unnormalized. With
        // mean 2 = 1 / (1 - gamma) every GAE return is exactly 2, which
        // normalizes to 0. Without unnormalization the returns would
        // bootstrap from 0 and fall below the mean.
        for var in ppo.vf.var_map().all_vars() {
            var.set(&var.zeros_like().unwrap()).unwrap();
        }
        ppo.value_rms = Some(
            RunningMeanStd::from_state(RmsState {
                mean: vec![2.0],
                var: vec![4.0],
                count: 1e6,
            })
            .unwrap(),
        );

        let metrics = ppo.update().unwrap();
        assert!(
            metrics["losses_info/return"].abs() < 1e-6,
            "normalized return {}",
            metrics["losses_info/return"]
        );
        assert_eq!(metrics["losses_info/value"], 0.0);
        let rms = ppo.value_rms.as_ref().unwrap();
        assert!((rms.mean()[0] - 2.0).abs() < 1e-9);
        assert!(rms.var()[0] < 4.0);
    }

    #[test]
    fn test_learns_sign_task() {
        let mut config = discrete_config();
        config.learner_config = LearnerConfig {
            policy_distribution: PolicyDistribution::Softmax,
            opt_epochs: 32,
            ent_loss_setting: Schedule::constant(0.0),
            ..LearnerConfig::default().with_batching(200, 50)
        };
        config.optimizer_config.policy = config.optimizer_config.policy.clone().with_lr(3e-3);
        config.optimizer_config.vf = config.optimizer_config.vf.clone().with_lr(3e-3);

        let mut ppo = Ppo::new(&config, SignEnv::new()).unwrap();
        for _ in 0..20 {
            ppo.update().unwrap();
        }
        let ret = ppo.latest_average_return();
        assert!(ret > 7.0, "average return {ret}");
        assert_eq!(ppo.act(&[1.0]).unwrap(), vec![1.0]);
        assert_eq!(ppo.act(&[-1.0]).unwrap(), vec![0.0]);
    }

    #[test]
    fn test_continuous_with_normalization_and_reverse_kl() {
        let mut config = ExperimentConfig::default();
        config.learner_config = LearnerConfig {
            policy_distribution: PolicyDistribution::SquashedGaussian,
            obs_rms: true,
            value_rms: true,
            opt_epochs: 4,
            pi_loss_setting: crate::config::PiLossSetting {
                objective: PpoObjective::ReverseKl { beta: 0.1 },
                coefficient: 1.0,
            },
            ..LearnerConfig::default().with_batching(40, 10)
        };
        config.learner_config.vf_loss_setting.clip_param = Some(0.2);

        let mut ppo = Ppo::new(&config, PointEnv { t: 0 }).unwrap();
        let metrics = ppo.update().unwrap();
        assert!(metrics["losses/aggregate_loss"].is_finite());
        assert!(metrics["action/action_0_saturation"] <= 1.0);
        assert!(metrics.contains_key("rms/obs/mean"));
        assert!(metrics.contains_key("rms/value/var"));
        assert!(metrics.contains_key("policy/std"));
        assert_eq!(ppo.obs_rms().unwrap().count().round(), 40.0);
    }

    #[test]
    fn test_deterministic_policy_is_rejected() {
        let mut config = discrete_config();
        config.learner_config.policy_distribution = PolicyDistribution::Deterministic;
        assert!(matches!(
            Ppo::new(&config, PointEnv { t: 0 }),
            Err(MtilError::Config(_))
        ));
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = discrete_config();
        config.learner_config.obs_rms = true;
        let mut ppo = Ppo::new(&config, SignEnv::new()).unwrap();
        ppo.update().unwrap();
        ppo.save_checkpoint(dir.path()).unwrap();

        let mut restored = Ppo::new(&config, SignEnv::new()).unwrap();
        restored.load_checkpoint(dir.path()).unwrap();
        assert_eq!(restored.num_updates(), 1);
        assert_eq!(
            restored.obs_rms().unwrap().state(),
            ppo.obs_rms().unwrap().state()
        );
        assert_eq!(restored.act(&[1.0]).unwrap(), ppo.act(&[1.0]).unwrap());
    }
}
