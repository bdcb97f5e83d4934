//! mtil CLI
//!
//! Command-line interface for PPO training runs and dataset inspection.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use mtil::checkpoint::Checkpointable;
use mtil::datasets::{get_dataset, DatasetConfig, Sample, DATASET_NAMES};
use mtil::env::Env;
use mtil::log::{CompositeLogger, ConsoleLogger, MetricLogger};
use mtil::prelude::*;
use mtil::training::Learner;

#[derive(Parser)]
#[command(name = "mtil")]
#[command(version, about = "mtil - PPO and multitask datasets for imitation learning research", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a PPO agent from an experiment config
    Train {
        /// Experiment config (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Environment name
        #[arg(long, default_value = "cartpole")]
        env: String,

        /// Override the run output directory
        #[arg(long)]
        save_path: Option<PathBuf>,

        /// Override the number of epochs
        #[arg(long)]
        epochs: Option<u64>,

        /// Continue from the latest checkpoint of the run
        #[arg(long)]
        resume: bool,
    },

    /// Run the greedy policy of a checkpoint
    Eval {
        /// Experiment config (JSON) the checkpoint was trained with
        #[arg(long)]
        config: PathBuf,

        /// Checkpoint directory
        #[arg(long)]
        checkpoint: PathBuf,

        /// Environment name
        #[arg(long, default_value = "cartpole")]
        env: String,

        /// Number of episodes
        #[arg(long, default_value = "10")]
        episodes: usize,
    },

    /// Generate a dataset and print a summary
    Dataset {
        /// Dataset config (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Generation seed
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// List environments, datasets and policy distributions
    List,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            env,
            save_path,
            epochs,
            resume,
        } => train(config, &env, save_path, epochs, resume)?,
        Commands::Eval {
            config,
            checkpoint,
            env,
            episodes,
        } => eval(config, checkpoint, &env, episodes)?,
        Commands::Dataset { config, seed } => dataset(config, seed)?,
        Commands::List => list(),
    }

    Ok(())
}

fn make_env(name: &str) -> Result<Box<dyn Env>> {
    match mtil_envs::make(name) {
        Some(env) => Ok(env),
        None => bail!(
            "unknown environment '{}' (one of {:?})",
            name,
            mtil_envs::ENV_NAMES
        ),
    }
}

fn load_config(path: &Path) -> Result<ExperimentConfig> {
    ExperimentConfig::from_file(path)
        .with_context(|| format!("failed to load config {}", path.display()))
}

fn make_logger(train_config: &TrainConfig) -> Box<dyn MetricLogger> {
    let mut logger = CompositeLogger::default();
    logger.add(Box::new(ConsoleLogger::new()));
    #[cfg(feature = "tensorboard")]
    {
        if let Some(run_dir) = train_config.run_dir() {
            logger.add(Box::new(mtil::log::TensorBoardLogger::new(
                run_dir.join("tensorboard"),
            )));
        }
    }
    #[cfg(not(feature = "tensorboard"))]
    let _ = train_config;
    Box::new(logger)
}

fn train(
    config_path: PathBuf,
    env_name: &str,
    save_path: Option<PathBuf>,
    epochs: Option<u64>,
    resume: bool,
) -> Result<()> {
    let mut config = load_config(&config_path)?;
    if let Some(path) = save_path {
        config.train_config.save_path = Some(path);
    }
    if let Some(epochs) = epochs {
        config.train_config.num_epochs = epochs;
    }

    tracing::info!(
        env = env_name,
        epochs = config.train_config.num_epochs,
        update_frequency = config.learner_config.update_frequency,
        "Starting training"
    );

    let learner = Ppo::new(&config, make_env(env_name)?)?;
    let logger = make_logger(&config.train_config);
    let mut trainer = Trainer::new(learner, config.train_config.clone(), logger)?;
    trainer.save_config(&config)?;
    if resume && !trainer.resume()? {
        tracing::warn!("No checkpoint found, starting from scratch");
    }
    trainer.train()?;

    let learner = trainer.learner();
    tracing::info!(
        updates = learner.num_updates(),
        average_return = learner.latest_average_return(),
        "Training complete"
    );
    if let Some(run_dir) = config.train_config.run_dir() {
        let path = trainer.save_checkpoint(run_dir.join("final"))?;
        tracing::info!(path = %path.display(), "Saved final checkpoint");
    }
    Ok(())
}

fn eval(config_path: PathBuf, checkpoint: PathBuf, env_name: &str, episodes: usize) -> Result<()> {
    let config = load_config(&config_path)?;
    let mut learner = Ppo::new(&config, make_env(env_name)?)?;
    learner
        .load_checkpoint(&checkpoint)
        .with_context(|| format!("failed to load checkpoint {}", checkpoint.display()))?;

    tracing::info!(env = env_name, episodes, "Starting evaluation");
    let mut env = make_env(env_name)?;
    let mut returns = Vec::with_capacity(episodes);
    for ep in 0..episodes {
        let (mut obs, _) = env.reset(Some(config.learner_config.seeds.env_seed + ep as u64));
        let mut episode_return = 0.0;
        loop {
            let flat: Vec<f32> = obs.iter().copied().collect();
            let action = learner.act(&flat)?;
            let action = ndarray::ArrayD::from_shape_vec(
                ndarray::IxDyn(&env.action_space().shape()),
                action,
            )?;
            let result = env.step(&action);
            episode_return += f64::from(result.reward);
            if result.done() {
                break;
            }
            obs = result.observation;
        }
        println!("Episode {}: return = {:.2}", ep + 1, episode_return);
        returns.push(episode_return);
    }

    println!(
        "Average return over {} episodes: {:.2}",
        episodes,
        mtil::utils::mean(&returns)
    );
    Ok(())
}

fn shape_of(sample: &Sample) -> String {
    match sample {
        Sample::Pair { input, target } => {
            format!("input {:?}, target {:?}", input.shape(), target.shape())
        }
        Sample::Sequence { inputs, targets } => {
            format!("inputs {:?}, targets {:?}", inputs.shape(), targets.shape())
        }
        Sample::Context {
            context_inputs,
            context_targets,
            queries,
            targets,
        } => format!(
            "context inputs {:?}, context targets {:?}, queries {:?}, targets {:?}",
            context_inputs.shape(),
            context_targets.shape(),
            queries.shape(),
            targets.shape()
        ),
    }
}

fn dataset(config_path: PathBuf, seed: u64) -> Result<()> {
    let config = DatasetConfig::from_file(&config_path)
        .with_context(|| format!("failed to load dataset config {}", config_path.display()))?;
    let dataset = get_dataset(&config, seed)?;

    println!("Dataset: {}", config.dataset.name());
    println!("  items:           {}", dataset.len());
    println!("  input dim:       {:?}", dataset.input_dim());
    println!("  output dim:      {:?}", dataset.output_dim());
    if let Some(len) = dataset.sequence_length() {
        println!("  sequence length: {}", len);
    }
    if !dataset.is_empty() {
        println!("  first item:      {}", shape_of(&dataset.get(0)?));
    }
    Ok(())
}

fn list() {
    println!("Available environments:");
    println!();
    println!("  cartpole              CartPole classic control");
    println!("                        discrete action (push left/right)");
    println!();
    println!("  continuous_cartpole   CartPole with a force in [-1, 1]");
    println!("                        continuous action");
    println!();
    println!("Available datasets:");
    println!();
    for name in DATASET_NAMES {
        println!("  {}", name);
    }
    println!();
    println!("Policy distributions:");
    println!();
    println!("  softmax               discrete action spaces");
    println!("  gaussian              continuous action spaces");
    println!("  squashed_gaussian     continuous action spaces, tanh-bounded");
}
