use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn write_json(path: &Path, value: serde_json::Value) {
    std::fs::write(path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
}

fn small_experiment(path: &Path) {
    write_json(
        path,
        serde_json::json!({
            "learner_config": {
                "update_frequency": 64,
                "opt_batch_size": 32,
                "opt_epochs": 2,
                "policy_distribution": "softmax"
            },
            "model_config": {
                "policy": { "architecture": "mlp", "layers": [16], "activation": "tanh" },
                "vf": { "architecture": "mlp", "layers": [16], "activation": "tanh" }
            },
            "train_config": {
                "num_epochs": 2,
                "checkpoint_interval": 1,
                "experiment_name": "smoke",
                "show_progress": false
            }
        }),
    );
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("mtil").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("PPO and multitask datasets"));
}

#[test]
fn test_cli_list() {
    let mut cmd = Command::cargo_bin("mtil").unwrap();
    cmd.arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Available environments:"))
        .stdout(predicate::str::contains("continuous_cartpole"))
        .stdout(predicate::str::contains("stratified_multitask_mnist_finegrain"))
        .stdout(predicate::str::contains("squashed_gaussian"));
}

#[test]
fn test_cli_dataset_summary() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("dataset.json");
    write_json(
        &config,
        serde_json::json!({
            "dataset": {
                "dataset_name": "multitask_toy_regression",
                "dataset_kwargs": {
                    "num_sequences": 5,
                    "sequence_length": 8,
                    "basis": "polynomial",
                    "degree": 2
                }
            },
            "dataset_wrapper": {
                "type": "FixedLengthTrajectoryDataset",
                "kwargs": { "sample_seq_len": 4 }
            }
        }),
    );

    let mut cmd = Command::cargo_bin("mtil").unwrap();
    cmd.arg("dataset")
        .arg("--config")
        .arg(&config)
        .arg("--seed")
        .arg("3")
        .assert()
        .success()
        .stdout(predicate::str::contains("multitask_toy_regression"))
        .stdout(predicate::str::contains("items:           25"))
        .stdout(predicate::str::contains("sequence length: 4"));
}

#[test]
fn test_cli_train_and_eval() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("experiment.json");
    small_experiment(&config);

    let mut cmd = Command::cargo_bin("mtil").unwrap();
    cmd.arg("train")
        .arg("--config")
        .arg(&config)
        .arg("--save-path")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Training complete"));

    let run_dir = dir.path().join("smoke");
    assert!(run_dir.join("config.json").is_file());
    assert!(run_dir
        .join("checkpoints")
        .join("checkpoint_epoch_000002")
        .join("policy.safetensors")
        .is_file());

    let final_checkpoint = run_dir.join("final").join("checkpoint_epoch_000002");
    let mut cmd = Command::cargo_bin("mtil").unwrap();
    cmd.arg("eval")
        .arg("--config")
        .arg(&config)
        .arg("--checkpoint")
        .arg(&final_checkpoint)
        .arg("--episodes")
        .arg("2")
        .assert()
        .success()
        .stdout(predicate::str::contains("Average return over 2 episodes"));
}

#[test]
fn test_cli_rejects_unknown_env() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("experiment.json");
    small_experiment(&config);

    let mut cmd = Command::cargo_bin("mtil").unwrap();
    cmd.arg("train")
        .arg("--config")
        .arg(&config)
        .arg("--env")
        .arg("pendulum")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown environment"));
}

#[test]
fn test_cli_rejects_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("experiment.json");
    write_json(
        &config,
        serde_json::json!({
            "learner_config": { "update_frequency": 16, "opt_batch_size": 32 }
        }),
    );

    let mut cmd = Command::cargo_bin("mtil").unwrap();
    cmd.arg("train")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}
