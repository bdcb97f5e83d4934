//! Multitask datasets.
//!
//! Datasets are generated up front from a seed and indexed by sequence.
//! A dataset is described by a [`DatasetConfig`]:
//!
//! ```json
//! {
//!   "dataset": {
//!     "dataset_name": "multitask_toy_regression",
//!     "dataset_kwargs": { "num_sequences": 100, "sequence_length": 16, "basis": "polynomial", "degree": 2 }
//!   },
//!   "dataset_wrapper": { "type": "ContextDataset", "kwargs": { "context_len": 8 } }
//! }
//! ```

mod basis_regression;
mod mnist;
mod transforms;
mod wrappers;

pub use basis_regression::{get_basis, Basis, MultitaskFixedBasisRegression1D};
pub use mnist::{
    LabeledImages, Mnist, MultitaskMnistFineGrain, MultitaskMnistRandomBinary,
    StratifiedMultitaskMnistFineGrain, NUM_CLASSES,
};
pub use transforms::ImageTransform;
pub use wrappers::{ContextDataset, FixedLengthTrajectoryDataset};

use crate::{MtilError, Result};
use ndarray::{Array1, Array2, ArrayD};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A single dataset item.
#[derive(Clone, Debug, PartialEq)]
pub enum Sample {
    /// One input with its target.
    Pair { input: ArrayD<f32>, target: Array1<f32> },
    /// A sequence of inputs `[L, ...]` with targets `[L, output_dim]`.
    Sequence {
        inputs: ArrayD<f32>,
        targets: Array2<f32>,
    },
    /// Context examples followed by queries to predict.
    Context {
        context_inputs: ArrayD<f32>,
        context_targets: Array2<f32>,
        queries: ArrayD<f32>,
        targets: Array2<f32>,
    },
}

impl Sample {
    /// Inputs and targets of a [`Sample::Sequence`].
    pub fn into_sequence(self) -> Result<(ArrayD<f32>, Array2<f32>)> {
        match self {
            Sample::Sequence { inputs, targets } => Ok((inputs, targets)),
            _ => Err(MtilError::Dataset(
                "expected a sequence sample".to_string(),
            )),
        }
    }
}

/// Indexable collection of samples.
pub trait Dataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, idx: usize) -> Result<Sample>;

    /// Shape of a single input
    fn input_dim(&self) -> Vec<usize>;

    /// Shape of a single target
    fn output_dim(&self) -> Vec<usize>;

    /// Length of every sequence for sequence datasets.
    fn sequence_length(&self) -> Option<usize> {
        None
    }
}

pub(crate) fn check_index(idx: usize, len: usize) -> Result<()> {
    if idx >= len {
        return Err(MtilError::Dataset(format!(
            "index {idx} out of range for dataset of length {len}"
        )));
    }
    Ok(())
}

fn default_basis() -> String {
    "polynomial".to_string()
}

fn default_params_bound() -> [f32; 2] {
    [-0.5, 0.5]
}

fn default_true() -> bool {
    true
}

fn default_skip_step() -> usize {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegressionKwargs {
    pub num_sequences: usize,
    pub sequence_length: usize,
    #[serde(default = "default_basis")]
    pub basis: String,
    pub degree: usize,
    #[serde(default)]
    pub noise: f32,
    #[serde(default = "default_params_bound")]
    pub params_bound: [f32; 2],
}

/// Location of the MNIST IDX files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MnistKwargs {
    pub data_dir: PathBuf,
    #[serde(default = "default_true")]
    pub train: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MnistSequenceKwargs {
    pub data_dir: PathBuf,
    #[serde(default = "default_true")]
    pub train: bool,
    pub num_sequences: usize,
    pub sequence_length: usize,
    #[serde(default)]
    pub random_label: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StratifiedMnistKwargs {
    pub data_dir: PathBuf,
    #[serde(default = "default_true")]
    pub train: bool,
    pub num_sequences: usize,
    pub num_queries: usize,
    #[serde(default)]
    pub random_label: bool,
}

/// The base dataset to generate.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(
    tag = "dataset_name",
    content = "dataset_kwargs",
    rename_all = "snake_case"
)]
pub enum DatasetKind {
    MultitaskToyRegression(RegressionKwargs),
    Mnist(MnistKwargs),
    MultitaskMnistFinegrain(MnistSequenceKwargs),
    StratifiedMultitaskMnistFinegrain(StratifiedMnistKwargs),
    MultitaskMnistRandomBinary(MnistSequenceKwargs),
}

impl DatasetKind {
    pub fn name(&self) -> &'static str {
        match self {
            DatasetKind::MultitaskToyRegression(_) => "multitask_toy_regression",
            DatasetKind::Mnist(_) => "mnist",
            DatasetKind::MultitaskMnistFinegrain(_) => "multitask_mnist_finegrain",
            DatasetKind::StratifiedMultitaskMnistFinegrain(_) => {
                "stratified_multitask_mnist_finegrain"
            }
            DatasetKind::MultitaskMnistRandomBinary(_) => "multitask_mnist_random_binary",
        }
    }
}

/// Supported dataset names
pub const DATASET_NAMES: &[&str] = &[
    "multitask_toy_regression",
    "mnist",
    "multitask_mnist_finegrain",
    "stratified_multitask_mnist_finegrain",
    "multitask_mnist_random_binary",
];

/// Wrapper applied on top of a sequence dataset.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "kwargs")]
pub enum WrapperConfig {
    FixedLengthTrajectoryDataset {
        sample_seq_len: usize,
    },
    ContextDataset {
        context_len: usize,
        #[serde(default = "default_skip_step")]
        skip_step: usize,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub dataset: DatasetKind,
    #[serde(default)]
    pub dataset_wrapper: Option<WrapperConfig>,
}

impl DatasetConfig {
    /// Load a JSON dataset config.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

fn load_images(data_dir: &std::path::Path, train: bool) -> Result<LabeledImages> {
    LabeledImages::from_mnist_dir(data_dir, train)
}

/// Build the dataset described by `config`, generating it from `seed`.
pub fn get_dataset(config: &DatasetConfig, seed: u64) -> Result<Box<dyn Dataset>> {
    let dataset: Box<dyn Dataset> = match &config.dataset {
        DatasetKind::MultitaskToyRegression(kwargs) => {
            Box::new(MultitaskFixedBasisRegression1D::new(
                kwargs.num_sequences,
                kwargs.sequence_length,
                get_basis(&kwargs.basis, kwargs.degree)?,
                seed,
                kwargs.noise,
                kwargs.params_bound,
            )?)
        }
        DatasetKind::Mnist(kwargs) => Box::new(Mnist::new(
            load_images(&kwargs.data_dir, kwargs.train)?,
            ImageTransform::Default,
        )),
        DatasetKind::MultitaskMnistFinegrain(kwargs) => Box::new(MultitaskMnistFineGrain::new(
            load_images(&kwargs.data_dir, kwargs.train)?,
            kwargs.num_sequences,
            kwargs.sequence_length,
            seed,
            kwargs.random_label,
        )?),
        DatasetKind::StratifiedMultitaskMnistFinegrain(kwargs) => {
            Box::new(StratifiedMultitaskMnistFineGrain::new(
                load_images(&kwargs.data_dir, kwargs.train)?,
                kwargs.num_sequences,
                kwargs.num_queries,
                seed,
                kwargs.random_label,
            )?)
        }
        DatasetKind::MultitaskMnistRandomBinary(kwargs) => {
            Box::new(MultitaskMnistRandomBinary::new(
                load_images(&kwargs.data_dir, kwargs.train)?,
                kwargs.num_sequences,
                kwargs.sequence_length,
                seed,
            )?)
        }
    };
    tracing::info!(
        dataset = config.dataset.name(),
        len = dataset.len(),
        seed,
        "Constructed dataset"
    );

    let dataset: Box<dyn Dataset> = match &config.dataset_wrapper {
        None => dataset,
        Some(WrapperConfig::FixedLengthTrajectoryDataset { sample_seq_len }) => {
            Box::new(FixedLengthTrajectoryDataset::new(dataset, *sample_seq_len)?)
        }
        Some(WrapperConfig::ContextDataset {
            context_len,
            skip_step,
        }) => Box::new(ContextDataset::new(dataset, *context_len, *skip_step)?),
    };
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regression_config(wrapper: Option<WrapperConfig>) -> DatasetConfig {
        DatasetConfig {
            dataset: DatasetKind::MultitaskToyRegression(RegressionKwargs {
                num_sequences: 4,
                sequence_length: 10,
                basis: "polynomial".to_string(),
                degree: 2,
                noise: 0.0,
                params_bound: [-0.5, 0.5],
            }),
            dataset_wrapper: wrapper,
        }
    }

    #[test]
    fn test_config_json() {
        let json = r#"{
            "dataset": {
                "dataset_name": "multitask_toy_regression",
                "dataset_kwargs": {
                    "num_sequences": 8,
                    "sequence_length": 12,
                    "basis": "polynomial",
                    "degree": 3,
                    "noise": 0.1,
                    "params_bound": [-1.0, 1.0]
                }
            },
            "dataset_wrapper": {
                "type": "ContextDataset",
                "kwargs": { "context_len": 4 }
            }
        }"#;
        let config: DatasetConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.dataset.name(), "multitask_toy_regression");
        assert!(matches!(
            config.dataset_wrapper,
            Some(WrapperConfig::ContextDataset {
                context_len: 4,
                skip_step: 1
            })
        ));
    }

    #[test]
    fn test_get_dataset_without_wrapper() {
        let dataset = get_dataset(&regression_config(None), 0).unwrap();
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.input_dim(), vec![1]);
        assert_eq!(dataset.output_dim(), vec![1]);
        let (inputs, targets) = dataset.get(0).unwrap().into_sequence().unwrap();
        assert_eq!(inputs.shape(), &[10, 1]);
        assert_eq!(targets.dim(), (10, 1));
    }

    #[test]
    fn test_get_dataset_applies_wrapper() {
        let config = regression_config(Some(WrapperConfig::FixedLengthTrajectoryDataset {
            sample_seq_len: 4,
        }));
        let dataset = get_dataset(&config, 0).unwrap();
        assert_eq!(dataset.len(), 4 * 7);
        assert_eq!(dataset.sequence_length(), Some(4));
    }

    #[test]
    fn test_same_seed_same_data() {
        let a = get_dataset(&regression_config(None), 3).unwrap();
        let b = get_dataset(&regression_config(None), 3).unwrap();
        let c = get_dataset(&regression_config(None), 4).unwrap();
        assert_eq!(a.get(1).unwrap(), b.get(1).unwrap());
        assert_ne!(a.get(1).unwrap(), c.get(1).unwrap());
    }

    #[test]
    fn test_missing_mnist_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatasetConfig {
            dataset: DatasetKind::Mnist(MnistKwargs {
                data_dir: dir.path().to_path_buf(),
                train: true,
            }),
            dataset_wrapper: None,
        };
        assert!(get_dataset(&config, 0).is_err());
    }
}
