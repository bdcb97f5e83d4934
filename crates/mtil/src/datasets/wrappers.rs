//! Views over sequence datasets.

use super::{check_index, Dataset, Sample};
use crate::{MtilError, Result};
use ndarray::{s, Array2, ArrayD, Axis, IxDyn, Slice};

fn sequence_length(dataset: &dyn Dataset) -> Result<usize> {
    dataset.sequence_length().ok_or_else(|| {
        MtilError::Dataset("wrapper requires a sequence dataset".to_string())
    })
}

/// Every contiguous window of `sample_seq_len` steps from every sequence.
pub struct FixedLengthTrajectoryDataset {
    dataset: Box<dyn Dataset>,
    sample_seq_len: usize,
    windows_per_sequence: usize,
}

impl FixedLengthTrajectoryDataset {
    pub fn new(dataset: Box<dyn Dataset>, sample_seq_len: usize) -> Result<Self> {
        let seq_len = sequence_length(dataset.as_ref())?;
        if sample_seq_len == 0 || sample_seq_len > seq_len {
            return Err(MtilError::Config(format!(
                "sample_seq_len must lie in [1, {seq_len}], got {sample_seq_len}"
            )));
        }
        Ok(Self {
            dataset,
            sample_seq_len,
            windows_per_sequence: seq_len - sample_seq_len + 1,
        })
    }
}

impl Dataset for FixedLengthTrajectoryDataset {
    fn len(&self) -> usize {
        self.dataset.len() * self.windows_per_sequence
    }

    fn get(&self, idx: usize) -> Result<Sample> {
        check_index(idx, self.len())?;
        let seq_i = idx / self.windows_per_sequence;
        let start = idx % self.windows_per_sequence;
        let end = start + self.sample_seq_len;
        let (inputs, targets) = self.dataset.get(seq_i)?.into_sequence()?;
        Ok(Sample::Sequence {
            inputs: inputs
                .slice_axis(Axis(0), Slice::from(start..end))
                .to_owned(),
            targets: targets.slice(s![start..end, ..]).to_owned(),
        })
    }

    fn input_dim(&self) -> Vec<usize> {
        self.dataset.input_dim()
    }

    fn output_dim(&self) -> Vec<usize> {
        self.dataset.output_dim()
    }

    fn sequence_length(&self) -> Option<usize> {
        Some(self.sample_seq_len)
    }
}

/// Turns each sequence into in-context prediction problems.
///
/// Queries are taken every `skip_step` steps. The context of a query at
/// step `t` holds the `context_len` examples preceding it, left-padded
/// with zeros near the start of the sequence.
pub struct ContextDataset {
    dataset: Box<dyn Dataset>,
    context_len: usize,
    skip_step: usize,
    queries_per_sequence: usize,
}

impl ContextDataset {
    pub fn new(dataset: Box<dyn Dataset>, context_len: usize, skip_step: usize) -> Result<Self> {
        let seq_len = sequence_length(dataset.as_ref())?;
        if context_len == 0 || skip_step == 0 {
            return Err(MtilError::Config(
                "context_len and skip_step must be positive".to_string(),
            ));
        }
        Ok(Self {
            dataset,
            context_len,
            skip_step,
            queries_per_sequence: seq_len.div_ceil(skip_step),
        })
    }

    pub fn context_len(&self) -> usize {
        self.context_len
    }
}

impl Dataset for ContextDataset {
    fn len(&self) -> usize {
        self.dataset.len() * self.queries_per_sequence
    }

    fn get(&self, idx: usize) -> Result<Sample> {
        check_index(idx, self.len())?;
        let seq_i = idx / self.queries_per_sequence;
        let t = (idx % self.queries_per_sequence) * self.skip_step;
        let (inputs, targets) = self.dataset.get(seq_i)?.into_sequence()?;

        let num_context = t.min(self.context_len);
        let pad = self.context_len - num_context;

        let mut context_shape = inputs.shape().to_vec();
        context_shape[0] = self.context_len;
        let mut context_inputs = ArrayD::zeros(IxDyn(&context_shape));
        context_inputs
            .slice_axis_mut(Axis(0), Slice::from(pad..))
            .assign(&inputs.slice_axis(Axis(0), Slice::from(t - num_context..t)));

        let mut context_targets = Array2::zeros((self.context_len, targets.ncols()));
        context_targets
            .slice_mut(s![pad.., ..])
            .assign(&targets.slice(s![t - num_context..t, ..]));

        Ok(Sample::Context {
            context_inputs,
            context_targets,
            queries: inputs.slice_axis(Axis(0), Slice::from(t..t + 1)).to_owned(),
            targets: targets.slice(s![t..t + 1, ..]).to_owned(),
        })
    }

    fn input_dim(&self) -> Vec<usize> {
        self.dataset.input_dim()
    }

    fn output_dim(&self) -> Vec<usize> {
        self.dataset.output_dim()
    }
}
