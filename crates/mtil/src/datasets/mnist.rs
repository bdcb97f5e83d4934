//! MNIST-derived multitask classification datasets.
//!
//! Images are read from the IDX files of the standard MNIST distribution.
//! Each task draws its sample indexes with one key and its label maps with
//! another, both split from the dataset seed.

use super::{check_index, Dataset, ImageTransform, Sample};
use crate::utils::PrngKey;
use crate::{MtilError, Result};
use ndarray::{Array1, Array2, Array3, ArrayD, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use std::io::Read;
use std::path::Path;

/// Number of MNIST classes
pub const NUM_CLASSES: usize = 10;

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

/// Grayscale images `[N, H, W]` with integer class labels.
#[derive(Clone, Debug)]
pub struct LabeledImages {
    images: Array3<u8>,
    targets: Vec<usize>,
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn open_idx(path: &Path, magic: u32) -> Result<std::io::BufReader<std::fs::File>> {
    let file = std::fs::File::open(path).map_err(|e| {
        MtilError::Dataset(format!("cannot open {}: {e}", path.display()))
    })?;
    let mut reader = std::io::BufReader::new(file);
    let found = read_u32(&mut reader)?;
    if found != magic {
        return Err(MtilError::Dataset(format!(
            "{}: expected IDX magic {magic:#010x}, found {found:#010x}",
            path.display()
        )));
    }
    Ok(reader)
}

impl LabeledImages {
    pub fn new(images: Array3<u8>, targets: Vec<usize>) -> Result<Self> {
        if images.len_of(Axis(0)) != targets.len() {
            return Err(MtilError::ShapeMismatch {
                expected: vec![images.len_of(Axis(0))],
                actual: vec![targets.len()],
            });
        }
        if let Some(label) = targets.iter().find(|&&t| t >= NUM_CLASSES) {
            return Err(MtilError::Dataset(format!(
                "label {label} out of range for {NUM_CLASSES} classes"
            )));
        }
        Ok(Self { images, targets })
    }

    /// Read an IDX image file and its IDX label file.
    pub fn from_idx(images_path: impl AsRef<Path>, labels_path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = open_idx(images_path.as_ref(), IMAGES_MAGIC)?;
        let n = read_u32(&mut reader)? as usize;
        let height = read_u32(&mut reader)? as usize;
        let width = read_u32(&mut reader)? as usize;
        let mut pixels = vec![0u8; n * height * width];
        reader.read_exact(&mut pixels)?;
        let images = Array3::from_shape_vec((n, height, width), pixels).map_err(|e| {
            MtilError::Dataset(format!("malformed image file: {e}"))
        })?;

        let mut reader = open_idx(labels_path.as_ref(), LABELS_MAGIC)?;
        let num_labels = read_u32(&mut reader)? as usize;
        let mut labels = vec![0u8; num_labels];
        reader.read_exact(&mut labels)?;

        tracing::debug!(n, height, width, "Read IDX images");
        Self::new(images, labels.into_iter().map(usize::from).collect())
    }

    /// Read the train or test split from an MNIST directory.
    pub fn from_mnist_dir(dir: impl AsRef<Path>, train: bool) -> Result<Self> {
        let dir = dir.as_ref();
        let prefix = if train { "train" } else { "t10k" };
        Self::from_idx(
            dir.join(format!("{prefix}-images-idx3-ubyte")),
            dir.join(format!("{prefix}-labels-idx1-ubyte")),
        )
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn image_shape(&self) -> (usize, usize) {
        (self.images.len_of(Axis(1)), self.images.len_of(Axis(2)))
    }

    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    /// Transformed images at `idxes`, stacked along the first axis.
    fn inputs(&self, idxes: &[usize], transform: ImageTransform) -> ArrayD<f32> {
        transform.apply(self.images.select(Axis(0), idxes).view().into_dyn())
    }

    fn input_dim(&self, transform: ImageTransform) -> Vec<usize> {
        let (height, width) = self.image_shape();
        transform.output_shape(height, width)
    }
}

fn one_hot(labels: impl IntoIterator<Item = usize>) -> Array2<f32> {
    let labels: Vec<usize> = labels.into_iter().collect();
    let mut out = Array2::zeros((labels.len(), NUM_CLASSES));
    for (row, label) in labels.into_iter().enumerate() {
        out[[row, label]] = 1.0;
    }
    out
}

fn sample_indexes<R: Rng>(rng: &mut R, rows: usize, cols: usize, n: usize) -> Array2<usize> {
    Array2::from_shape_simple_fn((rows, cols), || rng.gen_range(0..n))
}

/// One label map per sequence: identity, or a random permutation of the
/// classes when `random_label`.
fn label_maps<R: Rng>(rng: &mut R, num_sequences: usize, random_label: bool) -> Array2<usize> {
    let mut maps = Array2::from_shape_fn((num_sequences, NUM_CLASSES), |(_, c)| c);
    if random_label {
        for mut row in maps.rows_mut() {
            if let Some(row) = row.as_slice_mut() {
                row.shuffle(rng);
            }
        }
    }
    maps
}

fn require_images(images: &LabeledImages) -> Result<()> {
    if images.is_empty() {
        return Err(MtilError::Dataset("no images to sample from".to_string()));
    }
    Ok(())
}

/// Plain MNIST: one image and its one-hot label per item.
pub struct Mnist {
    images: LabeledImages,
    transform: ImageTransform,
}

impl Mnist {
    pub fn new(images: LabeledImages, transform: ImageTransform) -> Self {
        Self { images, transform }
    }
}

impl Dataset for Mnist {
    fn len(&self) -> usize {
        self.images.len()
    }

    fn get(&self, idx: usize) -> Result<Sample> {
        check_index(idx, self.len())?;
        let input = self
            .images
            .inputs(&[idx], self.transform)
            .index_axis_move(Axis(0), 0);
        Ok(Sample::Pair {
            input,
            target: one_hot([self.images.targets[idx]]).row(0).to_owned(),
        })
    }

    fn input_dim(&self) -> Vec<usize> {
        self.images.input_dim(self.transform)
    }

    fn output_dim(&self) -> Vec<usize> {
        vec![NUM_CLASSES]
    }
}

/// Sequences of MNIST images, each sequence with its own label map.
pub struct MultitaskMnistFineGrain {
    images: LabeledImages,
    /// `[num_sequences, sequence_length]`, drawn with replacement
    sample_idxes: Array2<usize>,
    /// `[num_sequences, NUM_CLASSES]`
    label_map: Array2<usize>,
}

impl MultitaskMnistFineGrain {
    pub fn new(
        images: LabeledImages,
        num_sequences: usize,
        sequence_length: usize,
        seed: u64,
        random_label: bool,
    ) -> Result<Self> {
        require_images(&images)?;
        let (sample_key, label_key) = PrngKey::new(seed).split2();
        let sample_idxes = sample_indexes(
            &mut sample_key.rng(),
            num_sequences,
            sequence_length,
            images.len(),
        );
        let label_map = label_maps(&mut label_key.rng(), num_sequences, random_label);
        Ok(Self {
            images,
            sample_idxes,
            label_map,
        })
    }

    pub fn label_map(&self) -> &Array2<usize> {
        &self.label_map
    }
}

impl Dataset for MultitaskMnistFineGrain {
    fn len(&self) -> usize {
        self.sample_idxes.nrows()
    }

    fn get(&self, idx: usize) -> Result<Sample> {
        check_index(idx, self.len())?;
        let sample_idxes = self.sample_idxes.row(idx).to_vec();
        let labels = sample_idxes
            .iter()
            .map(|&i| self.label_map[[idx, self.images.targets[i]]]);
        Ok(Sample::Sequence {
            inputs: self.images.inputs(&sample_idxes, ImageTransform::Standard),
            targets: one_hot(labels),
        })
    }

    fn input_dim(&self) -> Vec<usize> {
        self.images.input_dim(ImageTransform::Standard)
    }

    fn output_dim(&self) -> Vec<usize> {
        vec![NUM_CLASSES]
    }

    fn sequence_length(&self) -> Option<usize> {
        Some(self.sample_idxes.ncols())
    }
}

/// One context example per class followed by queries.
///
/// Context examples are drawn from per-class tables trimmed to the size of
/// the smallest class, then shuffled by a per-sequence swap permutation.
pub struct StratifiedMultitaskMnistFineGrain {
    images: LabeledImages,
    /// `[NUM_CLASSES, min_num_per_class]` image indexes by class
    label_to_idx: Array2<usize>,
    /// `[num_sequences, NUM_CLASSES]` positions into `label_to_idx`
    context_idxes: Array2<usize>,
    /// `[num_sequences, num_queries]`
    query_idxes: Array2<usize>,
    /// `[num_sequences, NUM_CLASSES]`
    swap_idxes: Array2<usize>,
    label_map: Array2<usize>,
}

impl StratifiedMultitaskMnistFineGrain {
    pub fn new(
        images: LabeledImages,
        num_sequences: usize,
        num_queries: usize,
        seed: u64,
        random_label: bool,
    ) -> Result<Self> {
        require_images(&images)?;
        let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); NUM_CLASSES];
        for (i, &label) in images.targets.iter().enumerate() {
            by_class[label].push(i);
        }
        let min_num_per_class = by_class.iter().map(Vec::len).min().unwrap_or(0);
        if min_num_per_class == 0 {
            return Err(MtilError::Dataset(
                "every class needs at least one example".to_string(),
            ));
        }
        let label_to_idx = Array2::from_shape_fn((NUM_CLASSES, min_num_per_class), |(c, i)| {
            by_class[c][i]
        });

        let (sample_key, label_key) = PrngKey::new(seed).split2();
        let mut sample_rng = sample_key.rng();
        let query_idxes = sample_indexes(&mut sample_rng, num_sequences, num_queries, images.len());
        let context_idxes =
            sample_indexes(&mut sample_rng, num_sequences, NUM_CLASSES, min_num_per_class);
        let swap_idxes = label_maps(&mut sample_rng, num_sequences, true);
        let label_map = label_maps(&mut label_key.rng(), num_sequences, random_label);

        Ok(Self {
            images,
            label_to_idx,
            context_idxes,
            query_idxes,
            swap_idxes,
            label_map,
        })
    }

    pub fn num_queries(&self) -> usize {
        self.query_idxes.ncols()
    }

    pub fn min_num_per_class(&self) -> usize {
        self.label_to_idx.ncols()
    }
}

impl Dataset for StratifiedMultitaskMnistFineGrain {
    fn len(&self) -> usize {
        self.query_idxes.nrows()
    }

    fn get(&self, idx: usize) -> Result<Sample> {
        check_index(idx, self.len())?;
        let context: Vec<usize> = self
            .swap_idxes
            .row(idx)
            .iter()
            .map(|&c| self.label_to_idx[[c, self.context_idxes[[idx, c]]]])
            .collect();
        let context_labels = context
            .iter()
            .map(|&i| self.label_map[[idx, self.images.targets[i]]]);

        let queries = self.query_idxes.row(idx).to_vec();
        let query_labels = queries
            .iter()
            .map(|&i| self.label_map[[idx, self.images.targets[i]]]);

        Ok(Sample::Context {
            context_inputs: self.images.inputs(&context, ImageTransform::Standard),
            context_targets: one_hot(context_labels),
            queries: self.images.inputs(&queries, ImageTransform::Standard),
            targets: one_hot(query_labels),
        })
    }

    fn input_dim(&self) -> Vec<usize> {
        self.images.input_dim(ImageTransform::Standard)
    }

    fn output_dim(&self) -> Vec<usize> {
        vec![NUM_CLASSES]
    }
}

/// Sequences of MNIST images under one shared random binary relabelling:
/// half of the classes map to 1, the rest to 0.
pub struct MultitaskMnistRandomBinary {
    images: LabeledImages,
    sample_idxes: Array2<usize>,
    /// `[NUM_CLASSES]` of 0/1
    label_map: Array1<usize>,
}

impl MultitaskMnistRandomBinary {
    pub fn new(
        images: LabeledImages,
        num_sequences: usize,
        sequence_length: usize,
        seed: u64,
    ) -> Result<Self> {
        require_images(&images)?;
        let (sample_key, label_key) = PrngKey::new(seed).split2();
        let sample_idxes = sample_indexes(
            &mut sample_key.rng(),
            num_sequences,
            sequence_length,
            images.len(),
        );
        let mut label_map = Array1::zeros(NUM_CLASSES);
        let ones = rand::seq::index::sample(&mut label_key.rng(), NUM_CLASSES, NUM_CLASSES / 2);
        for class in ones.iter() {
            label_map[class] = 1;
        }
        Ok(Self {
            images,
            sample_idxes,
            label_map,
        })
    }

    pub fn label_map(&self) -> &Array1<usize> {
        &self.label_map
    }
}

impl Dataset for MultitaskMnistRandomBinary {
    fn len(&self) -> usize {
        self.sample_idxes.nrows()
    }

    fn get(&self, idx: usize) -> Result<Sample> {
        check_index(idx, self.len())?;
        let sample_idxes = self.sample_idxes.row(idx).to_vec();
        let labels = sample_idxes
            .iter()
            .map(|&i| self.label_map[self.images.targets[i]]);
        Ok(Sample::Sequence {
            inputs: self.images.inputs(&sample_idxes, ImageTransform::Standard),
            targets: one_hot(labels),
        })
    }

    fn input_dim(&self) -> Vec<usize> {
        self.images.input_dim(ImageTransform::Standard)
    }

    fn output_dim(&self) -> Vec<usize> {
        vec![NUM_CLASSES]
    }

    fn sequence_length(&self) -> Option<usize> {
        Some(self.sample_idxes.ncols())
    }
}
