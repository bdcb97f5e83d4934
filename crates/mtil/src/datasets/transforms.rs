//! Image transforms from raw `u8` pixels to model inputs.

use ndarray::{ArrayD, ArrayViewD, Axis};

/// Conversion applied to a batch of grayscale images `[N, H, W]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageTransform {
    /// Scale to `[0, 1]`, keeping `[N, H, W]`.
    #[default]
    Default,
    /// Scale to `[0, 1]` with a trailing channel axis, `[N, H, W, 1]`.
    Standard,
}

impl ImageTransform {
    pub fn apply(&self, images: ArrayViewD<u8>) -> ArrayD<f32> {
        let scaled = images.mapv(|p| f32::from(p) / 255.0);
        match self {
            ImageTransform::Default => scaled,
            ImageTransform::Standard => {
                let channel_axis = Axis(scaled.ndim());
                scaled.insert_axis(channel_axis)
            }
        }
    }

    /// Shape of one transformed `[H, W]` image.
    pub fn output_shape(&self, height: usize, width: usize) -> Vec<usize> {
        match self {
            ImageTransform::Default => vec![height, width],
            ImageTransform::Standard => vec![height, width, 1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, IxDyn};

    #[test]
    fn test_scaling_and_shapes() {
        let images = Array3::from_shape_vec((2, 1, 2), vec![0u8, 255, 51, 102]).unwrap();

        let default = ImageTransform::Default.apply(images.view().into_dyn());
        assert_eq!(default.shape(), &[2, 1, 2]);
        assert_eq!(default[IxDyn(&[0, 0, 1])], 1.0);
        assert!((default[IxDyn(&[1, 0, 0])] - 0.2).abs() < 1e-6);

        let standard = ImageTransform::Standard.apply(images.view().into_dyn());
        assert_eq!(standard.shape(), &[2, 1, 2, 1]);
        assert_eq!(ImageTransform::Standard.output_shape(28, 28), vec![28, 28, 1]);
    }
}
