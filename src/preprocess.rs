//! Turns pictures into single-image input tensors.

use crate::error::Result;
use burn::prelude::*;
use image::RgbImage;
use image::imageops::{self, FilterType};
use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// ImageNet channel means in BGR order, on the [0, 255] scale.
pub const IMAGENET_BGR_MEAN: [f32; 3] = [103.939, 116.779, 123.68];

/// Value scaling a classifier was trained with.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Preprocessing {
    /// RGB → BGR, minus the ImageNet means, no scaling (ResNet weights converted from Caffe).
    Caffe,
    /// `x / 255`.
    #[default]
    UnitScale,
    /// `(x / 255 - mean) / std`, the same for every channel.
    ZScore { mean: f32, std: f32 },
    /// Luma, `x / 255`, as a single channel.
    Grayscale,
}

impl Preprocessing {
    pub fn channels(&self) -> usize {
        match self {
            Preprocessing::Grayscale => 1,
            _ => 3,
        }
    }
}

/// Decodes a picture, optionally resizing it to `(width, height)` with nearest-neighbour sampling.
pub fn load_rgb(path: impl AsRef<Path>, size: Option<(u32, u32)>) -> Result<RgbImage> {
    let path = path.as_ref();
    let image = image::open(path)?.to_rgb8();
    tracing::debug!(?path, dimensions = ?image.dimensions(), "loaded picture");
    Ok(match size {
        Some((width, height)) if (width, height) != image.dimensions() => {
            imageops::resize(&image, width, height, FilterType::Nearest)
        }
        _ => image,
    })
}

/// Channel-major values of `image`.
///
/// # Shapes
///   - Output [channels * height * width]
pub fn to_channel_major(image: &RgbImage, preprocessing: Preprocessing) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let channels = preprocessing.channels();
    let mut values = vec![0f32; channels * plane];

    for (i, pixel) in image.pixels().enumerate() {
        let [r, g, b]: [f32; 3] = pixel.0.map(|c| c.as_());
        match preprocessing {
            Preprocessing::Caffe => {
                for (c, v) in [b, g, r].into_iter().enumerate() {
                    values[c * plane + i] = v - IMAGENET_BGR_MEAN[c];
                }
            }
            Preprocessing::UnitScale => {
                for (c, v) in [r, g, b].into_iter().enumerate() {
                    values[c * plane + i] = v / 255.;
                }
            }
            Preprocessing::ZScore { mean, std } => {
                for (c, v) in [r, g, b].into_iter().enumerate() {
                    values[c * plane + i] = (v / 255. - mean) / std;
                }
            }
            Preprocessing::Grayscale => {
                values[i] = (0.299 * r + 0.587 * g + 0.114 * b) / 255.;
            }
        }
    }
    values
}

/// Single-image batch for a classifier.
///
/// # Shapes
///   - Output [1, channels, height, width]
pub fn to_input_tensor<B: Backend>(
    image: &RgbImage,
    preprocessing: Preprocessing,
    device: &B::Device,
) -> Tensor<B, 4> {
    let (width, height) = image.dimensions();
    let channels = preprocessing.channels();
    let values = to_channel_major(image, preprocessing);
    let data = TensorData::new(values, [1, channels, height as usize, width as usize])
        .convert::<B::FloatElem>();
    Tensor::from_data(data, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::Rgb;

    type TestBackend = NdArray<f32>;

    fn picture() -> RgbImage {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(1, 0, Rgb([0, 0, 255]));
        image
    }

    #[test]
    fn unit_scale_is_channel_major() {
        let values = to_channel_major(&picture(), Preprocessing::UnitScale);
        assert_eq!(values, vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn caffe_swaps_channels_and_centers() {
        let values = to_channel_major(&picture(), Preprocessing::Caffe);
        let [mb, mg, mr] = IMAGENET_BGR_MEAN;
        assert_eq!(values, vec![-mb, 255.0 - mb, -mg, -mg, 255.0 - mr, -mr]);
    }

    #[test]
    fn grayscale_has_one_channel() {
        let image = RgbImage::from_pixel(3, 2, Rgb([255, 255, 255]));
        let tensor =
            to_input_tensor::<TestBackend>(&image, Preprocessing::Grayscale, &Default::default());
        assert_eq!(tensor.dims(), [1, 1, 2, 3]);
        let values = crate::utils::to_f32_vec(tensor);
        assert!(values.iter().all(|v| (v - 1.0).abs() < 1e-4));
    }

    #[test]
    fn input_tensor_shape() {
        let tensor = to_input_tensor::<TestBackend>(
            &picture(),
            Preprocessing::ZScore {
                mean: 0.5,
                std: 0.5,
            },
            &Default::default(),
        );
        assert_eq!(tensor.dims(), [1, 3, 1, 2]);
        let values = crate::utils::to_f32_vec(tensor);
        assert_eq!(values, vec![1.0, -1.0, -1.0, -1.0, -1.0, 1.0]);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_rgb("/nonexistent/castle.jpg", Some((224, 224))).is_err());
    }
}
