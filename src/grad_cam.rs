//! Gradient-weighted Class Activation Mapping.
//!
//! Given a classifier, a single image and the name of a convolutional layer,
//! computes which spatial regions of that layer pushed the classifier towards
//! its top prediction:
//!
//! ```ignore
//! wₖ       = mean_{i,j} ∂yᶜ/∂Aₖ[i,j]
//! raw[i,j] = Σₖ wₖ Aₖ[i,j]
//! heatmap  = max(raw, 0) / max(max(raw, 0))
//! ```
//!
//! References:
//! - Selvaraju et al., "Grad-CAM: Visual Explanations from Deep Networks via Gradient-based Localization", ICCV 2017.
//! - https://keras.io/examples/vision/grad_cam/

use crate::classifier::{Activation, LayerClassifier};
use crate::error::{CamError, Result as CamResult};
use crate::tape::GradientTape;
use crate::utils::{argmax_2d, contains_nan_or_inf, scalar_f32, to_f32_vec};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

/// Which class score is explained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Target {
    /// The class with the highest score in the forward pass of the call itself.
    #[default]
    TopPrediction,
    /// A fixed class index.
    Class(usize),
}

/// Configuration for [`GradCamConfig::compute`].
#[derive(Config, Debug)]
pub struct GradCamConfig {
    /// Name of the explained layer, usually the last convolution before global pooling.
    pub layer: String,
    #[config(default = "Target::TopPrediction")]
    pub target: Target,
}

impl GradCamConfig {
    pub fn compute<B, M>(
        &self,
        classifier: &M,
        input: Tensor<B, 4>,
    ) -> CamResult<Heatmap<B::InnerBackend>>
    where
        B: AutodiffBackend,
        M: LayerClassifier<B>,
    {
        compute_heatmap_for(classifier, input, &self.layer, self.target)
    }
}

/// Normalized class activation map.
#[derive(Debug, Clone)]
pub struct Heatmap<B: Backend> {
    /// Values in [0, 1], with at least one value equal to 1.
    ///
    /// # Shape
    /// [height, width] of the explained layer
    pub values: Tensor<B, 2>,
    /// Explained class.
    pub class: usize,
    /// Raw score of the explained class.
    pub score: f32,
}

impl<B: Backend> Heatmap<B> {
    /// [height, width]
    pub fn dims(&self) -> [usize; 2] {
        self.values.dims()
    }

    /// Row-major values.
    pub fn to_vec(&self) -> Vec<f32> {
        to_f32_vec(self.values.clone())
    }

    /// (row, column) of the hottest cell.
    pub fn argmax(&self) -> (usize, usize) {
        let [_height, width] = self.dims();
        argmax_2d(&self.to_vec(), width)
    }
}

/// Grad-CAM heatmap for the top predicted class.
///
/// See [`compute_heatmap_for`].
pub fn compute_heatmap<B, M>(
    classifier: &M,
    input: Tensor<B, 4>,
    layer: &str,
) -> CamResult<Heatmap<B::InnerBackend>>
where
    B: AutodiffBackend,
    M: LayerClassifier<B>,
{
    compute_heatmap_for(classifier, input, layer, Target::TopPrediction)
}

/// Grad-CAM heatmap for `target`.
///
/// One forward pass up to `layer`, one forward pass from it, and one backward
/// pass of the targeted class score down to the layer's activation.
///
/// # Shapes
///   - input [1, channels, height, width]
///   - Output [layer_height, layer_width]
///
/// # Errors
///   - [`CamError::ShapeMismatch`] if the batch size is not 1 or the layer is not spatial.
///   - [`CamError::LayerNotFound`] if the classifier has no such layer.
///   - [`CamError::ClassOutOfRange`] for an explicit class past the classifier outputs.
///   - [`CamError::DegenerateGradient`] if no cell has a positive contribution.
pub fn compute_heatmap_for<B, M>(
    classifier: &M,
    input: Tensor<B, 4>,
    layer: &str,
    target: Target,
) -> CamResult<Heatmap<B::InnerBackend>>
where
    B: AutodiffBackend,
    M: LayerClassifier<B>,
{
    let _span = tracing::debug_span!("grad_cam", layer).entered();
    let [batch, _channels, _height, _width] = input.dims();
    if batch != 1 {
        return Err(CamError::ShapeMismatch(format!(
            "expected a single-image batch, got input of shape {:?}",
            input.dims()
        )));
    }

    let (activation, gradient, class, score) = {
        let mut tape = GradientTape::record(layer);
        let activation = classifier
            .forward_to(input, layer)?
            .into_spatial(layer)?;
        let [activation_batch, ..] = activation.dims();
        if activation_batch != 1 {
            return Err(CamError::ShapeMismatch(format!(
                "layer {layer:?} outputs {:?} for a single image, expected a batch of 1",
                activation.dims()
            )));
        }
        let activation = tape.watch(activation);
        let scores = classifier.forward_from(Activation::Spatial(activation), layer)?;
        let [_batch, num_classes] = scores.dims();

        let class = match target {
            Target::TopPrediction => scores
                .clone()
                .argmax(1)
                .into_scalar()
                .elem::<i64>() as usize,
            Target::Class(class) if class < num_classes => class,
            Target::Class(class) => {
                return Err(CamError::ClassOutOfRange { class, num_classes });
            }
        };
        let class_score = scores.narrow(1, class, 1).reshape([1]);
        let score = scalar_f32(class_score.clone().inner());
        tracing::debug!(class, score, num_classes, "explaining class");

        let (activation, gradient) = tape.gradient(class_score)?;
        (activation, gradient, class, score)
    };
    let [_batch, channels, height, width] = activation.dims();

    // channel importance: spatial mean of the gradient
    let weights = gradient.mean_dim(3).mean_dim(2);
    debug_assert_eq!([1, channels, 1, 1], weights.dims());

    // channel-weighted sum of the feature maps
    let raw = (activation * weights).sum_dim(1);
    debug_assert_eq!([1, 1, height, width], raw.dims());
    let clipped = raw.reshape([height, width]).clamp_min(0.0);

    let max = scalar_f32(clipped.clone().max());
    // clamp_min keeps NaN cells, which the maximum may not reveal
    if !(max.is_finite() && max > 0.0) || contains_nan_or_inf(&clipped) {
        tracing::warn!(class, max, "degenerate heatmap");
        return Err(CamError::DegenerateGradient {
            layer: layer.to_string(),
            class,
        });
    }
    let values = clipped / max;

    Ok(Heatmap {
        values,
        class,
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::layer_index;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray<f32>>;

    /// `features` is the identity on the input image, followed by global
    /// average pooling (`gap`) and a fixed linear head (`logits`).
    struct PooledHead<B: Backend> {
        /// [channels, num_classes]
        head: Tensor<B, 2>,
        /// Copies of the image that `features` stacks along the batch.
        copies: usize,
    }

    impl<B: Backend> LayerClassifier<B> for PooledHead<B> {
        fn layer_names(&self) -> Vec<String> {
            vec!["features".into(), "gap".into(), "logits".into()]
        }

        fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
            let [batch, channels, _, _] = input.dims();
            input
                .mean_dim(3)
                .mean_dim(2)
                .reshape([batch, channels])
                .matmul(self.head.clone())
        }

        fn forward_to(&self, input: Tensor<B, 4>, layer: &str) -> CamResult<Activation<B>> {
            let [batch, channels, _, _] = input.dims();
            Ok(match layer_index(&self.layer_names(), layer)? {
                0 => Activation::Spatial(Tensor::cat(vec![input; self.copies], 0)),
                1 => Activation::Flat(
                    input.mean_dim(3).mean_dim(2).reshape([batch, channels]),
                ),
                _ => Activation::Flat(self.forward(input)),
            })
        }

        fn forward_from(&self, activation: Activation<B>, layer: &str) -> CamResult<Tensor<B, 2>> {
            Ok(match layer_index(&self.layer_names(), layer)? {
                0 => self.forward(activation.into_spatial(layer)?),
                1 => activation.into_flat(layer)?.matmul(self.head.clone()),
                _ => activation.into_flat(layer)?,
            })
        }
    }

    fn pooled_head(head: [[f32; 2]; 2]) -> PooledHead<TestBackend> {
        PooledHead {
            head: Tensor::from_floats(head, &Default::default()),
            copies: 1,
        }
    }

    fn image() -> Tensor<TestBackend, 4> {
        // channel 0 lights the left column, channel 1 the bottom row
        Tensor::from_floats(
            [[[[4.0, 0.0], [4.0, 0.0]], [[0.0, 0.0], [2.0, 2.0]]]],
            &Default::default(),
        )
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-6, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn heatmap_matches_closed_form() {
        // scores = [2 * 1 + 1 * 0, 2 * -1 + 1 * 3] = [2, 1] -> class 0
        // w = head[:, 0] / 4 = [0.25, 0]
        // raw = 0.25 * channel 0 = [[1, 0], [1, 0]]
        let classifier = pooled_head([[1.0, -1.0], [0.0, 3.0]]);
        let heatmap = compute_heatmap(&classifier, image(), "features").unwrap();
        assert_eq!(heatmap.class, 0);
        assert!((heatmap.score - 2.0).abs() < 1e-6);
        assert_eq!(heatmap.dims(), [2, 2]);
        let values = heatmap.to_vec();
        assert_close(&values, &[1.0, 0.0, 1.0, 0.0]);
        assert!(values.contains(&1.0));
    }

    #[test]
    fn negative_contributions_are_clipped() {
        // class 1: w = [-0.25, 0.75]
        // raw = [[-1, 0], [-1 + 1.5, 1.5]] -> clipped [[0, 0], [0.5, 1.5]]
        let classifier = pooled_head([[1.0, -1.0], [0.0, 3.0]]);
        let heatmap =
            compute_heatmap_for(&classifier, image(), "features", Target::Class(1)).unwrap();
        assert_eq!(heatmap.class, 1);
        assert_close(&heatmap.to_vec(), &[0.0, 0.0, 1.0 / 3.0, 1.0]);
        assert_eq!(heatmap.argmax(), (1, 1));
    }

    #[test]
    fn top_prediction_follows_the_current_scores() {
        let classifier = pooled_head([[1.0, 0.0], [0.0, 1.0]]);
        // channel 0 dominates
        let heatmap = compute_heatmap(&classifier, image(), "features").unwrap();
        assert_eq!(heatmap.class, 0);
        // channel 1 dominates
        let flipped: Tensor<TestBackend, 4> = Tensor::from_floats(
            [[[[0.0, 0.0], [0.0, 1.0]], [[0.0, 0.0], [9.0, 9.0]]]],
            &Default::default(),
        );
        let heatmap = compute_heatmap(&classifier, flipped, "features").unwrap();
        assert_eq!(heatmap.class, 1);
        assert_close(&heatmap.to_vec(), &[0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn zero_gradient_is_degenerate() {
        let classifier = pooled_head([[0.0, 0.0], [0.0, 0.0]]);
        match compute_heatmap(&classifier, image(), "features") {
            Err(CamError::DegenerateGradient { layer, .. }) => assert_eq!(layer, "features"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn flat_layer_is_a_shape_mismatch() {
        let classifier = pooled_head([[1.0, 0.0], [0.0, 1.0]]);
        assert!(matches!(
            compute_heatmap(&classifier, image(), "gap"),
            Err(CamError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn batch_of_two_is_a_shape_mismatch() {
        let classifier = pooled_head([[1.0, 0.0], [0.0, 1.0]]);
        let batch = Tensor::cat(vec![image(), image()], 0);
        assert!(matches!(
            compute_heatmap(&classifier, batch, "features"),
            Err(CamError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn stacked_activation_is_a_shape_mismatch() {
        let mut classifier = pooled_head([[1.0, 0.0], [0.0, 1.0]]);
        classifier.copies = 3;
        match compute_heatmap(&classifier, image(), "features") {
            Err(CamError::ShapeMismatch(message)) => assert!(message.contains("features")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn nan_cell_is_degenerate() {
        // channel 0 is used alone, its top-right cell is NaN
        let classifier = pooled_head([[1.0, 0.0], [0.0, 1.0]]);
        let image: Tensor<TestBackend, 4> = Tensor::from_floats(
            [[[[4.0, f32::NAN], [4.0, 0.0]], [[0.0, 0.0], [2.0, 2.0]]]],
            &Default::default(),
        );
        assert!(matches!(
            compute_heatmap_for(&classifier, image, "features", Target::Class(0)),
            Err(CamError::DegenerateGradient { class: 0, .. })
        ));
    }

    #[test]
    fn unknown_layer_is_reported() {
        let classifier = pooled_head([[1.0, 0.0], [0.0, 1.0]]);
        assert!(matches!(
            compute_heatmap(&classifier, image(), "conv5_block3_out"),
            Err(CamError::LayerNotFound { .. })
        ));
    }

    #[test]
    fn explicit_class_must_exist() {
        let classifier = pooled_head([[1.0, 0.0], [0.0, 1.0]]);
        assert!(matches!(
            compute_heatmap_for(&classifier, image(), "features", Target::Class(2)),
            Err(CamError::ClassOutOfRange {
                class: 2,
                num_classes: 2
            })
        ));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = GradCamConfig::new("conv_4".into()).with_target(Target::Class(3));
        let json = config.to_string();
        let loaded = GradCamConfig::load_binary(json.as_bytes()).unwrap();
        assert_eq!(loaded.layer, "conv_4");
        assert_eq!(loaded.target, Target::Class(3));
    }
}
