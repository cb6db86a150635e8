//! The narrow view of a classifier that Grad-CAM needs.
//!
//! A classifier is split at one of its named layers: [`LayerClassifier::forward_to`]
//! runs the network up to (and including) the layer, [`LayerClassifier::forward_from`]
//! runs the rest of it starting from that layer's activation.
//! Re-entering the network from a detached activation is what lets an
//! [`AutodiffBackend`](burn::tensor::backend::AutodiffBackend) keep the
//! gradient of the activation itself.

use crate::error::{CamError, Result};
use burn::prelude::*;

/// Output of a named layer.
#[derive(Debug, Clone)]
pub enum Activation<B: Backend> {
    /// Feature maps.
    ///
    /// # Shape
    /// [batch, channels, height, width]
    Spatial(Tensor<B, 4>),
    /// Feature vectors (after pooling or flattening).
    ///
    /// # Shape
    /// [batch, features]
    Flat(Tensor<B, 2>),
}

impl<B: Backend> Activation<B> {
    pub fn dims(&self) -> Vec<usize> {
        match self {
            Activation::Spatial(t) => t.dims().to_vec(),
            Activation::Flat(t) => t.dims().to_vec(),
        }
    }

    /// Returns the feature maps, or a [`CamError::ShapeMismatch`] naming `layer`.
    pub fn into_spatial(self, layer: &str) -> Result<Tensor<B, 4>> {
        match self {
            Activation::Spatial(t) => Ok(t),
            Activation::Flat(t) => Err(CamError::ShapeMismatch(format!(
                "layer {layer:?} outputs a rank-2 tensor {:?}, expected [batch, channels, height, width]",
                t.dims()
            ))),
        }
    }

    /// Returns the feature vectors, or a [`CamError::ShapeMismatch`] naming `layer`.
    pub fn into_flat(self, layer: &str) -> Result<Tensor<B, 2>> {
        match self {
            Activation::Flat(t) => Ok(t),
            Activation::Spatial(t) => Err(CamError::ShapeMismatch(format!(
                "layer {layer:?} expects a rank-2 activation, got {:?}",
                t.dims()
            ))),
        }
    }
}

/// An image classifier whose intermediate layers are addressable by name.
///
/// For every layer `l` and input `x`,
/// `forward_from(forward_to(x, l)?, l)?` must equal `forward(x)`.
/// All three evaluations are inference passes (no dropout).
pub trait LayerClassifier<B: Backend> {
    /// Names of the addressable layers, in evaluation order.
    fn layer_names(&self) -> Vec<String>;

    /// Full evaluation.
    ///
    /// # Shapes
    ///   - Input [batch, channels, height, width]
    ///   - Output [batch, num_classes]
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Evaluates the network up to `layer` and returns that layer's output.
    fn forward_to(&self, input: Tensor<B, 4>, layer: &str) -> Result<Activation<B>>;

    /// Evaluates the network after `layer`, starting from its output.
    ///
    /// # Shapes
    ///   - Output [batch, num_classes]
    fn forward_from(&self, activation: Activation<B>, layer: &str) -> Result<Tensor<B, 2>>;
}

/// Position of `layer` in `names`, or a [`CamError::LayerNotFound`].
pub fn layer_index(names: &[String], layer: &str) -> Result<usize> {
    names
        .iter()
        .position(|name| name == layer)
        .ok_or_else(|| CamError::LayerNotFound {
            layer: layer.to_string(),
            available: names.to_vec(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn layer_index_finds_layers_in_order() {
        let names: Vec<String> = ["conv_0", "pool_0", "gap"].map(String::from).to_vec();
        assert_eq!(layer_index(&names, "conv_0").unwrap(), 0);
        assert_eq!(layer_index(&names, "gap").unwrap(), 2);
    }

    #[test]
    fn layer_index_reports_available_layers() {
        let names: Vec<String> = ["conv_0", "gap"].map(String::from).to_vec();
        match layer_index(&names, "conv5_block3_out") {
            Err(CamError::LayerNotFound { layer, available }) => {
                assert_eq!(layer, "conv5_block3_out");
                assert_eq!(available, names);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn flat_activation_is_not_spatial() {
        let device = Default::default();
        let flat = Activation::Flat(Tensor::<TestBackend, 2>::zeros([1, 8], &device));
        assert_eq!(flat.dims(), vec![1, 8]);
        assert!(matches!(
            flat.into_spatial("gap"),
            Err(CamError::ShapeMismatch(_))
        ));
    }
}
