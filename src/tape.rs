//! Scoped gradient recording.
//!
//! A [`GradientTape`] watches a single intermediate activation: the activation
//! is detached from the graph that produced it and re-enters the network as a
//! leaf that requires a gradient. Consuming the tape with
//! [`GradientTape::gradient`] runs the backward pass. The watched tensor, and
//! with it the recorded graph, is released when the tape is dropped, on every
//! exit path.

use crate::error::{CamError, Result};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use tracing::span::EnteredSpan;

pub struct GradientTape<B: AutodiffBackend> {
    layer: String,
    /// # Shape
    /// [batch, channels, height, width]
    watched: Option<Tensor<B, 4>>,
    _span: EnteredSpan,
}

impl<B: AutodiffBackend> GradientTape<B> {
    /// Opens a tape for the activation of `layer`.
    pub fn record(layer: &str) -> Self {
        let span = tracing::debug_span!("gradient_tape", layer).entered();
        tracing::trace!("gradient tape opened");
        Self {
            layer: layer.to_string(),
            watched: None,
            _span: span,
        }
    }

    /// Starts watching `activation`, returning the tracked leaf to continue the
    /// forward pass with. A previously watched tensor is released.
    pub fn watch(&mut self, activation: Tensor<B, 4>) -> Tensor<B, 4> {
        let leaf = activation.detach().require_grad();
        self.watched = Some(leaf.clone());
        leaf
    }

    /// Back-propagates `target` and returns the watched activation together
    /// with its gradient, both on the inner backend.
    ///
    /// # Shapes
    ///   - target [1]
    ///   - Output ([batch, channels, height, width], [batch, channels, height, width])
    pub fn gradient(
        mut self,
        target: Tensor<B, 1>,
    ) -> Result<(Tensor<B::InnerBackend, 4>, Tensor<B::InnerBackend, 4>)> {
        let watched = self.watched.take().ok_or_else(|| CamError::MissingGradient {
            layer: self.layer.clone(),
        })?;
        let grads = target.backward();
        let gradient = watched
            .grad(&grads)
            .ok_or_else(|| CamError::MissingGradient {
                layer: self.layer.clone(),
            })?;
        debug_assert_eq!(watched.dims(), gradient.dims());
        Ok((watched.inner(), gradient))
    }
}

impl<B: AutodiffBackend> Drop for GradientTape<B> {
    fn drop(&mut self) {
        if self.watched.take().is_some() {
            tracing::trace!("gradient tape released before backward pass");
        } else {
            tracing::trace!("gradient tape released");
        }
    }
}
