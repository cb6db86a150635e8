//! Error types for burn-grad-cam.

use thiserror::Error;

/// Result type alias using [`CamError`].
pub type Result<T> = std::result::Result<T, CamError>;

/// Errors raised while explaining or rendering a prediction.
#[derive(Error, Debug)]
pub enum CamError {
    /// The classifier has no layer with the requested name.
    #[error("Layer not found: {layer:?} (available: {available:?})")]
    LayerNotFound {
        /// Requested layer name.
        layer: String,
        /// Layers the classifier exposes, in evaluation order.
        available: Vec<String>,
    },

    /// An input or activation does not have the expected shape.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The clipped heatmap is zero everywhere (or not finite), so it cannot be normalized.
    #[error("Degenerate gradient: no positive contribution to class {class} at layer {layer:?}")]
    DegenerateGradient {
        /// Explained layer.
        layer: String,
        /// Targeted class.
        class: usize,
    },

    /// The requested class is not one of the classifier outputs.
    #[error("Class out of range: {class} (the classifier has {num_classes} classes)")]
    ClassOutOfRange {
        /// Requested class.
        class: usize,
        /// Number of classifier outputs.
        num_classes: usize,
    },

    /// The backward pass produced no gradient for the watched activation.
    #[error("Missing gradient for layer {layer:?}")]
    MissingGradient {
        /// Explained layer.
        layer: String,
    },

    /// No colormap is registered under this name.
    #[error("Unknown colormap: {0:?}")]
    UnknownColormap(String),

    /// Image decoding, encoding or resampling error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
