pub mod classifier;
pub mod digit_cnn;
pub mod error;
pub mod grad_cam;
pub mod overlay;
pub mod preprocess;
pub mod tape;

pub mod prelude {
    pub use crate::classifier::{Activation, LayerClassifier};
    pub use crate::digit_cnn::*;
    pub use crate::error::CamError;
    pub use crate::grad_cam::*;
    pub use crate::overlay::*;
    pub use crate::preprocess::*;
    pub use crate::tape::GradientTape;
}

pub mod utils;
