mod block;
mod network;

pub use block::{ConvBlock, ConvBlockConfig, DenseBlock, DenseBlockConfig, he_uniform};
pub use network::{DigitCnn, DigitCnnConfig};
