use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::relu;

/// He (Kaiming) uniform initialization: `U(-√(6 / fan_in), √(6 / fan_in))`.
pub fn he_uniform() -> Initializer {
    Initializer::KaimingUniform {
        gain: f64::sqrt(2.),
        fan_out_only: false,
    }
}

/// Same-padded convolution followed by a ReLU.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    /// Input channel: channels_in.
    /// Output channel: channels_out.
    pub conv: Conv2d<B>,
}

#[derive(Config, Debug)]
pub struct ConvBlockConfig {
    pub channels_in: usize,
    pub channels_out: usize,
    /// Must be odd, so that same padding keeps the spatial size.
    #[config(default = 3)]
    pub kernel_size: usize,
}

impl ConvBlockConfig {
    /// Returns the initialized block.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBlock<B> {
        debug_assert_eq!(self.kernel_size % 2, 1);
        ConvBlock {
            conv: Conv2dConfig::new(
                [self.channels_in, self.channels_out],
                [self.kernel_size, self.kernel_size],
            )
            .with_padding(PaddingConfig2d::Same)
            .with_initializer(he_uniform())
            .init(device),
        }
    }
}

impl<B: Backend> ConvBlock<B> {
    /// # Shapes
    ///   - Input [batch, channels_in, height, width]
    ///   - Output [batch, channels_out, height, width]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, _channels_in, height, width] = x.dims();
        let [channels_out, _, _, _] = self.conv.weight.dims();

        let x = relu(self.conv.forward(x));
        debug_assert_eq!([batch, channels_out, height, width], x.dims());
        x
    }
}

/// Fully connected layer followed by a ReLU.
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    pub linear: Linear<B>,
}

#[derive(Config, Debug)]
pub struct DenseBlockConfig {
    pub d_input: usize,
    pub d_output: usize,
}

impl DenseBlockConfig {
    /// Returns the initialized block.
    pub fn init<B: Backend>(&self, device: &B::Device) -> DenseBlock<B> {
        DenseBlock {
            linear: LinearConfig::new(self.d_input, self.d_output)
                .with_initializer(he_uniform())
                .init(device),
        }
    }
}

impl<B: Backend> DenseBlock<B> {
    /// # Shapes
    ///   - Input [batch, d_input]
    ///   - Output [batch, d_output]
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        relu(self.linear.forward(x))
    }
}
