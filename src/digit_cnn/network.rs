//! A small convolutional digit classifier.
//!
//! `conv_0 → pool_0 → conv_1 … conv_N → gap → dense_0 … dense_M → logits`
//!
//! Every stage is addressable by name through [`LayerClassifier`], so the
//! convolutional stages can be explained with Grad-CAM.

use crate::classifier::{Activation, LayerClassifier, layer_index};
use crate::digit_cnn::*;
use crate::error::Result as CamResult;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;

#[derive(Module, Debug)]
pub struct DigitCnn<B: Backend> {
    /// Input channel: input_channels.
    /// Output channel: conv_filters.
    pub stem: ConvBlock<B>,
    pub pool: MaxPool2d,
    /// # Shape
    /// [conv_layers]
    pub convs: Vec<ConvBlock<B>>,
    pub conv_dropout: Dropout,
    pub gap: AdaptiveAvgPool2d,
    /// # Shape
    /// [fc_layers]
    pub dense: Vec<DenseBlock<B>>,
    pub fc_dropout: Dropout,
    /// Input channel: fc_neurons (or conv_filters without dense layers).
    /// Output channel: num_classes.
    pub logits: Linear<B>,
}

#[derive(Config, Debug)]
pub struct DigitCnnConfig {
    /// 1 for grayscale, 3 for RGB.
    #[config(default = 1)]
    pub input_channels: usize,

    #[config(default = 10)]
    pub num_classes: usize,

    /// Number of convolutions after the pooled stem convolution.
    #[config(default = 4)]
    pub conv_layers: usize,

    #[config(default = 64)]
    pub conv_filters: usize,

    #[config(default = 3)]
    pub conv_kernel_size: usize,

    #[config(default = 2)]
    pub conv_maxpool_size: usize,

    #[config(default = 2)]
    pub conv_maxpool_stride: usize,

    #[config(default = 0.1)]
    pub conv_dropout_rate: f64,

    #[config(default = 2)]
    pub fc_layers: usize,

    #[config(default = 16)]
    pub fc_neurons: usize,

    #[config(default = 0.1)]
    pub fc_dropout_rate: f64,
}

impl DigitCnnConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> DigitCnn<B> {
        let stem = ConvBlockConfig::new(self.input_channels, self.conv_filters)
            .with_kernel_size(self.conv_kernel_size)
            .init(device);

        let mut convs = Vec::with_capacity(self.conv_layers);
        for _ in 0..self.conv_layers {
            let block = ConvBlockConfig::new(self.conv_filters, self.conv_filters)
                .with_kernel_size(self.conv_kernel_size)
                .init(device);
            convs.push(block);
        }

        let mut dense = Vec::with_capacity(self.fc_layers);
        let mut d_input = self.conv_filters;
        for _ in 0..self.fc_layers {
            dense.push(DenseBlockConfig::new(d_input, self.fc_neurons).init(device));
            d_input = self.fc_neurons;
        }

        DigitCnn {
            stem,
            pool: MaxPool2dConfig::new([self.conv_maxpool_size, self.conv_maxpool_size])
                .with_strides([self.conv_maxpool_stride, self.conv_maxpool_stride])
                .init(),
            convs,
            conv_dropout: DropoutConfig::new(self.conv_dropout_rate).init(),
            gap: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dense,
            fc_dropout: DropoutConfig::new(self.fc_dropout_rate).init(),
            logits: LinearConfig::new(d_input, self.num_classes)
                .with_initializer(he_uniform())
                .init(device),
        }
    }

    /// Name of the last convolution, the usual Grad-CAM layer.
    pub fn last_conv_layer(&self) -> String {
        format!("conv_{}", self.conv_layers)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Stem,
    Pool,
    Conv(usize),
    Gap,
    Dense(usize),
    Logits,
}

impl Stage {
    fn name(&self) -> String {
        match self {
            Stage::Stem => "conv_0".to_string(),
            Stage::Pool => "pool_0".to_string(),
            Stage::Conv(i) => format!("conv_{}", i + 1),
            Stage::Gap => "gap".to_string(),
            Stage::Dense(i) => format!("dense_{i}"),
            Stage::Logits => "logits".to_string(),
        }
    }
}

impl<B: Backend> DigitCnn<B> {
    fn stages(&self) -> Vec<Stage> {
        let mut stages = vec![Stage::Stem, Stage::Pool];
        stages.extend((0..self.convs.len()).map(Stage::Conv));
        stages.push(Stage::Gap);
        stages.extend((0..self.dense.len()).map(Stage::Dense));
        stages.push(Stage::Logits);
        stages
    }

    /// Name of the last convolution, the usual Grad-CAM layer.
    pub fn last_conv_layer(&self) -> String {
        match self.convs.len() {
            0 => Stage::Stem.name(),
            n => Stage::Conv(n - 1).name(),
        }
    }

    /// Evaluation pass, without dropout.
    ///
    /// # Shapes
    ///   - Input [batch, input_channels, height, width]
    ///   - Output [batch, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward_with(x, false)
    }

    /// Training pass, with dropout after every convolution and dense block.
    ///
    /// # Shapes
    ///   - Input [batch, input_channels, height, width]
    ///   - Output [batch, num_classes]
    pub fn forward_train(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward_with(x, true)
    }

    fn forward_with(&self, x: Tensor<B, 4>, train: bool) -> Tensor<B, 2> {
        let [batch, _input_channels, _height, _width] = x.dims();

        let x = self.stem.forward(x);
        let mut x = self.pool.forward(x);
        for conv in self.convs.iter() {
            x = conv.forward(x);
            if train {
                x = self.conv_dropout.forward(x);
            }
        }

        let mut x = self.global_pool(x);
        for dense in self.dense.iter() {
            x = dense.forward(x);
            if train {
                x = self.fc_dropout.forward(x);
            }
        }

        let x = self.logits.forward(x);
        let [_d_input, num_classes] = self.logits.weight.dims();
        debug_assert_eq!([batch, num_classes], x.dims());
        x
    }

    /// # Shapes
    ///   - Input [batch, channels, height, width]
    ///   - Output [batch, channels]
    fn global_pool(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch, channels, _height, _width] = x.dims();
        self.gap.forward(x).reshape([batch, channels])
    }

    /// Evaluation of a single stage.
    fn apply(&self, stage: Stage, x: Activation<B>) -> CamResult<Activation<B>> {
        let name = stage.name();
        Ok(match stage {
            Stage::Stem => Activation::Spatial(self.stem.forward(x.into_spatial(&name)?)),
            Stage::Pool => Activation::Spatial(self.pool.forward(x.into_spatial(&name)?)),
            Stage::Conv(i) => Activation::Spatial(self.convs[i].forward(x.into_spatial(&name)?)),
            Stage::Gap => Activation::Flat(self.global_pool(x.into_spatial(&name)?)),
            Stage::Dense(i) => Activation::Flat(self.dense[i].forward(x.into_flat(&name)?)),
            Stage::Logits => Activation::Flat(self.logits.forward(x.into_flat(&name)?)),
        })
    }
}

impl<B: Backend> LayerClassifier<B> for DigitCnn<B> {
    fn layer_names(&self) -> Vec<String> {
        self.stages().iter().map(Stage::name).collect()
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        DigitCnn::forward(self, input)
    }

    fn forward_to(&self, input: Tensor<B, 4>, layer: &str) -> CamResult<Activation<B>> {
        let stages = self.stages();
        let end = layer_index(&self.layer_names(), layer)?;

        let mut x = Activation::Spatial(input);
        for stage in &stages[..=end] {
            x = self.apply(*stage, x)?;
        }
        tracing::trace!(layer, dims = ?x.dims(), "split point");
        Ok(x)
    }

    fn forward_from(&self, activation: Activation<B>, layer: &str) -> CamResult<Tensor<B, 2>> {
        let stages = self.stages();
        let start = layer_index(&self.layer_names(), layer)?;

        let mut x = activation;
        for stage in &stages[start + 1..] {
            x = self.apply(*stage, x)?;
        }
        x.into_flat(layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CamError;
    use crate::grad_cam::compute_heatmap;
    use crate::utils::to_f32_vec;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn small_config() -> DigitCnnConfig {
        DigitCnnConfig::new()
            .with_conv_layers(2)
            .with_conv_filters(4)
            .with_fc_layers(1)
            .with_fc_neurons(8)
    }

    fn digits(batch: usize) -> Tensor<TestBackend, 4> {
        Tensor::random(
            [batch, 1, 28, 28],
            Distribution::Uniform(0.0, 1.0),
            &Default::default(),
        )
    }

    #[test]
    fn layer_names_follow_evaluation_order() {
        let model: DigitCnn<TestBackend> = small_config().init(&Default::default());
        assert_eq!(
            model.layer_names(),
            vec!["conv_0", "pool_0", "conv_1", "conv_2", "gap", "dense_0", "logits"]
        );
        assert_eq!(model.last_conv_layer(), "conv_2");
        assert_eq!(small_config().last_conv_layer(), "conv_2");
    }

    #[test]
    fn default_config_matches_the_reference_architecture() {
        let model: DigitCnn<NdArray<f32>> = DigitCnnConfig::new().init(&Default::default());
        assert_eq!(model.convs.len(), 4);
        assert_eq!(model.dense.len(), 2);
        assert_eq!(model.stem.conv.weight.dims(), [64, 1, 3, 3]);
        assert_eq!(model.logits.weight.dims(), [16, 10]);
    }

    #[test]
    fn forward_shapes() {
        let model: DigitCnn<TestBackend> = small_config().init(&Default::default());
        assert_eq!(DigitCnn::forward(&model, digits(3)).dims(), [3, 10]);
        assert_eq!(model.forward_train(digits(3)).dims(), [3, 10]);

        let pooled = model.forward_to(digits(1), "pool_0").unwrap();
        assert_eq!(pooled.dims(), vec![1, 4, 14, 14]);
        let gap = model.forward_to(digits(1), "gap").unwrap();
        assert_eq!(gap.dims(), vec![1, 4]);
    }

    #[test]
    fn summary_counts_parameters() {
        let model: DigitCnn<NdArray<f32>> = small_config().init(&Default::default());
        // conv_0: 1·4·3·3 + 4, conv_1..2: 2·(4·4·3·3 + 4), dense_0: 4·8 + 8, logits: 8·10 + 10
        assert_eq!(model.num_params(), 40 + 296 + 40 + 90);
        assert!(model.to_string().contains("DigitCnn"));
    }

    #[test]
    fn split_evaluation_matches_full_evaluation() {
        let model: DigitCnn<TestBackend> = small_config().init(&Default::default());
        let input = digits(2);
        let expected = to_f32_vec(DigitCnn::forward(&model, input.clone()));

        for layer in model.layer_names() {
            let activation = model.forward_to(input.clone(), &layer).unwrap();
            let scores = to_f32_vec(model.forward_from(activation, &layer).unwrap());
            for (a, e) in scores.iter().zip(&expected) {
                assert!((a - e).abs() < 1e-5, "layer {layer}: {a} != {e}");
            }
        }
    }

    #[test]
    fn grad_cam_on_last_convolution() {
        let model: DigitCnn<TestBackend> = small_config().init(&Default::default());
        let layer = model.last_conv_layer();
        match compute_heatmap(&model, digits(1), &layer) {
            Ok(heatmap) => {
                assert_eq!(heatmap.dims(), [14, 14]);
                let values = heatmap.to_vec();
                assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
                assert!(values.iter().any(|v| *v == 1.0));
                assert!(heatmap.class < 10);
            }
            // an untrained network may have no positive evidence at all
            Err(CamError::DegenerateGradient { .. }) => {}
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn grad_cam_rejects_dense_layers() {
        let model: DigitCnn<TestBackend> = small_config().init(&Default::default());
        assert!(matches!(
            compute_heatmap(&model, digits(1), "dense_0"),
            Err(CamError::ShapeMismatch(_))
        ));
    }
}
