use burn_grad_cam::prelude::DigitCnnConfig;

/// Five 64-filter convolutions (the stem and four after pooling) and two 16-unit
/// dense layers, ~150k parameters.
pub fn model_config() -> DigitCnnConfig {
    DigitCnnConfig::new()
        // grayscale digits
        .with_input_channels(1)
        .with_num_classes(10)
}
