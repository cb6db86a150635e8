use burn::prelude::*;
use burn_grad_cam::prelude::*;

/// Model configs that the artifacts directory knows how to persist.
pub trait ModelConfigExt<B: Backend>: Config {
    type Model: Module<B> + LayerClassifier<B>;
    fn init(&self, device: &B::Device) -> Self::Model;
    /// Layer explained when none is requested.
    fn default_layer(&self) -> String;
}

impl<B: Backend> ModelConfigExt<B> for DigitCnnConfig {
    type Model = DigitCnn<B>;

    fn init(&self, device: &B::Device) -> Self::Model {
        DigitCnnConfig::init(self, device)
    }

    fn default_layer(&self) -> String {
        self.last_conv_layer()
    }
}
