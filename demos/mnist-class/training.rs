use crate::common::{cli::AppArgs, training::TrainingConfig};
use crate::dataset::{HEIGHT, MnistBatch, MnistBatcher, MnistDataset, WIDTH};
use burn::prelude::*;
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    data::dataset::Dataset,
    module::AutodiffModule,
    optim::{Adam, GradientsParams, Optimizer, adaptor::OptimizerAdaptor},
    tensor::backend::AutodiffBackend,
    train::ClassificationOutput,
    train::metric::{AccuracyMetric, Adaptor, LossMetric, Metric, MetricMetadata, Numeric},
};
use burn_grad_cam::prelude::*;
use burn_grad_cam::utils::contains_nan_or_inf;
use std::sync::Arc;

/// Name of the preview grid in the artifacts directory.
pub const SAMPLES_NAME: &str = "samples.png";

pub fn train<AutoB: AutodiffBackend>(
    training_config: TrainingConfig,
    model_config: DigitCnnConfig,
    training_device: AutoB::Device,
    app_args: &AppArgs,
) -> anyhow::Result<()> {
    AutoB::seed(&training_device, training_config.seed);

    // load (or init and save) model and optim
    let mut model: DigitCnn<AutoB> =
        app_args.load_or_save_model::<AutoB, _>(&model_config, &training_device);
    let mut optim = app_args.load_or_save_optim::<AutoB, DigitCnn<AutoB>, _>(
        &training_config.optimizer,
        &training_device,
    );
    tracing::info!(params = model.num_params(), "model:\n{model}");

    // 10×10 preview of the first training digits
    let dataset_train = MnistDataset::train();
    let samples: Vec<Vec<f32>> = (0..100)
        .filter_map(|i| dataset_train.get(i))
        .map(|item| item.image)
        .collect();
    save_grid(
        &samples,
        WIDTH,
        HEIGHT,
        10,
        Colormap::Greys,
        app_args.artifacts_path.join(SAMPLES_NAME),
    )?;

    let batcher = MnistBatcher::default();
    let dataloader_train = DataLoaderBuilder::new(batcher.clone())
        .batch_size(training_config.batch_size)
        .shuffle(training_config.seed)
        .num_workers(training_config.num_workers)
        .build(dataset_train);
    let dataloader_valid = DataLoaderBuilder::new(batcher)
        .batch_size(training_config.batch_size)
        .num_workers(training_config.num_workers)
        .build(MnistDataset::test());

    let mut metric_meta = MetricMetadata {
        progress: burn::data::dataloader::Progress::new(0, dataloader_train.num_items()),
        epoch: 1,
        epoch_total: training_config.num_epochs,
        iteration: 0,
        lr: Some(training_config.lr),
    };

    tracing::info!("running small initial validation");
    epoch_valid::<AutoB::InnerBackend>(
        Arc::clone(&dataloader_valid),
        model.valid(),
        &training_config,
        metric_meta.epoch,
        Some(10),
    );

    tracing::info!(epochs = training_config.num_epochs, "starting training");
    for epoch in 1..training_config.num_epochs + 1 {
        let _span = tracing::info_span!("epoch", epoch).entered();
        metric_meta.epoch = epoch;
        metric_meta.progress.items_processed = 0;

        model = epoch_train::<AutoB>(
            Arc::clone(&dataloader_train),
            model,
            &training_config,
            &mut optim,
            &mut metric_meta,
        );

        // save assets
        app_args.save_model(&model);
        app_args.save_optim(&optim);

        epoch_valid::<AutoB::InnerBackend>(
            Arc::clone(&dataloader_valid),
            model.valid(),
            &training_config,
            metric_meta.epoch,
            None,
        );
    }
    tracing::info!("training finished");
    Ok(())
}

type Dataloader<B> = Arc<dyn DataLoader<B, MnistBatch<B>> + 'static>;

pub fn epoch_train<AutoB: AutodiffBackend>(
    dataloader_train: Dataloader<AutoB>,
    mut model: DigitCnn<AutoB>,
    training_config: &TrainingConfig,
    optim: &mut OptimizerAdaptor<Adam, DigitCnn<AutoB>, AutoB>,
    metric_meta: &mut MetricMetadata,
) -> DigitCnn<AutoB> {
    let mut loss_metric = LossMetric::<AutoB>::new();
    let mut acc_metric = AccuracyMetric::<AutoB>::new();
    let num_batches = dataloader_train
        .num_items()
        .div_ceil(training_config.batch_size);

    for (b, batch) in dataloader_train.iter().enumerate() {
        let [batch_size, _, _, _] = batch.images.dims();
        metric_meta.iteration += 1;
        metric_meta.progress.items_processed += batch_size;

        let output = forward_classification(batch, |images| model.forward_train(images));
        acc_metric.update(&output.adapt(), metric_meta);
        loss_metric.update(&output.adapt(), metric_meta);

        if contains_nan_or_inf(&output.loss) {
            tracing::warn!(batch = b + 1, "non-finite loss, skipping the update");
            continue;
        }
        let grads = output.loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optim.step(training_config.lr, model, grads);

        tracing::debug!(
            "Epoch {}/{}, Batch {:0>4}/{num_batches}, Loss {:.4}, Acc {:0>6.2}",
            metric_meta.epoch,
            metric_meta.epoch_total,
            b + 1,
            loss_metric.value().current(),
            acc_metric.value().current(),
        );
    }

    tracing::info!(
        "Epoch {}/{}, Avg Loss {:.4}, Avg Acc {:.2}",
        metric_meta.epoch,
        metric_meta.epoch_total,
        loss_metric.running_value().current(),
        acc_metric.running_value().current(),
    );
    model
}

pub fn epoch_valid<B: Backend>(
    dataloader_valid: Dataloader<B>,
    model: DigitCnn<B>,
    training_config: &TrainingConfig,
    epoch: usize,
    valid_loop_limit: Option<usize>,
) {
    let valid_loop_limit = valid_loop_limit.unwrap_or(usize::MAX);
    let mut metric_meta = MetricMetadata {
        progress: burn::data::dataloader::Progress::new(0, dataloader_valid.num_items()),
        epoch,
        epoch_total: training_config.num_epochs,
        iteration: 0,
        lr: Some(training_config.lr),
    };

    let mut loss_metric = LossMetric::<B>::new();
    let mut acc_metric = AccuracyMetric::<B>::new();

    for batch in dataloader_valid.iter().take(valid_loop_limit) {
        let [batch_size, _, _, _] = batch.images.dims();
        metric_meta.iteration += 1;
        metric_meta.progress.items_processed += batch_size;

        let output = forward_classification(batch, |images| model.forward(images));
        acc_metric.update(&output.adapt(), &metric_meta);
        loss_metric.update(&output.adapt(), &metric_meta);
    }

    tracing::info!(
        "Epoch {}/{}, Avg Valid Loss {:.4}, Avg Valid Acc {:.2}",
        metric_meta.epoch,
        metric_meta.epoch_total,
        loss_metric.running_value().current(),
        acc_metric.running_value().current(),
    );
}

/// Cross-entropy of `forward` over the batch.
fn forward_classification<B: Backend>(
    batch: MnistBatch<B>,
    forward: impl FnOnce(Tensor<B, 4>) -> Tensor<B, 2>,
) -> ClassificationOutput<B> {
    let [batch_size, _, _, _] = batch.images.dims();
    let targets = batch.targets;
    debug_assert_eq!([batch_size], targets.dims());

    let logits = forward(batch.images);
    debug_assert_eq!(batch_size, logits.dims()[0]);

    let loss = burn::nn::loss::CrossEntropyLossConfig::new()
        .init(&logits.device())
        .forward(logits.clone(), targets.clone());
    ClassificationOutput::new(loss, logits, targets)
}
