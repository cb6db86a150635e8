use crate::common::cli::AppArgs;
use crate::dataset::{MnistBatcher, MnistDataset};
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use burn_grad_cam::prelude::*;

/// Directory, inside the artifacts directory, that receives the overlays.
pub const OVERLAYS_NAME: &str = "grad-cam";

/// Explains the predictions on the first `count` test digits.
///
/// Writes `<index>_label<label>_pred<class>.png` overlays, and the bare heatmaps next to them.
pub fn explain<AutoB: AutodiffBackend>(
    model_config: &DigitCnnConfig,
    count: usize,
    device: &AutoB::Device,
    app_args: &AppArgs,
) -> anyhow::Result<()> {
    let model: DigitCnn<AutoB> = app_args
        .load_model::<AutoB, _>(model_config, device)
        .ok_or_else(|| anyhow::anyhow!("no trained model in {:?}", app_args.artifacts_path))?;
    let layer = model.last_conv_layer();
    let out_dir = app_args.artifacts_path.join(OVERLAYS_NAME);
    std::fs::create_dir_all(&out_dir)?;

    // digits are tiny, so the heatmap is stretched without smoothing
    let overlay_config = OverlayConfig::new()
        .with_alpha(0.6)
        .with_filter(Resampling::Nearest);
    let grad_cam = GradCamConfig::new(layer.clone());

    let dataset = MnistDataset::test();
    let batcher = MnistBatcher::default();
    let mut correct = 0;
    for index in 0..count.min(dataset.len()) {
        let Some(item) = dataset.get(index) else {
            break;
        };
        let picture = item.to_rgb();
        let label = item.label as usize;
        let batch = Batcher::<AutoB, _, _>::batch(&batcher, vec![item], device);

        let heatmap = match grad_cam.compute(&model, batch.images) {
            Ok(heatmap) => heatmap,
            Err(CamError::DegenerateGradient { class, .. }) => {
                tracing::warn!(index, label, class, "nothing to show");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if heatmap.class == label {
            correct += 1;
        }
        tracing::info!(
            index,
            label,
            predicted = heatmap.class,
            score = heatmap.score,
            hottest = ?heatmap.argmax(),
            "explained"
        );

        let stem = format!("{index:04}_label{label}_pred{}", heatmap.class);
        save_overlay(
            &picture,
            &heatmap,
            &overlay_config,
            out_dir.join(format!("{stem}.png")),
        )?;
        save_heatmap(
            &heatmap,
            overlay_config.colormap,
            8,
            out_dir.join(format!("{stem}_heatmap.png")),
        )?;
    }
    tracing::info!(layer = %layer, correct, count, dir = ?out_dir, "done");
    Ok(())
}
