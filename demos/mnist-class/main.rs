use burn::tensor::backend::AutodiffBackend;
pub use common::{
    backend::{MainAutoBackend, MainDevice},
    cli::AppArgs,
    training::TrainingConfig,
};

pub mod inference;
pub mod model;
pub mod training;

#[path = "../common/mod.rs"]
pub mod common;

pub use common::mnist::dataset;

pub fn launch<AutoB>(app_args: &AppArgs) -> anyhow::Result<()>
where
    AutoB: AutodiffBackend + MainDevice,
{
    app_args.create_artifact_dir();

    // setup training and model configs
    let training_config = app_args
        .load_training_config()
        .unwrap_or_else(|| TrainingConfig::new(common::training::optimizer_config()));
    let model_config = app_args
        .load_model_config::<AutoB, _>()
        .unwrap_or_else(model::model_config);
    // save configs
    app_args.save_training_config(&training_config);
    app_args.save_model_config(&model_config);

    if app_args.training {
        let training_device = AutoB::main_device();
        training::train::<AutoB>(
            training_config,
            model_config.clone(),
            training_device,
            app_args,
        )?;
    }

    if app_args.inference {
        // Grad-CAM needs the backward pass, so inference stays on the autodiff backend
        let device = AutoB::main_device();
        inference::explain::<AutoB>(&model_config, 10, &device, app_args)?;
    }

    if !app_args.inference && !app_args.training {
        tracing::warn!("neither training nor inference were enabled");
        println!("{}", common::cli::HELP);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let app_args = AppArgs::parse()?;
    common::cli::init_tracing(app_args.verbosity);
    launch::<MainAutoBackend>(&app_args)
}
