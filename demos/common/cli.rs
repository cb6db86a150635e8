use crate::common::{
    backend::{MainBackend, RecorderTy},
    model::ModelConfigExt,
    optim::OptimConfigExt,
};
use burn::module::AutodiffModule;
use burn::record::{FileRecorder, Recorder};
use burn::{optim::Optimizer, prelude::*, tensor::backend::AutodiffBackend};
use std::path::{Path, PathBuf};

pub const HELP: &str = "\
Burn Grad-CAM digit classifier

Trains a small convolutional digit classifier on MNIST and explains its predictions
with Grad-CAM heatmaps. Models, optimizers, and configurations are persisted in an
artifacts directory.

USAGE:
    mnist-class [OPTIONS]

When no --training or --inference flag is provided, the program exits after handling configuration logic.

BEHAVIOR OVERVIEW
- If --training-config or --model-config is given, the corresponding config is loaded from the specified file and saved to the artifacts directory (overwriting any existing file).
- Otherwise configs are loaded from the artifacts directory, or created with their defaults and saved.
- Model and optimizer weights are loaded from the artifacts directory if present; otherwise new ones are created and saved.
- Training saves a preview of the first 100 training digits, then trains and validates on the test split.
- Inference writes Grad-CAM overlays of test digits into the artifacts directory.
- If both --training and --inference are specified, training executes first.

FLAGS:
    -h, --help                  Show this help message and exit
    -v, --verbose               Increase the log verbosity (repeatable)

OPTIONS:
    -t, --training              Run training (creates or updates model / optimizer)
    -i, --inference             Render Grad-CAM overlays for a few test digits
    -r, --remove-artifacts      Delete existing model and optimizer files from the artifacts directory before training
                                (has no effect if --training is not used)
    -c, --training-config <PATH>
                                Load training configuration from this file (overrides any config in artifacts directory)
    -m, --model-config <PATH>   Load model configuration from this file (overrides any config in artifacts directory)
    -a, --artifacts-path <PATH>
                                Directory where configurations, model weights, and optimizer state are saved and loaded.
                                Defaults to a newly created temporary directory (path will be logged).
";

#[derive(Debug)]
pub struct AppArgs {
    pub training: bool,
    pub inference: bool,
    pub remove_artifacts: bool,
    pub verbosity: u8,
    pub training_config: Option<PathBuf>,
    pub model_config: Option<PathBuf>,
    pub artifacts_path: PathBuf,
}

impl AppArgs {
    pub fn parse() -> Result<Self, pico_args::Error> {
        let mut pargs = pico_args::Arguments::from_env();

        // Help has a higher priority and should be handled separately.
        if pargs.contains(["-h", "--help"]) {
            println!("{}", HELP);
            std::process::exit(0);
        }

        let args = AppArgs {
            training_config: pargs
                .opt_value_from_os_str(["-c", "--training-config"], parse_path)?,
            model_config: pargs.opt_value_from_os_str(["-m", "--model-config"], parse_path)?,
            artifacts_path: pargs
                .opt_value_from_os_str(["-a", "--artifacts-path"], parse_path)?
                .unwrap_or_else(new_artifacts_dir),
            // must parse flags after values
            training: pargs.contains(["-t", "--training"]),
            inference: pargs.contains(["-i", "--inference"]),
            remove_artifacts: pargs.contains(["-r", "--remove-artifacts"]),
            verbosity: count_flag(&mut pargs, ["-v", "--verbose"]),
        };

        let remaining = pargs.finish();
        if !remaining.is_empty() {
            panic!("unused arguments: {remaining:?}");
        }

        Ok(args)
    }

    pub fn create_artifact_dir(&self) {
        create_artifact_dir(&self.artifacts_path, self.remove_artifacts && self.training)
    }

    pub fn save_training_config(&self, training_config: &impl Config) {
        let path = self
            .artifacts_path
            .join(TRAINING_CONFIG_NAME)
            .with_extension("json");
        save_config(&path, training_config)
    }

    pub fn load_training_config<TrainingConfig: Config>(&self) -> Option<TrainingConfig> {
        let default = self
            .artifacts_path
            .join(TRAINING_CONFIG_NAME)
            .with_extension("json");
        load_config_override(self.training_config.as_deref(), &default)
    }

    pub fn save_model_config(&self, model_config: &impl Config) {
        let path = self
            .artifacts_path
            .join(MODEL_CONFIG_NAME)
            .with_extension("json");
        save_config(&path, model_config)
    }

    pub fn load_model_config<B: Backend, ModelConfig: ModelConfigExt<B>>(
        &self,
    ) -> Option<ModelConfig> {
        let default = self
            .artifacts_path
            .join(MODEL_CONFIG_NAME)
            .with_extension("json");
        load_config_override(self.model_config.as_deref(), &default)
    }

    pub fn save_model<B: Backend>(&self, model: &impl Module<B>) {
        save_model(&self.artifacts_path, model)
    }

    pub fn load_model<B: Backend, ModelConfig: ModelConfigExt<B>>(
        &self,
        model_config: &ModelConfig,
        device: &B::Device,
    ) -> Option<ModelConfig::Model> {
        load_model::<B, _>(&self.artifacts_path, model_config, device)
    }

    pub fn load_or_save_model<B: Backend, ModelConfig: ModelConfigExt<B>>(
        &self,
        model_config: &ModelConfig,
        device: &B::Device,
    ) -> ModelConfig::Model {
        self.load_model(model_config, device).unwrap_or_else(|| {
            tracing::info!("initializing a new model");
            let model_init = model_config.init(device);
            self.save_model(&model_init);
            model_init
        })
    }

    pub fn save_optim<AutoB, AutoM>(&self, optim: &impl Optimizer<AutoM, AutoB>)
    where
        AutoB: AutodiffBackend,
        AutoM: AutodiffModule<AutoB>,
    {
        save_optim(&self.artifacts_path, optim)
    }

    pub fn load_or_save_optim<AutoB, AutoM, OptimConfig>(
        &self,
        optim_config: &OptimConfig,
        device: &AutoB::Device,
    ) -> OptimConfig::Adaptor
    where
        AutoB: AutodiffBackend,
        AutoM: AutodiffModule<AutoB>,
        OptimConfig: OptimConfigExt<AutoB, AutoM>,
    {
        load_optim::<AutoB, AutoM, _>(&self.artifacts_path, optim_config, device).unwrap_or_else(
            || {
                tracing::info!("initializing a new optimizer");
                let optim_init = optim_config.init();
                self.save_optim(&optim_init);
                optim_init
            },
        )
    }
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence; otherwise 0 is `info`, 1 is `debug`, 2 and above is `trace`.
pub fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn parse_path(s: &std::ffi::OsStr) -> Result<std::path::PathBuf, &'static str> {
    Ok(s.into())
}

pub fn count_flag(pargs: &mut pico_args::Arguments, keys: [&'static str; 2]) -> u8 {
    let mut count = 0;
    while pargs.contains(keys) {
        count += 1;
    }
    count
}

/// e.g. /tmp/burn-grad-cam-mnist-class-abcd-0
pub fn new_artifacts_dir() -> PathBuf {
    let name = format!(
        "{}-{}-",
        std::env!("CARGO_PKG_NAME"),
        std::env!("CARGO_BIN_NAME")
    );
    let tmp = temp_dir::TempDir::with_prefix(name)
        .expect("Failed to create the temporary directory")
        .dont_delete_on_drop();
    let path = tmp.path();
    eprintln!("new artifacts directory: {path:?}");
    path.into()
}

// Create the directory to save the model and model config
pub fn create_artifact_dir(artifact_dir: &Path, delete: bool) {
    if delete {
        // enforce that the removal should not have errors,
        // including for when files didn't exist
        tracing::warn!(?artifact_dir, "removing the model and optimizer");
        std::fs::remove_file(artifact_dir.join(MODEL_NAME).with_extension(record_ext()))
            .expect("failed to remove the model");
        std::fs::remove_file(artifact_dir.join(OPTIM_NAME).with_extension(record_ext()))
            .expect("failed to remove the optim");
    }
    std::fs::create_dir_all(artifact_dir).expect("failed to create the artifacts directory");
}

pub const TRAINING_CONFIG_NAME: &str = "training_config";
pub const MODEL_CONFIG_NAME: &str = "model_config";

pub fn save_config(path: &Path, config: &impl Config) {
    tracing::info!(?path, "saving config");
    config.save(path).expect("Failed to save the config");
}

pub fn load_config<C: Config>(path: &Path) -> Option<C> {
    let exists = std::fs::exists(path).expect("failed to check the config path");
    if exists {
        tracing::info!(?path, "loading config");
        let config = C::load(path)
            .unwrap_or_else(|e| panic!("Failed to load the config {path:?}: {e}"));
        Some(config)
    } else {
        None
    }
}

/// Loads from `explicit` (which must exist) or else from `default`.
fn load_config_override<C: Config>(explicit: Option<&Path>, default: &Path) -> Option<C> {
    match explicit {
        Some(path) => Some(
            load_config(path).unwrap_or_else(|| panic!("Failed to find the config file {path:?}")),
        ),
        None => load_config(default),
    }
}

fn record_ext() -> String {
    <RecorderTy as FileRecorder<MainBackend>>::file_extension().to_string()
}

pub const MODEL_NAME: &str = "model";
pub fn save_model<B: Backend>(artifact_dir: &Path, model: &impl Module<B>) {
    let path = artifact_dir.join(MODEL_NAME);
    tracing::info!(path = ?path.with_extension(record_ext()), "saving model");
    model
        .clone()
        .save_file(path, &RecorderTy::new()) // ext added automatically
        .expect("Failed to save the model");
}

pub fn load_model<B: Backend, ModelConfig: ModelConfigExt<B>>(
    artifact_dir: &Path,
    model_config: &ModelConfig,
    device: &B::Device,
) -> Option<ModelConfig::Model> {
    let path = artifact_dir.join(MODEL_NAME);
    let path_ext = path.with_extension(record_ext());
    let exists = std::fs::exists(&path_ext).expect("failed to check the model path");
    if exists {
        tracing::info!(path = ?path_ext, "loading model");
        let model = model_config
            .init(device)
            .load_file(path, &RecorderTy::new(), device) // ext added automatically
            .expect("Failed to load the model");
        Some(model)
    } else {
        None
    }
}

pub const OPTIM_NAME: &str = "optim";
pub fn save_optim<AutoB, AutoM, Optim>(artifact_dir: &Path, optim: &Optim)
where
    AutoB: AutodiffBackend,
    AutoM: AutodiffModule<AutoB>,
    Optim: Optimizer<AutoM, AutoB>,
{
    let path = artifact_dir.join(OPTIM_NAME);
    tracing::info!(path = ?path.with_extension(record_ext()), "saving optimizer");
    RecorderTy::new()
        .record(optim.to_record(), path) // ext added automatically
        .expect("Failed to save the optim");
}

pub fn load_optim<AutoB, AutoM, OptimConfig>(
    artifact_dir: &Path,
    optim_config: &OptimConfig,
    device: &AutoB::Device,
) -> Option<OptimConfig::Adaptor>
where
    AutoB: AutodiffBackend,
    AutoM: AutodiffModule<AutoB>,
    OptimConfig: OptimConfigExt<AutoB, AutoM>,
{
    let path = artifact_dir.join(OPTIM_NAME);
    let path_ext = path.with_extension(record_ext());
    let exists = std::fs::exists(&path_ext).expect("failed to check the optim path");
    if exists {
        tracing::info!(path = ?path_ext, "loading optimizer");
        let record = RecorderTy::new()
            .load(path, device) // ext added automatically
            .expect("Failed to load the optim");
        Some(optim_config.init().load_record(record))
    } else {
        None
    }
}
