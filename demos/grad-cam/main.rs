//! Explains a trained digit classifier's prediction on a single picture.

use burn::tensor::backend::AutodiffBackend;
use burn_grad_cam::prelude::*;
use common::backend::{MainAutoBackend, MainDevice};
use common::cli::{count_flag, parse_path};
use common::mnist::dataset::{HEIGHT, WIDTH};
use common::model::ModelConfigExt;
use image::imageops::{self, FilterType};
use std::path::PathBuf;

#[path = "../common/mod.rs"]
pub mod common;

pub const HELP: &str = "\
Burn Grad-CAM

Superimposes the Grad-CAM heatmap of a trained digit classifier onto a picture.
The model and its config are read from an artifacts directory written by the
mnist-class demo.

USAGE:
    grad-cam --image <PATH> --artifacts-path <PATH> [OPTIONS]

FLAGS:
    -h, --help                  Show this help message and exit
    -v, --verbose               Increase the log verbosity (repeatable)

OPTIONS:
    -p, --image <PATH>          Picture to explain
    -a, --artifacts-path <PATH> Directory holding the model and its config
    -l, --layer <NAME>          Explained layer (default: the last convolution)
    -k, --class <INDEX>         Explained class (default: the top prediction)
    -c, --colormap <NAME>       afmhot, hot, jet, gray or greys (default: afmhot)
    -A, --alpha <VALUE>         Heatmap intensity added to the picture (default: 2.0)
    -o, --output <PATH>         Output file (default: <image>_cam.<ext>)
    -m, --heatmap <PATH>        Bare heatmap file (default: <image>_heatmap.<ext>)
";

#[derive(Debug)]
pub struct CamArgs {
    pub image: PathBuf,
    pub artifacts_path: PathBuf,
    pub layer: Option<String>,
    pub class: Option<usize>,
    pub colormap: Colormap,
    pub alpha: f32,
    pub output: Option<PathBuf>,
    pub heatmap: Option<PathBuf>,
    pub verbosity: u8,
}

impl CamArgs {
    pub fn parse() -> Result<Self, pico_args::Error> {
        let mut pargs = pico_args::Arguments::from_env();

        if pargs.contains(["-h", "--help"]) {
            println!("{}", HELP);
            std::process::exit(0);
        }

        let args = CamArgs {
            image: pargs.value_from_os_str(["-p", "--image"], parse_path)?,
            artifacts_path: pargs.value_from_os_str(["-a", "--artifacts-path"], parse_path)?,
            layer: pargs.opt_value_from_str(["-l", "--layer"])?,
            class: pargs.opt_value_from_str(["-k", "--class"])?,
            colormap: pargs
                .opt_value_from_str(["-c", "--colormap"])?
                .unwrap_or_default(),
            alpha: pargs.opt_value_from_str(["-A", "--alpha"])?.unwrap_or(2.0),
            output: pargs.opt_value_from_os_str(["-o", "--output"], parse_path)?,
            heatmap: pargs.opt_value_from_os_str(["-m", "--heatmap"], parse_path)?,
            // must parse flags after values
            verbosity: count_flag(&mut pargs, ["-v", "--verbose"]),
        };

        let remaining = pargs.finish();
        if !remaining.is_empty() {
            panic!("unused arguments: {remaining:?}");
        }
        Ok(args)
    }

    /// `<image>_cam.<ext>` next to the picture, unless an output was given.
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| self.sibling("cam"))
    }

    /// `<image>_heatmap.<ext>` next to the picture, unless a path was given.
    pub fn heatmap_path(&self) -> PathBuf {
        self.heatmap.clone().unwrap_or_else(|| self.sibling("heatmap"))
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let stem = self
            .image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = self
            .image
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "png".to_string());
        self.image.with_file_name(format!("{stem}_{suffix}.{ext}"))
    }
}

pub fn run<AutoB>(args: &CamArgs) -> anyhow::Result<()>
where
    AutoB: AutodiffBackend + MainDevice,
{
    let device = AutoB::main_device();

    let model_config_path = args
        .artifacts_path
        .join(common::cli::MODEL_CONFIG_NAME)
        .with_extension("json");
    let model_config: DigitCnnConfig = common::cli::load_config(&model_config_path)
        .ok_or_else(|| anyhow::anyhow!("missing model config {model_config_path:?}"))?;
    let model: DigitCnn<AutoB> =
        common::cli::load_model::<AutoB, _>(&args.artifacts_path, &model_config, &device)
            .ok_or_else(|| anyhow::anyhow!("no trained model in {:?}", args.artifacts_path))?;

    let preprocessing = match model_config.input_channels {
        1 => Preprocessing::Grayscale,
        _ => Preprocessing::UnitScale,
    };
    let picture = load_rgb(&args.image, None)?;
    // the classifier sees the picture at its training resolution
    let resized = imageops::resize(&picture, WIDTH as u32, HEIGHT as u32, FilterType::Nearest);
    let input = to_input_tensor::<AutoB>(&resized, preprocessing, &device);

    let layer = args
        .layer
        .clone()
        .unwrap_or_else(|| ModelConfigExt::<AutoB>::default_layer(&model_config));
    let target = args.class.map(Target::Class).unwrap_or_default();
    let heatmap = GradCamConfig::new(layer)
        .with_target(target)
        .compute(&model, input)?;
    tracing::info!(
        class = heatmap.class,
        score = heatmap.score,
        hottest = ?heatmap.argmax(),
        "explained"
    );

    // one heatmap cell per block of pixels, about as wide as the picture
    let [_rows, cols] = heatmap.dims();
    let scale = (picture.width() / cols as u32).max(1);
    save_heatmap(&heatmap, args.colormap, scale, args.heatmap_path())?;

    let overlay_config = OverlayConfig::new()
        .with_colormap(args.colormap)
        .with_alpha(args.alpha);
    save_overlay(&picture, &heatmap, &overlay_config, args.output_path())?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = CamArgs::parse()?;
    common::cli::init_tracing(args.verbosity);
    run::<MainAutoBackend>(&args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(image: &str, output: Option<&str>) -> CamArgs {
        CamArgs {
            image: image.into(),
            artifacts_path: "/tmp/artifacts".into(),
            layer: None,
            class: None,
            colormap: Colormap::default(),
            alpha: 2.0,
            output: output.map(PathBuf::from),
            heatmap: None,
            verbosity: 0,
        }
    }

    #[test]
    fn output_path_keeps_the_extension() {
        assert_eq!(
            args("pics/castle.jpg", None).output_path(),
            PathBuf::from("pics/castle_cam.jpg")
        );
        assert_eq!(args("digit", None).output_path(), PathBuf::from("digit_cam.png"));
        assert_eq!(
            args("castle.jpg", Some("out.png")).output_path(),
            PathBuf::from("out.png")
        );
    }

    #[test]
    fn heatmap_path_sits_next_to_the_picture() {
        assert_eq!(
            args("pics/castle.jpg", None).heatmap_path(),
            PathBuf::from("pics/castle_heatmap.jpg")
        );
        let mut explicit = args("castle.jpg", None);
        explicit.heatmap = Some("bare.png".into());
        assert_eq!(explicit.heatmap_path(), PathBuf::from("bare.png"));
    }
}
