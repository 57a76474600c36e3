use clap::{ArgAction, Args, Parser, Subcommand};
use detector::config::{DEFAULT_OUTPUT_DIR, DEFAULT_SCORE_THRESH};
use serving::config::{DEFAULT_MODEL_DIR, DEFAULT_PORT};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "yolov3",
    version,
    about = "YOLOv3 (DarkNet-53, COCO 2017) object detection"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Detect objects in one image and print the results as JSON
    Run(RunArgs),
    /// Serve the model over HTTP
    Serve(ServeArgs),
    /// Write the model bundle to a directory
    Export(ExportArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Model bundle directory (model.onnx + manifest.json)
    #[arg(long = "model_dir", env = "YOLOV3_MODEL_DIR", default_value = DEFAULT_MODEL_DIR)]
    pub model_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Path to the image
    #[arg(long = "input_path")]
    pub input_path: PathBuf,

    #[arg(long = "batch_size", default_value_t = 1)]
    pub batch_size: usize,

    /// Run on the GPU session; needs CUDA_VISIBLE_DEVICES
    #[arg(long = "use_gpu")]
    pub use_gpu: bool,

    /// Where annotated images are written
    #[arg(long = "output_dir", default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    #[arg(long = "score_thresh", default_value_t = DEFAULT_SCORE_THRESH)]
    pub score_thresh: f32,

    /// Save an annotated copy of the input
    #[arg(long = "visualization", default_value_t = true, action = ArgAction::Set)]
    pub visualization: bool,

    /// Export the model bundle here after the run
    #[arg(long = "save_dir")]
    pub save_dir: Option<PathBuf>,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, env = "YOLOV3_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Target directory, created if missing
    #[arg(long)]
    pub dirname: PathBuf,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["yolov3", "run", "--input_path", "cat.jpg"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        assert_eq!(args.input_path, PathBuf::from("cat.jpg"));
        assert_eq!(args.batch_size, 1);
        assert!(!args.use_gpu);
        assert_eq!(args.output_dir, PathBuf::from("detection_result"));
        assert_eq!(args.score_thresh, 0.5);
        assert!(args.visualization);
        assert!(args.save_dir.is_none());
    }

    #[test]
    fn test_run_flags_use_underscored_names() {
        let cli = Cli::try_parse_from([
            "yolov3",
            "run",
            "--input_path",
            "street.png",
            "--batch_size",
            "4",
            "--use_gpu",
            "--output_dir",
            "out",
            "--score_thresh",
            "0.3",
            "--visualization",
            "false",
            "--save_dir",
            "bundle",
            "--model_dir",
            "weights",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        assert_eq!(args.batch_size, 4);
        assert!(args.use_gpu);
        assert_eq!(args.output_dir, PathBuf::from("out"));
        assert_eq!(args.score_thresh, 0.3);
        assert!(!args.visualization);
        assert_eq!(args.save_dir, Some(PathBuf::from("bundle")));
        assert_eq!(args.model.model_dir, PathBuf::from("weights"));
    }

    #[test]
    fn test_run_requires_input_path() {
        assert!(Cli::try_parse_from(["yolov3", "run"]).is_err());
    }

    #[test]
    fn test_export_requires_dirname() {
        assert!(Cli::try_parse_from(["yolov3", "export"]).is_err());
        let cli = Cli::try_parse_from(["yolov3", "export", "--dirname", "out"]).unwrap();
        assert!(matches!(cli.command, Commands::Export(_)));
    }
}
