use crate::args::{ExportArgs, ModelArgs, RunArgs, ServeArgs};
use detector::{DetectionResult, InferenceBackend, InferenceInput, InferenceOptions, ObjectDetector};
use serving::config::ServingConfig;
use std::path::PathBuf;

/// Environment settings with the command-line model directory on top.
fn serving_config(model: &ModelArgs) -> ServingConfig {
    ServingConfig {
        model_dir: model.model_dir.clone(),
        ..ServingConfig::from_env()
    }
}

fn load<B: InferenceBackend>(model: &ModelArgs) -> anyhow::Result<ObjectDetector<B>> {
    serving::load_detector::<B>(&serving_config(model))
}

/// Detect objects in `--input_path`, exporting the bundle afterwards when
/// `--save_dir` is given.
pub fn run<B: InferenceBackend>(args: &RunArgs) -> anyhow::Result<Vec<DetectionResult>> {
    let mut detector = load::<B>(&args.model)?;

    let options = InferenceOptions {
        batch_size: args.batch_size,
        use_gpu: args.use_gpu,
        output_dir: args.output_dir.clone(),
        score_thresh: args.score_thresh,
        visualization: args.visualization,
    };

    let results = detector.object_detection(
        InferenceInput::Paths(vec![args.input_path.clone()]),
        &options,
    )?;

    tracing::info!(
        input = %args.input_path.display(),
        detections = results.iter().map(|r| r.data.len()).sum::<usize>(),
        "Detection complete"
    );

    if let Some(save_dir) = &args.save_dir {
        detector.save_inference_model(save_dir)?;
    }

    Ok(results)
}

pub fn export<B: InferenceBackend>(args: &ExportArgs) -> anyhow::Result<PathBuf> {
    let detector = load::<B>(&args.model)?;
    Ok(detector.save_inference_model(&args.dirname)?)
}

pub async fn serve<B>(args: &ServeArgs) -> anyhow::Result<()>
where
    B: InferenceBackend + Send + 'static,
{
    let config = ServingConfig {
        port: args.port,
        ..serving_config(&args.model)
    };
    serving::serve::<B>(config).await
}
