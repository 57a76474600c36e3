pub mod config;
pub mod server;
pub mod state;

use config::ServingConfig;
use detector::{DeviceConfig, InferenceBackend, ObjectDetector, Visualizer};
use state::AppState;

/// Load the bundle named by `config`, with the label font if one is set.
pub fn load_detector<B: InferenceBackend>(
    config: &ServingConfig,
) -> anyhow::Result<ObjectDetector<B>> {
    let device = DeviceConfig::from_env();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        gpu = device.gpu_enabled,
        "Loading detection model"
    );

    let mut detector = ObjectDetector::<B>::load(&config.model_dir, &device)?;
    if let Some(font_path) = &config.font_path {
        let font = Visualizer::load_font(font_path)?;
        detector = detector.with_visualizer(Visualizer::new(Some(font)));
    }

    Ok(detector)
}

/// Load the model and serve it until the listener fails.
pub async fn serve<B>(config: ServingConfig) -> anyhow::Result<()>
where
    B: InferenceBackend + Send + 'static,
{
    let detector = load_detector::<B>(&config)?;
    server::run_server(&config, AppState::new(detector)).await
}
