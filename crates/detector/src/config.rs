use crate::error::DetectionError;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_INPUT_SIZE: (u32, u32) = (416, 416);
pub const DEFAULT_OUTPUT_DIR: &str = "detection_result";
pub const DEFAULT_SCORE_THRESH: f32 = 0.5;

/// Process-wide device selection, read once before the model is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceConfig {
    pub gpu_enabled: bool,
    pub device_id: i32,
}

impl DeviceConfig {
    pub fn cpu_only() -> Self {
        Self::default()
    }

    /// GPU is enabled when `CUDA_VISIBLE_DEVICES` starts with a device number.
    /// The first visible device is always addressed as id 0.
    pub fn from_env() -> Self {
        let visible = env::var("CUDA_VISIBLE_DEVICES").ok();
        Self::from_visible_devices(visible.as_deref())
    }

    fn from_visible_devices(visible: Option<&str>) -> Self {
        let gpu_enabled = visible
            .and_then(|v| v.trim().chars().next())
            .is_some_and(|c| c.is_ascii_digit());

        Self {
            gpu_enabled,
            device_id: 0,
        }
    }
}

/// Per-call knobs of [`crate::ObjectDetector::object_detection`].
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOptions {
    pub batch_size: usize,
    pub use_gpu: bool,
    pub output_dir: PathBuf,
    pub score_thresh: f32,
    pub visualization: bool,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            use_gpu: false,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            score_thresh: DEFAULT_SCORE_THRESH,
            visualization: true,
        }
    }
}

impl InferenceOptions {
    pub fn validate(&self) -> Result<(), DetectionError> {
        if self.batch_size == 0 {
            return Err(DetectionError::InvalidArgument(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.score_thresh) {
            return Err(DetectionError::InvalidArgument(format!(
                "score_thresh must be within [0, 1], got {}",
                self.score_thresh
            )));
        }
        Ok(())
    }
}
