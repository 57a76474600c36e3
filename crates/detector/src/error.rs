use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Image shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Failed to load image {}: {source}", path.display())]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to decode image: {0}")]
    ImageDecode(#[source] image::ImageError),

    #[error("Failed to save annotated image {}: {source}", path.display())]
    Visualization {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(
        "GPU requested but no GPU session is loaded. Set CUDA_VISIBLE_DEVICES to a cuda device id before starting the process"
    )]
    GpuUnavailable,

    #[error("Invalid model manifest {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Inference backend error: {0}")]
    Backend(anyhow::Error),

    #[error("Processing error: {0}")]
    Processing(anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DetectionError {
    /// True when the caller supplied bad data, as opposed to a failure inside the pipeline.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DetectionError::InvalidInput(_)
                | DetectionError::InvalidArgument(_)
                | DetectionError::ShapeMismatch(_)
                | DetectionError::ImageLoad { .. }
                | DetectionError::ImageDecode(_)
        )
    }
}
