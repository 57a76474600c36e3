pub mod backend;
pub mod config;
pub mod detector;
pub mod error;
pub mod input;
pub mod manifest;
pub mod processing;
pub mod types;
pub mod visualization;

// Re-export commonly used types for convenience
pub use backend::{ExecutionProvider, InferenceBackend, InferenceOutput};
pub use config::{DeviceConfig, InferenceOptions};
pub use detector::ObjectDetector;
pub use error::DetectionError;
pub use input::{BgrImage, InferenceInput};
pub use manifest::ModelManifest;
pub use types::{Detection, DetectionResult};
pub use visualization::Visualizer;

#[cfg(feature = "ort-backend")]
pub use backend::ort::OrtBackend;

#[cfg(feature = "stub-backend")]
pub use backend::stub::{StubBackend, StubModel, StubObject};
