use crate::manifest::ModelManifest;
use ndarray::{Array2, Array4, ArrayD};
use std::path::Path;

#[cfg(feature = "ort-backend")]
pub mod ort;

#[cfg(feature = "stub-backend")]
pub mod stub;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Cpu,
    Cuda { device_id: i32 },
}

pub trait InferenceBackend {
    fn load_model(
        path: &Path,
        manifest: &ModelManifest,
        provider: ExecutionProvider,
    ) -> anyhow::Result<Self>
    where
        Self: Sized;

    /// Run one forward pass.
    ///
    /// `images` is `[N, 3, H, W]` in `[0, 1]`, `image_shapes` is `[N, 2]` holding
    /// each original `(height, width)` so boxes come back in source pixels.
    fn infer(
        &mut self,
        images: &Array4<f32>,
        image_shapes: &Array2<f32>,
    ) -> anyhow::Result<InferenceOutput>;
}

pub struct InferenceOutput {
    pub boxes: ArrayD<f32>,   // [N, B, 4] y1, x1, y2, x2 in original pixels
    pub scores: ArrayD<f32>,  // [N, C, B] per-class scores
    pub indices: ArrayD<i32>, // [K, 3] batch, class, box selected by NMS
}
