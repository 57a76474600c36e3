//! Deterministic backend whose "model file" is a JSON list of objects placed at
//! fixed fractions of every input image. Emits the same tensor layout as the
//! YOLOv3 graph so the full post-processing path runs without ONNX Runtime.

use super::{ExecutionProvider, InferenceBackend, InferenceOutput};
use crate::manifest::ModelManifest;
use ndarray::{Array2, Array3, Array4, IxDyn};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StubObject {
    pub class_id: usize,
    pub score: f32,
    /// `[x1, y1, x2, y2]` as fractions of the image size.
    pub bbox: [f32; 4],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StubModel {
    #[serde(default)]
    pub objects: Vec<StubObject>,
    /// Makes every forward pass fail.
    #[serde(default)]
    pub fail: bool,
}

pub struct StubBackend {
    model: StubModel,
    num_classes: usize,
    input_size: (u32, u32),
    provider: ExecutionProvider,
    batch_sizes: Vec<usize>,
}

impl StubBackend {
    pub fn provider(&self) -> ExecutionProvider {
        self.provider
    }

    /// Batch size of every forward pass so far.
    pub fn batch_sizes(&self) -> &[usize] {
        &self.batch_sizes
    }
}

impl InferenceBackend for StubBackend {
    fn load_model(
        path: &Path,
        manifest: &ModelManifest,
        provider: ExecutionProvider,
    ) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        let model: StubModel = serde_json::from_slice(&bytes)?;

        let num_classes = model
            .objects
            .iter()
            .map(|o| o.class_id + 1)
            .max()
            .unwrap_or(0)
            .max(manifest.labels.len());

        tracing::debug!(
            path = %path.display(),
            objects = model.objects.len(),
            "Stub model loaded"
        );

        Ok(Self {
            model,
            num_classes,
            input_size: manifest.input_size,
            provider,
            batch_sizes: Vec::new(),
        })
    }

    fn infer(
        &mut self,
        images: &Array4<f32>,
        image_shapes: &Array2<f32>,
    ) -> anyhow::Result<InferenceOutput> {
        if self.model.fail {
            anyhow::bail!("stub model configured to fail");
        }

        let (n, channels, height, width) = images.dim();
        if channels != 3 || (width as u32, height as u32) != self.input_size {
            anyhow::bail!(
                "unexpected input tensor {:?}, model expects [N, 3, {}, {}]",
                images.shape(),
                self.input_size.1,
                self.input_size.0
            );
        }
        if image_shapes.dim() != (n, 2) {
            anyhow::bail!(
                "image_shape tensor {:?} does not match batch of {}",
                image_shapes.shape(),
                n
            );
        }

        self.batch_sizes.push(n);

        let num_objects = self.model.objects.len();
        let mut boxes = Array3::<f32>::zeros((n, num_objects, 4));
        let mut scores = Array3::<f32>::zeros((n, self.num_classes, num_objects));
        let mut indices = Vec::with_capacity(n * num_objects * 3);

        for b in 0..n {
            let img_h = image_shapes[[b, 0]];
            let img_w = image_shapes[[b, 1]];
            for (j, object) in self.model.objects.iter().enumerate() {
                let [x1, y1, x2, y2] = object.bbox;
                boxes[[b, j, 0]] = y1 * img_h;
                boxes[[b, j, 1]] = x1 * img_w;
                boxes[[b, j, 2]] = y2 * img_h;
                boxes[[b, j, 3]] = x2 * img_w;
                scores[[b, object.class_id, j]] = object.score;
                indices.extend_from_slice(&[b as i32, object.class_id as i32, j as i32]);
            }
        }

        let indices = ndarray::ArrayD::from_shape_vec(IxDyn(&[n * num_objects, 3]), indices)?;

        Ok(InferenceOutput {
            boxes: boxes.into_dyn(),
            scores: scores.into_dyn(),
            indices,
        })
    }
}
