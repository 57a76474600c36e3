use super::{ExecutionProvider, InferenceBackend, InferenceOutput};
use crate::manifest::{InputNames, ModelManifest, OutputNames};
use ndarray::{Array2, Array4};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use std::path::Path;

const INTRA_OP_THREADS: usize = 4;

/// ONNX Runtime session over a YOLOv3 graph with built-in NMS.
pub struct OrtBackend {
    session: Session,
    inputs: InputNames,
    outputs: OutputNames,
}

fn build_session(path: &Path, provider: ExecutionProvider) -> anyhow::Result<Session> {
    // Idempotent
    let _ = ort::init().commit();

    let mut builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(INTRA_OP_THREADS)?;

    if let ExecutionProvider::Cuda { device_id } = provider {
        builder = builder.with_execution_providers([CUDAExecutionProvider::default()
            .with_device_id(device_id)
            .build()
            .error_on_failure()])?;
    }

    Ok(builder.commit_from_file(path)?)
}

impl InferenceBackend for OrtBackend {
    fn load_model(
        path: &Path,
        manifest: &ModelManifest,
        provider: ExecutionProvider,
    ) -> anyhow::Result<Self> {
        let session = build_session(path, provider)?;

        tracing::info!(
            path = %path.display(),
            provider = ?provider,
            "ONNX Runtime session ready"
        );

        Ok(Self {
            session,
            inputs: manifest.inputs.clone(),
            outputs: manifest.outputs.clone(),
        })
    }

    fn infer(
        &mut self,
        images: &Array4<f32>,
        image_shapes: &Array2<f32>,
    ) -> anyhow::Result<InferenceOutput> {
        let outputs = self.session.run(ort::inputs![
            self.inputs.image.as_str() => TensorRef::from_array_view(images.view())?,
            self.inputs.image_shape.as_str() => TensorRef::from_array_view(image_shapes.view())?
        ])?;

        let extract_f32 = |name: &str| -> anyhow::Result<_> {
            Ok(require_output(outputs.get(name), name)?
                .try_extract_array::<f32>()?
                .into_owned())
        };

        Ok(InferenceOutput {
            boxes: extract_f32(&self.outputs.boxes)?,
            scores: extract_f32(&self.outputs.scores)?,
            indices: require_output(
                outputs.get(self.outputs.indices.as_str()),
                &self.outputs.indices,
            )?
                .try_extract_array::<i32>()?
                .into_owned(),
        })
    }
}

fn require_output<T>(value: Option<T>, name: &str) -> anyhow::Result<T> {
    value.ok_or_else(|| anyhow::anyhow!("model has no output `{}`", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_output_names_the_output() {
        let err = require_output(None::<()>, "yolonms_layer_1/ExpandDims_1:0").unwrap_err();
        assert!(err.to_string().contains("yolonms_layer_1/ExpandDims_1:0"));
        assert_eq!(require_output(Some(3), "scores").unwrap(), 3);
    }
}
