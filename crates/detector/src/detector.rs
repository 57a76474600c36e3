use crate::backend::{ExecutionProvider, InferenceBackend};
use crate::config::{DeviceConfig, InferenceOptions};
use crate::error::DetectionError;
use crate::input::{BgrImage, InferenceInput};
use crate::manifest::{DEFAULT_MODEL_FILE, ModelManifest};
use crate::processing::post::PostProcessor;
use crate::processing::pre::PreProcessor;
use crate::types::DetectionResult;
use crate::visualization::Visualizer;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub struct DetectionMetrics {
    duration: Histogram<f64>,
    images: Counter<u64>,
    objects: Counter<u64>,
}

impl DetectionMetrics {
    pub fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.01, 0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0, 5.0, 10.0,
        ];
        Self {
            duration: meter
                .f64_histogram("detection_duration_seconds")
                .with_description("Time to run one detection call (load + infer + draw)")
                .with_unit("s")
                .with_boundaries(latency_buckets.to_vec())
                .build(),
            images: meter
                .u64_counter("detection_images_total")
                .with_description("Total images processed")
                .build(),
            objects: meter
                .u64_counter("detection_objects_total")
                .with_description("Total objects detected")
                .build(),
        }
    }

    fn record(&self, elapsed_secs: f64, images: u64, objects: u64) {
        self.duration.record(elapsed_secs, &[]);
        self.images.add(images, &[]);
        self.objects.add(objects, &[]);
    }
}

/// A loaded detection model plus the pre/post-processing around it.
///
/// Owned by whoever loads it; reuse one handle across calls.
pub struct ObjectDetector<B: InferenceBackend> {
    bundle_dir: PathBuf,
    manifest: ModelManifest,
    cpu: B,
    gpu: Option<B>,
    preprocessor: PreProcessor,
    postprocessor: PostProcessor,
    visualizer: Visualizer,
    metrics: DetectionMetrics,
}

impl<B: InferenceBackend> ObjectDetector<B> {
    /// Load the bundle in `dir`. A CUDA session is created next to the CPU one
    /// when `device` enables a GPU; failing to create it only logs a warning.
    pub fn load(dir: &Path, device: &DeviceConfig) -> Result<Self, DetectionError> {
        let manifest = ModelManifest::load(dir)?;
        let model_path = manifest.model_path(dir);
        if !model_path.is_file() {
            return Err(DetectionError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("model file not found: {}", model_path.display()),
            )));
        }

        let cpu = B::load_model(&model_path, &manifest, ExecutionProvider::Cpu)
            .map_err(DetectionError::Backend)?;

        let gpu = if device.gpu_enabled {
            let provider = ExecutionProvider::Cuda {
                device_id: device.device_id,
            };
            match B::load_model(&model_path, &manifest, provider) {
                Ok(backend) => Some(backend),
                Err(e) => {
                    tracing::warn!(error = %e, device_id = device.device_id, "GPU session unavailable, continuing on CPU");
                    None
                }
            }
        } else {
            None
        };

        tracing::info!(
            model = %manifest.name,
            version = %manifest.version,
            path = %model_path.display(),
            gpu = gpu.is_some(),
            "Model loaded"
        );

        Self::from_backends(dir, manifest, cpu, gpu)
    }

    /// Assemble a detector around already-loaded sessions.
    pub fn from_backends(
        bundle_dir: &Path,
        manifest: ModelManifest,
        cpu: B,
        gpu: Option<B>,
    ) -> Result<Self, DetectionError> {
        manifest.validate()?;
        let preprocessor = PreProcessor::new(manifest.input_size);
        let postprocessor = PostProcessor::new(manifest.labels.clone());

        Ok(Self {
            bundle_dir: bundle_dir.to_path_buf(),
            manifest,
            cpu,
            gpu,
            preprocessor,
            postprocessor,
            visualizer: Visualizer::default(),
            metrics: DetectionMetrics::new("detector"),
        })
    }

    pub fn with_visualizer(mut self, visualizer: Visualizer) -> Self {
        self.visualizer = visualizer;
        self
    }

    pub fn manifest(&self) -> &ModelManifest {
        &self.manifest
    }

    pub fn backend(&self) -> &B {
        &self.cpu
    }

    pub fn gpu_backend(&self) -> Option<&B> {
        self.gpu.as_ref()
    }

    pub fn has_gpu(&self) -> bool {
        self.gpu.is_some()
    }

    /// Run detection over every input, one forward pass per `batch_size` chunk.
    ///
    /// Results come back in input order, one per image. All inputs are read
    /// and validated before the first forward pass.
    #[tracing::instrument(skip_all, fields(images = input.len(), batch_size = options.batch_size))]
    pub fn object_detection(
        &mut self,
        input: InferenceInput,
        options: &InferenceOptions,
    ) -> Result<Vec<DetectionResult>, DetectionError> {
        options.validate()?;
        if options.use_gpu && self.gpu.is_none() {
            return Err(DetectionError::GpuUnavailable);
        }

        let start = Instant::now();
        let loaded = input.load()?;
        let mut detections = Vec::with_capacity(loaded.len());

        for chunk in loaded.chunks(options.batch_size) {
            let images: Vec<&BgrImage> = chunk.iter().map(|l| &l.image).collect();
            let batch = self
                .preprocessor
                .preprocess_batch(&images)
                .map_err(DetectionError::Processing)?;

            let backend = match (options.use_gpu, self.gpu.as_mut()) {
                (true, Some(gpu)) => gpu,
                (true, None) => return Err(DetectionError::GpuUnavailable),
                (false, _) => &mut self.cpu,
            };
            let output = backend
                .infer(&batch.images, &batch.image_shapes)
                .map_err(DetectionError::Backend)?;

            detections.extend(
                self.postprocessor
                    .parse_detections(&output, &batch.sizes, options.score_thresh)
                    .map_err(DetectionError::Processing)?,
            );
        }

        // Nothing is written until every forward pass has succeeded
        let mut results = Vec::with_capacity(loaded.len());
        for (index, (image, data)) in loaded.iter().zip(detections).enumerate() {
            let save_path = if options.visualization {
                Some(self.visualizer.save(
                    &image.image,
                    &data,
                    &options.output_dir,
                    image.source.as_deref(),
                    index,
                )?)
            } else {
                None
            };
            results.push(DetectionResult { data, save_path });
        }

        let objects: usize = results.iter().map(|r| r.data.len()).sum();
        let elapsed = start.elapsed();
        self.metrics
            .record(elapsed.as_secs_f64(), results.len() as u64, objects as u64);

        tracing::debug!(
            images = results.len(),
            objects,
            elapsed_ms = elapsed.as_millis() as u64,
            "Detection finished"
        );

        Ok(results)
    }

    /// Write `model.onnx` and `manifest.json` into `dirname`, creating it if
    /// needed. Other files in the directory are left alone.
    pub fn save_inference_model(&self, dirname: &Path) -> Result<PathBuf, DetectionError> {
        fs::create_dir_all(dirname)?;

        let mut manifest = self.manifest.clone();
        manifest.model_file = DEFAULT_MODEL_FILE.to_string();

        let src = self.manifest.model_path(&self.bundle_dir);
        let dst = manifest.model_path(dirname);

        // Copying a file onto itself truncates it
        let same_file = match (fs::canonicalize(&src), fs::canonicalize(&dst)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !same_file {
            fs::copy(&src, &dst)?;
        }

        let manifest_path = manifest.save(dirname)?;

        tracing::info!(
            dir = %dirname.display(),
            manifest = %manifest_path.display(),
            "Model bundle exported"
        );

        Ok(dirname.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InferenceOutput;
    use crate::manifest::MANIFEST_FILE;
    use ndarray::{Array2, Array3, Array4, ArrayD, IxDyn};
    use tempfile::tempdir;

    /// One fixed box per image covering its top-left quarter, class 0.
    struct QuarterBackend {
        provider: ExecutionProvider,
        calls: Vec<usize>,
        fail_on_call: Option<usize>,
    }

    impl InferenceBackend for QuarterBackend {
        fn load_model(
            _path: &Path,
            _manifest: &ModelManifest,
            provider: ExecutionProvider,
        ) -> anyhow::Result<Self> {
            Ok(Self {
                provider,
                calls: Vec::new(),
                fail_on_call: None,
            })
        }

        fn infer(
            &mut self,
            images: &Array4<f32>,
            image_shapes: &Array2<f32>,
        ) -> anyhow::Result<InferenceOutput> {
            let n = images.dim().0;
            if self.fail_on_call == Some(self.calls.len()) {
                anyhow::bail!("forward pass {} failed", self.calls.len());
            }
            self.calls.push(n);

            let mut boxes = Array3::<f32>::zeros((n, 1, 4));
            let mut scores = Array3::<f32>::zeros((n, 2, 1));
            let mut indices = Vec::new();
            for b in 0..n {
                boxes[[b, 0, 2]] = image_shapes[[b, 0]] / 2.0;
                boxes[[b, 0, 3]] = image_shapes[[b, 1]] / 2.0;
                scores[[b, 0, 0]] = 0.8;
                indices.extend_from_slice(&[b as i32, 0, 0]);
            }

            Ok(InferenceOutput {
                boxes: boxes.into_dyn(),
                scores: scores.into_dyn(),
                indices: ArrayD::from_shape_vec(IxDyn(&[n, 3]), indices)?,
            })
        }
    }

    fn test_manifest() -> ModelManifest {
        ModelManifest {
            input_size: (32, 32),
            labels: vec!["cat".to_string(), "dog".to_string()],
            ..ModelManifest::default()
        }
    }

    fn bundle(dir: &Path) {
        test_manifest().save(dir).unwrap();
        fs::write(dir.join(DEFAULT_MODEL_FILE), b"weights").unwrap();
    }

    fn no_visualization() -> InferenceOptions {
        InferenceOptions {
            visualization: false,
            ..InferenceOptions::default()
        }
    }

    fn images(count: usize) -> InferenceInput {
        InferenceInput::Images(
            (0..count)
                .map(|i| Array3::<u8>::zeros((20 + i, 40, 3)))
                .collect(),
        )
    }

    #[test]
    fn test_results_follow_input_order() {
        let dir = tempdir().unwrap();
        bundle(dir.path());
        let mut detector =
            ObjectDetector::<QuarterBackend>::load(dir.path(), &DeviceConfig::cpu_only()).unwrap();

        let results = detector
            .object_detection(images(3), &no_visualization())
            .unwrap();

        assert_eq!(results.len(), 3);
        for (i, result) in results.iter().enumerate() {
            let det = &result.data[0];
            assert_eq!(det.label, "cat");
            assert_eq!(det.right, 20);
            assert_eq!(det.bottom, ((20 + i) as f32 / 2.0).round() as i32);
            assert!(result.save_path.is_none());
        }
    }

    #[test]
    fn test_chunks_by_batch_size() {
        let dir = tempdir().unwrap();
        bundle(dir.path());
        let mut detector =
            ObjectDetector::<QuarterBackend>::load(dir.path(), &DeviceConfig::cpu_only()).unwrap();

        let options = InferenceOptions {
            batch_size: 2,
            ..no_visualization()
        };
        let results = detector.object_detection(images(5), &options).unwrap();

        assert_eq!(results.len(), 5);
        assert_eq!(detector.backend().calls, vec![2, 2, 1]);
    }

    #[test]
    fn test_threshold_above_scores_drops_everything() {
        let dir = tempdir().unwrap();
        bundle(dir.path());
        let mut detector =
            ObjectDetector::<QuarterBackend>::load(dir.path(), &DeviceConfig::cpu_only()).unwrap();

        let options = InferenceOptions {
            score_thresh: 0.9,
            ..no_visualization()
        };
        let results = detector.object_detection(images(2), &options).unwrap();

        assert!(results.iter().all(|r| r.data.is_empty()));
    }

    #[test]
    fn test_empty_input_returns_no_results() {
        let dir = tempdir().unwrap();
        bundle(dir.path());
        let mut detector =
            ObjectDetector::<QuarterBackend>::load(dir.path(), &DeviceConfig::cpu_only()).unwrap();

        let results = detector
            .object_detection(InferenceInput::Paths(vec![]), &no_visualization())
            .unwrap();

        assert!(results.is_empty());
        assert!(detector.backend().calls.is_empty());
    }

    #[test]
    fn test_invalid_options_are_rejected_before_inference() {
        let dir = tempdir().unwrap();
        bundle(dir.path());
        let mut detector =
            ObjectDetector::<QuarterBackend>::load(dir.path(), &DeviceConfig::cpu_only()).unwrap();

        let options = InferenceOptions {
            batch_size: 0,
            ..no_visualization()
        };
        assert!(matches!(
            detector.object_detection(images(1), &options),
            Err(DetectionError::InvalidArgument(_))
        ));
        assert!(detector.backend().calls.is_empty());
    }

    #[test]
    fn test_gpu_request_without_gpu_session() {
        let dir = tempdir().unwrap();
        bundle(dir.path());
        let mut detector =
            ObjectDetector::<QuarterBackend>::load(dir.path(), &DeviceConfig::cpu_only()).unwrap();

        let options = InferenceOptions {
            use_gpu: true,
            ..no_visualization()
        };
        assert!(matches!(
            detector.object_detection(images(1), &options),
            Err(DetectionError::GpuUnavailable)
        ));
    }

    #[test]
    fn test_gpu_session_is_used_when_requested() {
        let dir = tempdir().unwrap();
        bundle(dir.path());
        let device = DeviceConfig {
            gpu_enabled: true,
            device_id: 0,
        };
        let mut detector = ObjectDetector::<QuarterBackend>::load(dir.path(), &device).unwrap();

        let options = InferenceOptions {
            use_gpu: true,
            ..no_visualization()
        };
        detector.object_detection(images(1), &options).unwrap();

        let gpu = detector.gpu_backend().unwrap();
        assert_eq!(gpu.provider, ExecutionProvider::Cuda { device_id: 0 });
        assert_eq!(gpu.calls, vec![1]);
        assert!(detector.backend().calls.is_empty());
    }

    #[test]
    fn test_missing_model_file() {
        let dir = tempdir().unwrap();
        test_manifest().save(dir.path()).unwrap();

        let result = ObjectDetector::<QuarterBackend>::load(dir.path(), &DeviceConfig::cpu_only());
        assert!(matches!(result, Err(DetectionError::Io(_))));
    }

    #[test]
    fn test_export_into_same_directory_keeps_model() {
        let dir = tempdir().unwrap();
        bundle(dir.path());
        let detector =
            ObjectDetector::<QuarterBackend>::load(dir.path(), &DeviceConfig::cpu_only()).unwrap();

        detector.save_inference_model(dir.path()).unwrap();

        assert_eq!(fs::read(dir.path().join(DEFAULT_MODEL_FILE)).unwrap(), b"weights");
    }

    #[test]
    fn test_export_leaves_other_files_untouched() {
        let src = tempdir().unwrap();
        bundle(src.path());
        let dst = tempdir().unwrap();
        fs::write(dst.path().join("notes.txt"), b"keep me").unwrap();
        fs::write(dst.path().join(DEFAULT_MODEL_FILE), b"old").unwrap();

        let detector =
            ObjectDetector::<QuarterBackend>::load(src.path(), &DeviceConfig::cpu_only()).unwrap();
        let out = detector.save_inference_model(dst.path()).unwrap();

        assert_eq!(out, dst.path());
        assert_eq!(fs::read(dst.path().join("notes.txt")).unwrap(), b"keep me");
        assert_eq!(fs::read(dst.path().join(DEFAULT_MODEL_FILE)).unwrap(), b"weights");
        assert!(dst.path().join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_failed_later_batch_writes_no_annotations() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("output");
        let backend = QuarterBackend {
            provider: ExecutionProvider::Cpu,
            calls: Vec::new(),
            fail_on_call: Some(1),
        };
        let mut detector =
            ObjectDetector::from_backends(dir.path(), test_manifest(), backend, None).unwrap();

        let options = InferenceOptions {
            batch_size: 1,
            visualization: true,
            output_dir: out.clone(),
            ..InferenceOptions::default()
        };
        let result = detector.object_detection(images(2), &options);

        assert!(matches!(result, Err(DetectionError::Backend(_))));
        assert_eq!(detector.backend().calls, vec![1]);
        let written = fs::read_dir(&out).map(|d| d.count()).unwrap_or(0);
        assert_eq!(written, 0);
    }
}
