use crate::config::DEFAULT_INPUT_SIZE;
use crate::error::DetectionError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DEFAULT_MODEL_FILE: &str = "model.onnx";
pub const DEFAULT_MODULE_NAME: &str = "yolov3_darknet53_coco2017";

pub const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Graph input names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputNames {
    pub image: String,
    pub image_shape: String,
}

impl Default for InputNames {
    fn default() -> Self {
        Self {
            image: "input_1".to_string(),
            image_shape: "image_shape".to_string(),
        }
    }
}

/// Graph output names: boxes `[N, B, 4]`, scores `[N, C, B]`, selected indices `[K, 3]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputNames {
    pub boxes: String,
    pub scores: String,
    pub indices: String,
}

impl Default for OutputNames {
    fn default() -> Self {
        Self {
            boxes: "yolonms_layer_1/ExpandDims_1:0".to_string(),
            scores: "yolonms_layer_1/ExpandDims_3:0".to_string(),
            indices: "yolonms_layer_1/concat_2:0".to_string(),
        }
    }
}

/// Describes a model bundle directory: the graph file plus what is needed to
/// feed it and name its classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelManifest {
    pub name: String,
    pub version: String,
    pub model_file: String,
    /// `(width, height)` the graph expects.
    pub input_size: (u32, u32),
    pub inputs: InputNames,
    pub outputs: OutputNames,
    pub labels: Vec<String>,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            name: DEFAULT_MODULE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            model_file: DEFAULT_MODEL_FILE.to_string(),
            input_size: DEFAULT_INPUT_SIZE,
            inputs: InputNames::default(),
            outputs: OutputNames::default(),
            labels: COCO_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ModelManifest {
    /// Read `manifest.json` from a bundle directory. A bundle without one is
    /// treated as a bare `model.onnx` with default settings.
    pub fn load(dir: &Path) -> Result<Self, DetectionError> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            tracing::warn!(
                dir = %dir.display(),
                "No manifest found, using default YOLOv3 settings"
            );
            return Ok(Self::default());
        }

        let bytes = fs::read(&path)?;
        let manifest: Self = serde_json::from_slice(&bytes)
            .map_err(|source| DetectionError::Manifest { path, source })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf, DetectionError> {
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(self).map_err(|source| DetectionError::Manifest {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json)?;
        Ok(path)
    }

    pub fn validate(&self) -> Result<(), DetectionError> {
        if self.input_size.0 == 0 || self.input_size.1 == 0 {
            return Err(DetectionError::InvalidArgument(format!(
                "manifest input_size must be non-zero, got {:?}",
                self.input_size
            )));
        }
        if self.labels.is_empty() {
            return Err(DetectionError::InvalidArgument(
                "manifest must list at least one label".to_string(),
            ));
        }
        if self.model_file.is_empty() {
            return Err(DetectionError::InvalidArgument(
                "manifest model_file is empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn model_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.model_file)
    }

    pub fn label(&self, class_id: usize) -> Option<&str> {
        self.labels.get(class_id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_manifest_uses_coco_labels() {
        let manifest = ModelManifest::default();
        assert_eq!(manifest.labels.len(), 80);
        assert_eq!(manifest.label(0), Some("person"));
        assert_eq!(manifest.label(16), Some("dog"));
        assert_eq!(manifest.label(79), Some("toothbrush"));
        assert_eq!(manifest.label(80), None);
        assert_eq!(manifest.input_size, (416, 416));
    }

    #[test]
    fn test_missing_manifest_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let manifest = ModelManifest::load(dir.path()).unwrap();
        assert_eq!(manifest, ModelManifest::default());
        assert_eq!(manifest.model_path(dir.path()), dir.path().join("model.onnx"));
    }

    #[test]
    fn test_save_then_load_preserves_fields() {
        let dir = tempdir().unwrap();
        let manifest = ModelManifest {
            name: "custom".to_string(),
            input_size: (608, 608),
            labels: vec!["cat".to_string(), "dog".to_string()],
            ..Default::default()
        };

        let path = manifest.save(dir.path()).unwrap();
        assert_eq!(path, dir.path().join(MANIFEST_FILE));
        assert_eq!(ModelManifest::load(dir.path()).unwrap(), manifest);
    }

    #[test]
    fn test_partial_manifest_fills_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"labels": ["a", "b", "c"], "input_size": [320, 320]}"#,
        )
        .unwrap();

        let manifest = ModelManifest::load(dir.path()).unwrap();
        assert_eq!(manifest.labels, vec!["a", "b", "c"]);
        assert_eq!(manifest.input_size, (320, 320));
        assert_eq!(manifest.model_file, DEFAULT_MODEL_FILE);
        assert_eq!(manifest.inputs, InputNames::default());
    }

    #[test]
    fn test_malformed_manifest_is_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "{ not json").unwrap();
        assert!(matches!(
            ModelManifest::load(dir.path()),
            Err(DetectionError::Manifest { .. })
        ));

        fs::write(dir.path().join(MANIFEST_FILE), r#"{"labels": []}"#).unwrap();
        assert!(matches!(
            ModelManifest::load(dir.path()),
            Err(DetectionError::InvalidArgument(_))
        ));
    }
}
