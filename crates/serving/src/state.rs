use detector::{InferenceBackend, InferenceOptions, ObjectDetector};
use std::sync::{Arc, Mutex};

/// Shared by every request. The model handle sits behind a mutex, so forward
/// passes run one at a time.
pub struct AppState<B: InferenceBackend> {
    pub detector: Arc<Mutex<ObjectDetector<B>>>,
    pub module_name: Arc<str>,
    pub options: InferenceOptions,
}

impl<B: InferenceBackend> AppState<B> {
    /// Serves the detector under its manifest name. Requests run without
    /// visualization unless they ask for it.
    pub fn new(detector: ObjectDetector<B>) -> Self {
        let module_name = Arc::from(detector.manifest().name.as_str());
        Self {
            detector: Arc::new(Mutex::new(detector)),
            module_name,
            options: InferenceOptions {
                visualization: false,
                ..InferenceOptions::default()
            },
        }
    }

    pub fn with_options(mut self, options: InferenceOptions) -> Self {
        self.options = options;
        self
    }
}

impl<B: InferenceBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            detector: Arc::clone(&self.detector),
            module_name: Arc::clone(&self.module_name),
            options: self.options.clone(),
        }
    }
}
