use crate::config::ServingConfig;
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use detector::input::decode_image;
use detector::{
    BgrImage, DetectionError, DetectionResult, InferenceBackend, InferenceInput, InferenceOptions,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;

/// Body of `POST /predict/{module_name}`. Everything except `images` falls back
/// to the server's defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_thresh: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_gpu: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<bool>,
}

impl PredictRequest {
    fn options(&self, defaults: &InferenceOptions) -> InferenceOptions {
        InferenceOptions {
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            use_gpu: self.use_gpu.unwrap_or(defaults.use_gpu),
            output_dir: defaults.output_dir.clone(),
            score_thresh: self.score_thresh.unwrap_or(defaults.score_thresh),
            visualization: self.visualization.unwrap_or(defaults.visualization),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PredictResponse {
    pub results: Vec<DetectionResult>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<DetectionError> for ApiError {
    fn from(err: DetectionError) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.to_string())
        } else {
            tracing::error!(error = %err, "Detection failed");
            Self::internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

pub fn router<B>(state: AppState<B>, max_body_bytes: usize) -> Router
where
    B: InferenceBackend + Send + 'static,
{
    Router::new()
        .route("/predict/:module_name", post(predict::<B>))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server<B>(config: &ServingConfig, state: AppState<B>) -> anyhow::Result<()>
where
    B: InferenceBackend + Send + 'static,
{
    let module_name = state.module_name.clone();
    let app = router(state, config.max_body_bytes);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        "Serving {} on http://{}/predict/{}",
        module_name,
        addr,
        module_name
    );

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn predict<B>(
    State(state): State<AppState<B>>,
    Path(module_name): Path<String>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError>
where
    B: InferenceBackend + Send + 'static,
{
    if module_name != *state.module_name {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("module {} is not served here", module_name),
        ));
    }

    let Json(request) = payload.map_err(|rejection| {
        ApiError::new(rejection.status(), rejection.body_text())
    })?;

    if request.images.is_empty() {
        return Err(ApiError::bad_request("images must not be empty"));
    }

    let start = Instant::now();
    let images = request
        .images
        .iter()
        .enumerate()
        .map(|(i, encoded)| {
            decode_base64_image(encoded)
                .map_err(|e| ApiError::bad_request(format!("image {}: {}", i, e.message)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let options = request.options(&state.options);
    let detector = Arc::clone(&state.detector);
    let count = images.len();

    let results = tokio::task::spawn_blocking(move || {
        // The detector keeps no per-call state, so a panicked request leaves it usable
        let mut detector = detector.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovering model handle after a panicked request");
            detector.clear_poison();
            poisoned.into_inner()
        });
        detector
            .object_detection(InferenceInput::Images(images), &options)
            .map_err(ApiError::from)
    })
    .await
    .map_err(|e| ApiError::internal(format!("inference task failed: {}", e)))??;

    tracing::info!(
        module = %module_name,
        images = count,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Prediction served"
    );

    Ok(Json(PredictResponse { results }))
}

/// Decode one base64 image, with or without a `data:*;base64,` prefix.
pub fn decode_base64_image(encoded: &str) -> Result<BgrImage, ApiError> {
    let payload = match encoded.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| ApiError::bad_request("malformed data URL"))?,
        None => encoded,
    };

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| ApiError::bad_request(format!("invalid base64: {}", e)))?;

    decode_image(&bytes).map_err(ApiError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_options_fall_back_to_defaults() {
        let defaults = InferenceOptions {
            visualization: false,
            ..InferenceOptions::default()
        };
        let request = PredictRequest {
            images: vec![],
            score_thresh: Some(0.25),
            ..PredictRequest::default()
        };

        let options = request.options(&defaults);
        assert_eq!(options.score_thresh, 0.25);
        assert_eq!(options.batch_size, 1);
        assert!(!options.visualization);
        assert!(!options.use_gpu);
    }

    #[test]
    fn test_missing_images_key_defaults_to_empty() {
        let request: PredictRequest = serde_json::from_str(r#"{"score_thresh": 0.5}"#).unwrap();
        assert!(request.images.is_empty());
        assert_eq!(request.score_thresh, Some(0.5));
    }

    #[test]
    fn test_invalid_base64_is_bad_request() {
        let err = decode_base64_image("%%%not base64%%%").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.message.contains("base64"));
    }

    #[test]
    fn test_malformed_data_url_is_bad_request() {
        let err = decode_base64_image("data:image/png;base64").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_undecodable_bytes_are_bad_request() {
        let encoded = STANDARD.encode(b"definitely not an image");
        let err = decode_base64_image(&encoded).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_detection_errors_map_to_status() {
        let client: ApiError = DetectionError::InvalidArgument("batch_size".into()).into();
        assert_eq!(client.status(), StatusCode::BAD_REQUEST);

        let server: ApiError = DetectionError::Backend(anyhow::anyhow!("session lost")).into();
        assert_eq!(server.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
