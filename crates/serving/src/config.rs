use common::config::{env_or, otel_endpoint};
use common::{Environment, LogLevel};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_MODEL_DIR: &str = "models/yolov3";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8866;
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct ServingConfig {
    pub model_dir: PathBuf,
    pub bind_addr: String,
    pub port: u16,
    pub max_body_bytes: usize,
    pub font_path: Option<PathBuf>,
    pub environment: Environment,
    pub log_level: LogLevel,
    pub otel_endpoint: Option<String>,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            port: DEFAULT_PORT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            font_path: None,
            environment: Environment::Development,
            log_level: LogLevel::Info,
            otel_endpoint: None,
        }
    }
}

impl ServingConfig {
    pub fn from_env() -> Self {
        Self {
            model_dir: env_or("YOLOV3_MODEL_DIR", PathBuf::from(DEFAULT_MODEL_DIR)),
            bind_addr: env_or("YOLOV3_BIND_ADDR", DEFAULT_BIND_ADDR.to_string()),
            port: env_or("YOLOV3_PORT", DEFAULT_PORT),
            max_body_bytes: env_or("YOLOV3_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES),
            font_path: env::var("YOLOV3_FONT_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            environment: Environment::from_env(),
            log_level: LogLevel::from_env(),
            otel_endpoint: otel_endpoint(),
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}
