//! Configuration management for the skin type prediction service

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `SKIN_TYPE__MODEL__LOCATOR`
pub const ENV_PREFIX: &str = "SKIN_TYPE";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Classifier weights configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Local path, `gs://bucket/key` URI or HTTPS URL of the weights
    #[serde(default = "default_model_locator")]
    pub locator: String,
    /// Inference device: "auto", "cpu", "cuda" or "cuda:N"
    #[serde(default = "default_device")]
    pub device: String,
    /// Seed for the head re-initialization used when loading fails
    #[serde(default)]
    pub fallback_seed: u64,
}

fn default_model_locator() -> String {
    "models/skin_type.pth".to_string()
}

fn default_device() -> String {
    "auto".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            locator: default_model_locator(),
            device: default_device(),
            fallback_seed: 0,
        }
    }
}

/// Accepted upload constraints
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum payload size in bytes (default: 10 MiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
    /// Allowed filename extensions, lowercase
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_max_file_size() -> usize {
    10 * 1024 * 1024
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["png".to_string(), "jpg".to_string(), "jpeg".to_string()]
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

/// Object store backend selection
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Google Cloud Storage bucket
    Gcs,
    /// Directory on the local filesystem
    #[default]
    Local,
}

/// Content type declared on archived objects
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentTypePolicy {
    /// Always `image/jpeg`, whatever the upload's format
    #[default]
    Fixed,
    /// Derived from the validated filename extension
    ByExtension,
}

/// How requests to Google Cloud Storage are authorized
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GcsAuth {
    /// No credentials (public buckets, emulators); honours `storage.endpoint`
    Anonymous,
    /// Static bearer token from `storage.access_token`
    Token,
    /// Service account JSON key at `storage.service_account_path`
    ServiceAccount,
    /// Application Default Credentials: `GOOGLE_APPLICATION_CREDENTIALS`,
    /// the gcloud ADC file, then the GCE metadata server
    #[default]
    ApplicationDefault,
}

/// Archive storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Bucket name (GCS backend)
    #[serde(default)]
    pub bucket_name: String,
    /// Prefix prepended to every archived object key
    #[serde(default = "default_upload_folder")]
    pub upload_folder: String,
    /// API endpoint for anonymous and token auth; override to target an emulator
    #[serde(default = "default_gcs_endpoint")]
    pub endpoint: String,
    /// Base URL of public object links; defaults to the endpoint
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default)]
    pub auth: GcsAuth,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub service_account_path: Option<String>,
    /// Retries for failed object store requests
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Root directory (local backend)
    #[serde(default = "default_local_root")]
    pub local_root: String,
    #[serde(default)]
    pub content_type_policy: ContentTypePolicy,
}

fn default_upload_folder() -> String {
    "uploads/".to_string()
}

fn default_gcs_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_max_retries() -> usize {
    3
}

fn default_local_root() -> String {
    "archive".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            bucket_name: String::new(),
            upload_folder: default_upload_folder(),
            endpoint: default_gcs_endpoint(),
            public_base_url: None,
            auth: GcsAuth::default(),
            access_token: None,
            service_account_path: None,
            max_retries: default_max_retries(),
            local_root: default_local_root(),
            content_type_policy: ContentTypePolicy::default(),
        }
    }
}

impl StorageConfig {
    /// Settings that load fine but are unlikely to be what the operator meant
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.backend == StorageBackend::Local {
            if self.public_base_url.is_none() {
                warnings.push(format!(
                    "Local archive backend has no public_base_url; clients will receive file:// URLs under {}",
                    self.local_root
                ));
            }
            if !self.bucket_name.is_empty() {
                warnings.push(format!(
                    "bucket_name {:?} is ignored because storage.backend is \"local\"",
                    self.bucket_name
                ));
            }
        }
        warnings
    }
}

/// Request pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Number of inference workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Confidence a prediction must exceed to be flagged as reliable
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Deadline for preprocessing + inference in milliseconds (0 = none)
    #[serde(default = "default_inference_timeout_ms")]
    pub inference_timeout_ms: u64,
    /// Deadline for the archive upload in milliseconds (0 = none)
    #[serde(default = "default_upload_timeout_ms")]
    pub upload_timeout_ms: u64,
}

fn default_workers() -> usize {
    2
}

fn default_threshold() -> f64 {
    0.5
}

fn default_inference_timeout_ms() -> u64 {
    30_000
}

fn default_upload_timeout_ms() -> u64 {
    30_000
}

impl PipelineConfig {
    pub fn inference_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.inference_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.upload_timeout_ms)
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            threshold: default_threshold(),
            inference_timeout_ms: default_inference_timeout_ms(),
            upload_timeout_ms: default_upload_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Periodic metrics summary configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Seconds between summaries (0 = disabled)
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

fn default_report_interval() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: default_report_interval(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `config/config.toml` and the environment
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path, layering environment overrides.
    ///
    /// A missing file is not an error; every field has a default.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("upload.allowed_extensions")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
