//! Skin Type Classification Service Library
//!
//! Classifies facial skin photos as dry (`kering`), normal or oily
//! (`berminyak`) with a ResNet-50 model, archiving every photo to an
//! object store while inference runs.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod preprocess;
pub mod server;
pub mod storage;
pub mod types;

pub use config::AppConfig;
pub use error::{PipelineError, StorageError, ValidationError};
pub use models::{Classifier, ModelLoader, Predictor};
pub use orchestrator::RequestOrchestrator;
pub use preprocess::ImageCodec;
pub use storage::ArchiveStore;
pub use types::{PredictionData, PredictionResult, SkinType};
