//! Error taxonomy for the prediction request pipeline

use std::time::Duration;
use thiserror::Error;

/// Client-caused failures, rejected before any heavy work where possible.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No file uploaded")]
    MissingFile,

    #[error("No file selected")]
    EmptyFilename,

    #[error("Invalid file type. Only JPG, JPEG, and PNG are allowed.")]
    InvalidExtension,

    #[error("Uploaded file is empty")]
    EmptyPayload,

    #[error("File size exceeds {}MB limit", .limit / (1024 * 1024))]
    TooLarge { size: usize, limit: usize },

    #[error("Unsupported or corrupt image: {0}")]
    Undecodable(String),
}

/// Failures talking to the object store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage credentials are not configured: {0}")]
    Auth(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("object store request failed: {0}")]
    Backend(#[source] object_store::Error),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound(path),
            other => StorageError::Backend(other),
        }
    }
}

/// Which concurrent branch of a request hit its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Inference,
    Upload,
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Branch::Inference => f.write_str("inference"),
            Branch::Upload => f.write_str("upload"),
        }
    }
}

/// Any per-request failure, classified for the HTTP boundary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Failed to archive image: {0}")]
    Storage(#[from] StorageError),

    #[error("{branch} did not complete within {}ms", .after.as_millis())]
    Timeout { branch: Branch, after: Duration },
}

impl PipelineError {
    /// HTTP status the boundary should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::Validation(_) => 400,
            _ => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }

    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::Inference(_) => "inference",
            PipelineError::Storage(_) => "storage",
            PipelineError::Timeout { .. } => "timeout",
        }
    }
}
