//! Archival of uploaded photos

use super::{GcsClient, GcsStorage, LocalStorage, ObjectMetadata, ObjectStorage};
use crate::config::{ContentTypePolicy, StorageBackend, StorageConfig};
use crate::error::StorageError;
use crate::types::PredictionId;
use crate::types::response::format_timestamp;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Object name prefix for archived photos, before the prediction id
pub const FILENAME_PREFIX: &str = "skin_type_prediction_";

/// A photo stored for one prediction
#[derive(Debug, Clone)]
pub struct ArchivedImage {
    pub storage_key: String,
    pub public_url: String,
    pub uploaded_at: DateTime<Utc>,
    pub prediction_id: PredictionId,
}

/// Stores raw uploads under keys derived from the prediction id
pub struct ArchiveStore {
    backend: Arc<dyn ObjectStorage>,
    upload_prefix: String,
    content_type_policy: ContentTypePolicy,
}

impl ArchiveStore {
    pub fn new(
        backend: Arc<dyn ObjectStorage>,
        upload_prefix: impl Into<String>,
        content_type_policy: ContentTypePolicy,
    ) -> Self {
        Self {
            backend,
            upload_prefix: upload_prefix.into(),
            content_type_policy,
        }
    }

    /// Build the configured backend. `gcs` is reused when the backend is GCS.
    pub fn from_config(
        config: &StorageConfig,
        gcs: Option<Arc<GcsClient>>,
    ) -> Result<Self, StorageError> {
        for warning in config.warnings() {
            warn!("{warning}");
        }

        let backend: Arc<dyn ObjectStorage> = match config.backend {
            StorageBackend::Gcs => {
                let client = match gcs {
                    Some(client) => client,
                    None => Arc::new(GcsClient::from_config(config)?),
                };
                Arc::new(GcsStorage::new(
                    &client,
                    &config.bucket_name,
                    config.public_base_url.as_deref(),
                )?)
            }
            StorageBackend::Local => Arc::new(LocalStorage::new(
                &config.local_root,
                config.public_base_url.clone(),
            )?),
        };

        info!(
            backend = backend.name(),
            upload_folder = %config.upload_folder,
            "Archive storage initialized"
        );

        Ok(Self::new(
            backend,
            config.upload_folder.clone(),
            config.content_type_policy,
        ))
    }

    /// `<prefix>skin_type_prediction_<id>.<ext>`
    pub fn object_key(&self, prediction_id: &PredictionId, extension: &str) -> String {
        format!(
            "{}{}{}.{}",
            self.upload_prefix,
            FILENAME_PREFIX,
            prediction_id,
            extension.to_lowercase()
        )
    }

    /// Content type declared for an upload with `extension`
    pub fn content_type_for(&self, extension: &str) -> &'static str {
        match self.content_type_policy {
            ContentTypePolicy::Fixed => "image/jpeg",
            ContentTypePolicy::ByExtension => match extension.to_lowercase().as_str() {
                "png" => "image/png",
                _ => "image/jpeg",
            },
        }
    }

    /// Upload the raw photo bytes for `prediction_id`
    pub async fn upload(
        &self,
        bytes: Bytes,
        prediction_id: &PredictionId,
        extension: &str,
    ) -> Result<ArchivedImage, StorageError> {
        let key = self.object_key(prediction_id, extension);
        let uploaded_at = Utc::now();

        let mut metadata = ObjectMetadata::new();
        metadata.insert("prediction_id".to_string(), prediction_id.to_string());
        metadata.insert("uploaded_at".to_string(), format_timestamp(uploaded_at));

        match self
            .backend
            .put(&key, bytes, self.content_type_for(extension), &metadata)
            .await
        {
            Ok(public_url) => {
                info!(key = %key, "Uploaded file to storage");
                Ok(ArchivedImage {
                    storage_key: key,
                    public_url,
                    uploaded_at,
                    prediction_id: prediction_id.clone(),
                })
            }
            Err(e) => {
                error!(key = %key, error = %e, "Failed to upload to storage");
                Err(e)
            }
        }
    }

    /// Remove a previously archived photo
    pub async fn discard(&self, archived: &ArchivedImage) -> Result<(), StorageError> {
        self.backend.delete(&archived.storage_key).await
    }

    pub fn backend(&self) -> &Arc<dyn ObjectStorage> {
        &self.backend
    }
}
