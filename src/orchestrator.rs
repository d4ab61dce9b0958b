//! Per-request pipeline: validate, then classify and archive concurrently.

use crate::config::{PipelineConfig, UploadConfig};
use crate::error::{Branch, PipelineError, ValidationError};
use crate::metrics::ServiceMetrics;
use crate::models::Predictor;
use crate::preprocess::ImageCodec;
use crate::storage::{ArchiveStore, ArchivedImage};
use crate::types::{ImageHash, PredictionData, PredictionId, PredictionResult};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Fans each upload out to inference and archival, then fans the results in.
pub struct RequestOrchestrator {
    codec: Arc<ImageCodec>,
    predictor: Arc<dyn Predictor>,
    archive: Arc<ArchiveStore>,
    metrics: Arc<ServiceMetrics>,
    inference_permits: Arc<Semaphore>,
    max_file_size: usize,
    allowed_extensions: Vec<String>,
    threshold: f64,
    inference_timeout: Option<Duration>,
    upload_timeout: Option<Duration>,
}

impl RequestOrchestrator {
    pub fn new(
        codec: Arc<ImageCodec>,
        predictor: Arc<dyn Predictor>,
        archive: Arc<ArchiveStore>,
        metrics: Arc<ServiceMetrics>,
        upload: &UploadConfig,
        pipeline: &PipelineConfig,
    ) -> Self {
        Self {
            codec,
            predictor,
            archive,
            metrics,
            inference_permits: Arc::new(Semaphore::new(pipeline.workers.max(1))),
            max_file_size: upload.max_file_size,
            allowed_extensions: upload
                .allowed_extensions
                .iter()
                .map(|ext| ext.to_lowercase())
                .collect(),
            threshold: pipeline.threshold,
            inference_timeout: pipeline.inference_timeout(),
            upload_timeout: pipeline.upload_timeout(),
        }
    }

    pub fn codec(&self) -> &ImageCodec {
        &self.codec
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    pub fn max_file_size(&self) -> usize {
        self.max_file_size
    }

    /// Handle one uploaded photo end to end.
    pub async fn handle(
        &self,
        bytes: Bytes,
        filename: &str,
    ) -> Result<PredictionData, PipelineError> {
        let start_time = Instant::now();

        match self.run(bytes, filename).await {
            Ok(data) => {
                let processing_time = start_time.elapsed();
                self.metrics.record_prediction(
                    processing_time,
                    data.result,
                    data.confidence_score,
                    data.is_above_threshold,
                );
                info!(
                    prediction_id = %data.id,
                    result = %data.result,
                    confidence = data.confidence_score,
                    processing_time_us = processing_time.as_micros(),
                    "Prediction completed"
                );
                Ok(data)
            }
            Err(e) => {
                self.metrics.record_failure(e.kind(), start_time.elapsed());
                if e.is_client_error() {
                    warn!(filename, kind = e.kind(), error = %e, "Rejected upload");
                } else {
                    error!(filename, kind = e.kind(), error = %e, "Prediction failed");
                }
                Err(e)
            }
        }
    }

    async fn run(&self, bytes: Bytes, filename: &str) -> Result<PredictionData, PipelineError> {
        let extension = self.validate(&bytes, filename)?;

        let image_hash = ImageHash::compute(&bytes);
        let prediction_id = PredictionId::generate();
        debug!(
            prediction_id = %prediction_id,
            image_hash = %image_hash,
            size = bytes.len(),
            "Accepted upload"
        );

        let (inference, upload) = tokio::join!(
            with_deadline(
                Branch::Inference,
                self.inference_timeout,
                self.classify(bytes.clone())
            ),
            with_deadline(Branch::Upload, self.upload_timeout, async {
                self.archive
                    .upload(bytes.clone(), &prediction_id, &extension)
                    .await
                    .map_err(PipelineError::from)
            }),
        );

        let prediction = match inference {
            Ok(prediction) => prediction,
            Err(e) => {
                if let Ok(archived) = &upload {
                    self.discard(archived).await;
                }
                return Err(e);
            }
        };
        let archived = upload?;

        Ok(PredictionData::new(
            prediction_id,
            &prediction,
            self.threshold,
            archived.public_url,
            image_hash,
        ))
    }

    /// Cheap checks before any decoding or network work. Returns the
    /// lowercased extension.
    fn validate(&self, bytes: &[u8], filename: &str) -> Result<String, ValidationError> {
        if filename.is_empty() {
            return Err(ValidationError::EmptyFilename);
        }

        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .ok_or(ValidationError::InvalidExtension)?;
        if !self.allowed_extensions.contains(&extension) {
            return Err(ValidationError::InvalidExtension);
        }

        if bytes.is_empty() {
            return Err(ValidationError::EmptyPayload);
        }
        if bytes.len() > self.max_file_size {
            return Err(ValidationError::TooLarge {
                size: bytes.len(),
                limit: self.max_file_size,
            });
        }

        Ok(extension)
    }

    /// Decode and classify on the blocking pool, one permit per call.
    async fn classify(&self, bytes: Bytes) -> Result<PredictionResult, PipelineError> {
        let permit = self
            .inference_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::Inference(e.to_string()))?;

        let codec = self.codec.clone();
        let predictor = self.predictor.clone();

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let tensor = codec.decode_and_normalize(&bytes)?;
            predictor
                .predict(&tensor)
                .map_err(|e| PipelineError::Inference(format!("{e:#}")))
        })
        .await
        .map_err(|e| PipelineError::Inference(format!("inference task aborted: {e}")))?
    }

    async fn discard(&self, archived: &ArchivedImage) {
        match self.archive.discard(archived).await {
            Ok(()) => info!(
                prediction_id = %archived.prediction_id,
                key = %archived.storage_key,
                "Removed archived upload after failed inference"
            ),
            Err(e) => warn!(
                prediction_id = %archived.prediction_id,
                key = %archived.storage_key,
                error = %e,
                "Failed to remove archived upload"
            ),
        }
    }
}

async fn with_deadline<T, F>(
    branch: Branch,
    deadline: Option<Duration>,
    fut: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match deadline {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| PipelineError::Timeout { branch, after })?,
        None => fut.await,
    }
}
