//! HTTP surface: `POST /predict` and `GET /health`

use crate::error::{PipelineError, ValidationError};
use crate::models::WeightSource;
use crate::orchestrator::RequestOrchestrator;
use crate::types::{ApiResponse, PredictionData};
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Multipart field carrying the photo
pub const PHOTO_FIELD: &str = "photo";

/// Message returned with every successful prediction
pub const SUCCESS_MESSAGE: &str = "Model predicted successfully";

/// Shared handler state
pub struct ServiceState {
    pub orchestrator: Arc<RequestOrchestrator>,
    pub model_source: WeightSource,
    pub storage_backend: &'static str,
}

/// Build the service router.
///
/// The body limit sits above the upload limit so oversized photos reach
/// validation and get the regular 400 response.
pub fn router(state: Arc<ServiceState>) -> Router {
    let body_limit = state.orchestrator.max_file_size().saturating_mul(2);

    Router::new()
        .route("/predict", post(predict))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Error rendered as `{message, data: null}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self {
            status: StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: err.to_string(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<PredictionData>::failure(self.message);
        (self.status, Json(body)).into_response()
    }
}

async fn predict(
    State(state): State<Arc<ServiceState>>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<PredictionData>>, ApiError> {
    let start_time = Instant::now();

    let mut upload: Option<(String, Bytes)> = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!(error = %e, "Malformed multipart body");
        ApiError::from(e)
    })? {
        if field.name() == Some(PHOTO_FIELD) {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await?;
            upload = Some((filename, bytes));
            break;
        }
    }

    let Some((filename, bytes)) = upload else {
        let err = PipelineError::from(ValidationError::MissingFile);
        state
            .orchestrator
            .metrics()
            .record_failure(err.kind(), start_time.elapsed());
        warn!("Request without a photo field");
        return Err(err.into());
    };

    let data = state.orchestrator.handle(bytes, &filename).await?;
    Ok(Json(ApiResponse::success(SUCCESS_MESSAGE, data)))
}

async fn health(State(state): State<Arc<ServiceState>>) -> Json<serde_json::Value> {
    let metrics = state.orchestrator.metrics();
    Json(json!({
        "status": "ok",
        "model": state.model_source,
        "storage": state.storage_backend,
        "requests": metrics.requests.load(std::sync::atomic::Ordering::Relaxed),
        "predictions": metrics.predictions.load(std::sync::atomic::Ordering::Relaxed),
    }))
}
