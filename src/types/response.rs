//! Response payloads returned to clients

use super::prediction::{ImageHash, PredictionId, PredictionResult, SkinType};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Envelope shared by every `/predict` answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }
}

/// Successful prediction, as serialized in `data`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionData {
    pub id: PredictionId,
    pub result: SkinType,
    pub confidence_score: f64,
    pub is_above_threshold: bool,
    pub description: String,
    /// UTC creation time, RFC 3339 with a `Z` suffix
    pub created_at: String,
    pub image_url: String,
    pub image_hash: ImageHash,
}

impl PredictionData {
    /// Assemble the response for one request
    pub fn new(
        id: PredictionId,
        prediction: &PredictionResult,
        threshold: f64,
        image_url: String,
        image_hash: ImageHash,
    ) -> Self {
        Self {
            id,
            result: prediction.label,
            confidence_score: prediction.confidence,
            is_above_threshold: prediction.is_above_threshold(threshold),
            description: prediction.description().to_string(),
            created_at: format_timestamp(Utc::now()),
            image_url,
            image_hash,
        }
    }
}

/// ISO-8601 UTC timestamp in the form clients already parse
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
