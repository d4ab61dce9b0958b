//! Type definitions for the skin type prediction pipeline

pub mod prediction;
pub mod response;

pub use prediction::{ImageHash, PredictionId, PredictionResult, SkinType};
pub use response::{ApiResponse, PredictionData};
