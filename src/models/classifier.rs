//! Skin type classifier over a loaded network

use crate::models::loader::{LoadedNetwork, WeightSource};
use crate::models::network::{SkinTypeNetwork, NUM_CLASSES};
use crate::preprocess::ImageTensor;
use crate::types::PredictionResult;
use anyhow::{bail, Context, Result};
use candle_core::{Device, D};
use tracing::debug;

/// Anything that can turn a normalized image into a prediction.
///
/// Implementations must be safe to call concurrently from many requests.
pub trait Predictor: Send + Sync {
    fn predict(&self, input: &ImageTensor) -> Result<PredictionResult>;
}

/// Top-1 skin type classifier
pub struct Classifier {
    network: SkinTypeNetwork,
    device: Device,
    source: WeightSource,
}

impl Classifier {
    pub fn new(loaded: LoadedNetwork) -> Self {
        Self {
            network: loaded.network,
            device: loaded.device,
            source: loaded.source,
        }
    }

    /// How the weights were obtained
    pub fn source(&self) -> &WeightSource {
        &self.source
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Softmax distribution over the three classes for one image
    pub fn probabilities(&self, input: &ImageTensor) -> Result<[f32; 3]> {
        let logits = self
            .network
            .logits(input.as_tensor())
            .context("Forward pass failed")?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?;
        let rows = probs.to_vec2::<f32>()?;

        let Some(row) = rows.first() else {
            bail!("Classifier returned an empty batch");
        };
        if row.len() != NUM_CLASSES {
            bail!("Expected {NUM_CLASSES} class scores, got {}", row.len());
        }
        Ok([row[0], row[1], row[2]])
    }
}

impl Predictor for Classifier {
    fn predict(&self, input: &ImageTensor) -> Result<PredictionResult> {
        let result = PredictionResult::from_probabilities(self.probabilities(input)?);
        debug!(
            label = %result.label,
            confidence = result.confidence,
            probabilities = ?result.probabilities,
            "Classification complete"
        );
        Ok(result)
    }
}
