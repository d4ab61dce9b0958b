//! Prediction data structures

use serde::{Deserialize, Serialize};
use std::fmt;

/// Skin type classes, in the classifier's output order.
///
/// The discriminant is the output index of the network head, so the order of
/// the variants is part of the model contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkinType {
    /// Dry skin
    Kering = 0,
    /// Normal skin
    Normal = 1,
    /// Oily skin
    Berminyak = 2,
}

impl SkinType {
    /// All labels, indexed by classifier output position
    pub const ALL: [SkinType; 3] = [SkinType::Kering, SkinType::Normal, SkinType::Berminyak];

    /// Map a classifier output index to its label
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Label as reported to clients
    pub fn as_str(self) -> &'static str {
        match self {
            SkinType::Kering => "kering",
            SkinType::Normal => "normal",
            SkinType::Berminyak => "berminyak",
        }
    }

    /// Canned human-readable description shown alongside the result
    pub fn description(self) -> &'static str {
        match self {
            SkinType::Kering => {
                "Kulit Anda tergolong kering. Kulit kering cenderung kurang kelembapan sehingga \
                 dapat terlihat kasar atau bersisik, serta sering terasa kencang, terutama setelah \
                 mencuci wajah. Penting untuk menjaga hidrasi kulit dengan pelembap yang sesuai."
            }
            SkinType::Normal => {
                "Kulit Anda tergolong normal. Kulit normal memiliki keseimbangan kadar minyak dan \
                 kelembapan yang ideal, dengan tekstur yang lembut serta jarang mengalami masalah \
                 kulit seperti jerawat atau kemerahan."
            }
            SkinType::Berminyak => {
                "Kulit Anda tergolong berminyak. Kulit berminyak ditandai dengan produksi sebum \
                 (minyak alami kulit) yang berlebihan, yang dapat menyebabkan tampilan mengkilap \
                 atau berminyak, terutama di daerah T (dahi, hidung, dan dagu)."
            }
        }
    }
}

impl fmt::Display for SkinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-1 classification of one image
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    /// Highest-probability label
    pub label: SkinType,
    /// Probability of `label` (0.0 - 1.0)
    pub confidence: f64,
    /// Full softmax distribution, indexed like [`SkinType::ALL`]
    pub probabilities: [f32; 3],
}

impl PredictionResult {
    /// Build a result from a softmax distribution by picking the top-1 class.
    ///
    /// Ties resolve to the lowest index.
    pub fn from_probabilities(probabilities: [f32; 3]) -> Self {
        let mut best = 0;
        for (i, &p) in probabilities.iter().enumerate().skip(1) {
            if p > probabilities[best] {
                best = i;
            }
        }

        Self {
            label: SkinType::ALL[best],
            confidence: probabilities[best] as f64,
            probabilities,
        }
    }

    pub fn description(&self) -> &'static str {
        self.label.description()
    }

    /// Whether the confidence clears `threshold` (strictly greater)
    pub fn is_above_threshold(&self, threshold: f64) -> bool {
        self.confidence > threshold
    }
}

/// Per-request identifier correlating the archived image and the response
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionId(String);

impl PredictionId {
    /// Mint a fresh random id (UUID v4 with `-` replaced by `_`)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string().replace('-', "_"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PredictionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// MD5 digest of the uploaded bytes, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageHash(String);

impl ImageHash {
    pub fn compute(bytes: &[u8]) -> Self {
        Self(format!("{:x}", md5::compute(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_order_is_positional() {
        assert_eq!(SkinType::from_index(0), Some(SkinType::Kering));
        assert_eq!(SkinType::from_index(1), Some(SkinType::Normal));
        assert_eq!(SkinType::from_index(2), Some(SkinType::Berminyak));
        assert_eq!(SkinType::from_index(3), None);

        for (i, label) in SkinType::ALL.iter().enumerate() {
            assert_eq!(label.index(), i);
        }
    }

    #[test]
    fn test_label_serialization() {
        let json = serde_json::to_string(&SkinType::Berminyak).unwrap();
        assert_eq!(json, "\"berminyak\"");
        assert_eq!(SkinType::Kering.to_string(), "kering");
    }

    #[test]
    fn test_top1_selection() {
        let result = PredictionResult::from_probabilities([0.1, 0.2, 0.7]);
        assert_eq!(result.label, SkinType::Berminyak);
        assert!((result.confidence - 0.7).abs() < 1e-6);
        assert!(result.description().starts_with("Kulit Anda tergolong berminyak"));

        let tie = PredictionResult::from_probabilities([0.4, 0.4, 0.2]);
        assert_eq!(tie.label, SkinType::Kering);
    }

    #[test]
    fn test_threshold_boundary() {
        let at = PredictionResult {
            label: SkinType::Normal,
            confidence: 0.5,
            probabilities: [0.25, 0.5, 0.25],
        };
        assert!(!at.is_above_threshold(0.5));

        let above = PredictionResult {
            confidence: 0.50001,
            ..at
        };
        assert!(above.is_above_threshold(0.5));
    }

    #[test]
    fn test_prediction_id_format() {
        let a = PredictionId::generate();
        let b = PredictionId::generate();

        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
        assert!(!a.as_str().contains('-'));
        assert_eq!(a.as_str().matches('_').count(), 4);
    }

    #[test]
    fn test_image_hash() {
        assert_eq!(
            ImageHash::compute(b"").as_str(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(ImageHash::compute(b"photo"), ImageHash::compute(b"photo"));
        assert_ne!(ImageHash::compute(b"photo-a"), ImageHash::compute(b"photo-b"));
    }
}
