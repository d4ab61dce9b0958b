//! Image decoding and normalization for classifier input.
//!
//! Normalization must match the preprocessing the classifier was trained with.

use crate::error::ValidationError;
use anyhow::Result;
use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};

/// Side length of the square classifier input
pub const INPUT_SIZE: u32 = 224;

/// Per-channel mean (RGB) of the training set statistics
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Normalized `1x3x224x224` input for one image
#[derive(Debug, Clone)]
pub struct ImageTensor(Tensor);

impl ImageTensor {
    pub fn as_tensor(&self) -> &Tensor {
        &self.0
    }

    pub fn into_inner(self) -> Tensor {
        self.0
    }
}

/// Decodes uploads and turns them into classifier input.
pub struct ImageCodec {
    max_bytes: usize,
    device: Device,
    decode_attempts: AtomicU64,
}

impl ImageCodec {
    pub fn new(max_bytes: usize, device: Device) -> Self {
        Self {
            max_bytes,
            device,
            decode_attempts: AtomicU64::new(0),
        }
    }

    /// Decode `bytes` and produce the normalized tensor.
    ///
    /// The size limit is enforced before any decode work.
    pub fn decode_and_normalize(&self, bytes: &[u8]) -> Result<ImageTensor, ValidationError> {
        if bytes.len() > self.max_bytes {
            return Err(ValidationError::TooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        self.decode_attempts.fetch_add(1, Ordering::Relaxed);
        let image = image::load_from_memory(bytes)
            .map_err(|e| ValidationError::Undecodable(e.to_string()))?
            .to_rgb8();

        let values = normalize(&resize(&image));
        let tensor = Tensor::from_vec(
            values,
            (1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize),
            &self.device,
        )
        .map_err(|e| ValidationError::Undecodable(e.to_string()))?;

        Ok(ImageTensor(tensor))
    }

    /// Number of payloads that reached the decoder
    pub fn decode_attempts(&self) -> u64 {
        self.decode_attempts.load(Ordering::Relaxed)
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// Resize to the fixed classifier input size (aspect ratio is not kept)
pub fn resize(image: &RgbImage) -> RgbImage {
    image::imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
}

/// Scale to [0, 1], apply mean/std normalization and lay out as CHW.
pub fn normalize(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut values = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in image.enumerate_pixels() {
        let offset = (y * width + x) as usize;
        for c in 0..3 {
            let scaled = pixel[c] as f32 / 255.0;
            values[c * plane + offset] = (scaled - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    values
}

/// Build a tensor from raw pixels without going through an encoded format
pub fn tensor_from_rgb(image: &RgbImage, device: &Device) -> Result<ImageTensor> {
    let values = normalize(&resize(image));
    let tensor = Tensor::from_vec(
        values,
        (1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize),
        device,
    )?;
    Ok(ImageTensor(tensor))
}
