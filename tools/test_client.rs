//! Test Prediction Client
//!
//! Sends photos to a running service for smoke and load testing.

use anyhow::Context;
use futures::StreamExt;
use image::{ImageFormat, Rgb, RgbImage};
use rand::Rng;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Cursor;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct ApiResponse {
    message: String,
    data: Option<PredictionData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictionData {
    id: String,
    result: String,
    confidence_score: f64,
    is_above_threshold: bool,
    image_url: String,
}

/// A photo to upload, either read from disk or synthesized
struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

/// Synthetic photo generator for testing
struct PhotoGenerator {
    rng: rand::rngs::ThreadRng,
    counter: u64,
}

impl PhotoGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            counter: 0,
        }
    }

    /// Generate a skin-toned gradient with some noise
    fn generate_valid(&mut self) -> anyhow::Result<Upload> {
        self.counter += 1;
        let width = self.rng.gen_range(160..640);
        let height = self.rng.gen_range(160..640);
        let base = [
            self.rng.gen_range(150..240u32),
            self.rng.gen_range(100..190u32),
            self.rng.gen_range(80..170u32),
        ];

        let mut image = RgbImage::new(width, height);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            let shade = (x + y) % 24;
            let noise: u32 = self.rng.gen_range(0..12);
            *pixel = Rgb(base.map(|c| (c + shade + noise).min(255) as u8));
        }

        let (format, ext) = if self.rng.gen_bool(0.5) {
            (ImageFormat::Png, "png")
        } else {
            (ImageFormat::Jpeg, "jpg")
        };
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format)?;

        Ok(Upload {
            filename: format!("photo_{:06}.{}", self.counter, ext),
            bytes: buf.into_inner(),
        })
    }

    /// Generate an upload the service must reject
    fn generate_invalid(&mut self) -> Upload {
        self.counter += 1;
        match self.rng.gen_range(0..3) {
            0 => Upload {
                filename: format!("photo_{:06}.gif", self.counter),
                bytes: vec![0x47, 0x49, 0x46, 0x38],
            },
            1 => Upload {
                filename: format!("photo_{:06}.png", self.counter),
                bytes: Vec::new(),
            },
            _ => Upload {
                filename: format!("photo_{:06}.jpg", self.counter),
                bytes: b"not really a jpeg".to_vec(),
            },
        }
    }
}

#[derive(Default)]
struct Summary {
    latencies: Vec<Duration>,
    by_status: HashMap<u16, u64>,
    by_label: HashMap<String, u64>,
    above_threshold: u64,
    transport_errors: u64,
}

async fn send(
    client: &reqwest::Client,
    url: &str,
    upload: Upload,
) -> anyhow::Result<(u16, ApiResponse)> {
    let part = Part::bytes(upload.bytes)
        .file_name(upload.filename)
        .mime_str("application/octet-stream")?;
    let form = Form::new().part("photo", part);

    let response = client.post(url).multipart(form).send().await?;
    let status = response.status().as_u16();
    let body: ApiResponse = response
        .json()
        .await
        .context("Response was not the expected JSON envelope")?;
    Ok((status, body))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_client=info".parse()?),
        )
        .init();

    info!("Starting Test Prediction Client");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let url = args
        .get(1)
        .map(|s| s.as_str())
        .unwrap_or("http://localhost:5000/predict");
    let count: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(20);
    let concurrency: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(4);
    let invalid_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.1);
    let image_path = args.get(5).filter(|s| s.as_str() != "-");

    info!(
        url = %url,
        count = count,
        concurrency = concurrency,
        invalid_rate = invalid_rate,
        image = ?image_path,
        "Configuration loaded"
    );

    let fixed = match image_path {
        Some(path) => {
            let bytes = std::fs::read(path).with_context(|| format!("Failed to read {path}"))?;
            let filename = std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "photo.jpg".to_string());
            Some((filename, bytes))
        }
        None => None,
    };

    let mut generator = PhotoGenerator::new();
    let mut rng = rand::thread_rng();
    let mut uploads = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let upload = if rng.gen_bool(invalid_rate.clamp(0.0, 1.0)) {
            generator.generate_invalid()
        } else if let Some((filename, bytes)) = &fixed {
            Upload {
                filename: filename.clone(),
                bytes: bytes.clone(),
            }
        } else {
            generator.generate_valid()?
        };
        uploads.push(upload);
    }

    let client = reqwest::Client::new();
    let started = Instant::now();

    let results: Vec<_> = futures::stream::iter(uploads)
        .map(|upload| {
            let client = &client;
            async move {
                let start = Instant::now();
                let result = send(client, url, upload).await;
                (start.elapsed(), result)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut summary = Summary::default();
    for (latency, result) in results {
        match result {
            Ok((status, body)) => {
                summary.latencies.push(latency);
                *summary.by_status.entry(status).or_insert(0) += 1;
                match body.data {
                    Some(data) => {
                        *summary.by_label.entry(data.result.clone()).or_insert(0) += 1;
                        if data.is_above_threshold {
                            summary.above_threshold += 1;
                        }
                        info!(
                            id = %data.id,
                            result = %data.result,
                            confidence = data.confidence_score,
                            url = %data.image_url,
                            latency_ms = latency.as_millis() as u64,
                            "Prediction"
                        );
                    }
                    None => info!(status, message = %body.message, "Rejected"),
                }
            }
            Err(e) => {
                summary.transport_errors += 1;
                warn!(error = %e, "Request failed");
            }
        }
    }

    summary.latencies.sort_unstable();
    let n = summary.latencies.len();
    let percentile = |p: f64| {
        summary
            .latencies
            .get(((n as f64 * p) as usize).min(n.saturating_sub(1)))
            .map(|d| d.as_millis())
            .unwrap_or(0)
    };

    info!(
        "Completed {} requests in {:.2}s ({} transport errors)",
        count,
        started.elapsed().as_secs_f64(),
        summary.transport_errors
    );
    info!(
        "Latency (ms): p50={} p95={} max={}",
        percentile(0.5),
        percentile(0.95),
        percentile(1.0)
    );
    info!("Status codes: {:?}", summary.by_status);
    info!(
        "Labels: {:?} ({} above threshold)",
        summary.by_label, summary.above_threshold
    );

    Ok(())
}
