//! Classifier weight loader with multi-source fallback

use crate::models::network::{SkinTypeNetwork, HEAD_PREFIX};
use crate::storage::GcsClient;
use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Where model weights live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// `gs://bucket/key`
    ObjectStore { bucket: String, key: String },
    /// `http://` or `https://` URL
    Http(String),
    /// Path on the local filesystem
    Local(PathBuf),
}

impl Locator {
    /// Classify a locator string by its prefix
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("gs://") {
            let (bucket, key) = rest
                .split_once('/')
                .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
                .ok_or_else(|| anyhow!("Invalid object store URI {raw:?}, expected gs://bucket/key"))?;
            return Ok(Locator::ObjectStore {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        if raw.starts_with("https://") || raw.starts_with("http://") {
            return Ok(Locator::Http(raw.to_string()));
        }
        if let Some((scheme, _)) = raw.split_once("://") {
            bail!("Unsupported model locator scheme {scheme:?}");
        }
        if raw.is_empty() {
            bail!("Model locator is empty");
        }
        Ok(Locator::Local(PathBuf::from(raw)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Locator::ObjectStore { .. } => "object_store",
            Locator::Http(_) => "http",
            Locator::Local(_) => "local",
        }
    }

    /// File extension of the referenced artifact, used to pick the weight format
    fn extension(&self) -> Option<String> {
        let name = match self {
            Locator::ObjectStore { key, .. } => key.as_str(),
            Locator::Http(url) => url.split(['?', '#']).next().unwrap_or(url),
            Locator::Local(path) => return path.extension().map(|e| e.to_string_lossy().into_owned()),
        };
        let file = name.rsplit('/').next()?;
        file.rsplit_once('.').map(|(_, ext)| ext.to_string())
    }
}

/// How the network's weights were obtained
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum WeightSource {
    /// Checkpoint applied; `skipped` keys were not part of the network
    Pretrained {
        locator: String,
        kind: &'static str,
        loaded: usize,
        skipped: usize,
    },
    /// Loading failed; the head was re-initialized
    Fallback { locator: String, reason: String },
}

impl WeightSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, WeightSource::Fallback { .. })
    }
}

/// Outcome of copying a checkpoint into the parameter map
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

/// Frozen network ready for inference
pub struct LoadedNetwork {
    pub network: SkinTypeNetwork,
    pub device: Device,
    pub source: WeightSource,
}

/// Resolves weight locators into a ready network
pub struct ModelLoader {
    device: Device,
    http: reqwest::Client,
    object_store: Option<Arc<GcsClient>>,
    fallback_seed: u64,
    temp_dir: Option<PathBuf>,
}

impl ModelLoader {
    /// Create a loader placing weights on `device`
    pub fn new(device: Device) -> Self {
        Self {
            device,
            http: reqwest::Client::new(),
            object_store: None,
            fallback_seed: 0,
            temp_dir: None,
        }
    }

    /// Enable `gs://` locators
    pub fn with_object_store(mut self, client: Arc<GcsClient>) -> Self {
        self.object_store = Some(client);
        self
    }

    pub fn with_fallback_seed(mut self, seed: u64) -> Self {
        self.fallback_seed = seed;
        self
    }

    /// Stage downloaded checkpoints in `dir` instead of the system temp dir
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Resolve `locator` into a frozen network.
    ///
    /// Artifact problems never fail this call: they are logged and the head is
    /// re-initialized instead. Only errors building the network itself (for
    /// example device allocation) are returned.
    pub async fn resolve(&self, locator: &str) -> Result<LoadedNetwork> {
        info!(locator = %locator, device = ?self.device, "Loading skin type model");

        let varmap = VarMap::new();
        SkinTypeNetwork::new(VarBuilder::from_varmap(&varmap, DType::F32, &self.device))
            .context("Failed to build network")?;

        let source = match self.load_from(locator, &varmap).await {
            Ok((kind, report)) => {
                if report.loaded == 0 {
                    warn!(locator = %locator, "Checkpoint contained no parameters of this network");
                }
                info!(
                    locator = %locator,
                    source = kind,
                    loaded = report.loaded,
                    skipped = report.skipped,
                    "Model weights loaded"
                );
                WeightSource::Pretrained {
                    locator: locator.to_string(),
                    kind,
                    loaded: report.loaded,
                    skipped: report.skipped,
                }
            }
            Err(e) => {
                warn!(
                    locator = %locator,
                    error = %format!("{e:#}"),
                    "Failed to load model weights. Initializing with random weights."
                );
                xavier_uniform_head(&varmap, self.fallback_seed, &self.device)
                    .context("Failed to initialize classification head")?;
                WeightSource::Fallback {
                    locator: locator.to_string(),
                    reason: format!("{e:#}"),
                }
            }
        };

        let network = freeze(&varmap, &self.device)?;
        Ok(LoadedNetwork {
            network,
            device: self.device.clone(),
            source,
        })
    }

    async fn load_from(&self, raw: &str, varmap: &VarMap) -> Result<(&'static str, LoadReport)> {
        let locator = Locator::parse(raw)?;
        let extension = locator.extension();

        let report = match &locator {
            Locator::Local(path) => load_weights(path, varmap, &self.device)?,
            Locator::ObjectStore { bucket, key } => {
                let client = self
                    .object_store
                    .as_ref()
                    .ok_or_else(|| anyhow!("No object store client configured for {raw}"))?;
                let bytes = client
                    .download(bucket, key)
                    .await
                    .with_context(|| format!("Failed to download gs://{bucket}/{key}"))?;

                let mut file = temp_file(self.temp_dir.as_deref(), extension.as_deref())?;
                file.write_all(&bytes)?;
                file.flush()?;
                load_weights(file.path(), varmap, &self.device)?
            }
            Locator::Http(url) => {
                let mut response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("Failed to fetch {url}"))?;
                let status = response.status();
                if !status.is_success() {
                    bail!("Failed to download model from {url}: HTTP {status}");
                }

                let mut file = temp_file(self.temp_dir.as_deref(), extension.as_deref())?;
                while let Some(chunk) = response.chunk().await? {
                    file.write_all(&chunk)?;
                }
                file.flush()?;
                load_weights(file.path(), varmap, &self.device)?
            }
        };

        Ok((locator.kind(), report))
    }
}

/// Temporary file removed when dropped, on every exit path
fn temp_file(dir: Option<&Path>, extension: Option<&str>) -> Result<NamedTempFile> {
    let suffix = extension.map(|e| format!(".{e}")).unwrap_or_default();
    let mut builder = tempfile::Builder::new();
    builder.prefix("skin-type-model-").suffix(&suffix);
    match dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .context("Failed to create temporary model file")
}

/// Read every tensor from a safetensors file or a PyTorch checkpoint
fn read_checkpoint(path: &Path, device: &Device) -> Result<Vec<(String, Tensor)>> {
    let is_safetensors = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("safetensors"));

    if is_safetensors {
        let tensors = candle_core::safetensors::load(path, device)
            .with_context(|| format!("Failed to read safetensors from {}", path.display()))?;
        Ok(tensors.into_iter().collect())
    } else {
        candle_core::pickle::read_all(path)
            .with_context(|| format!("Failed to read checkpoint from {}", path.display()))
    }
}

/// Copy the checkpoint at `path` into `varmap`.
///
/// Keys the network does not declare are skipped. Matching keys are copied
/// even if others mismatch; any shape mismatch is reported as an error once
/// all matching keys are in place.
pub fn load_weights(path: &Path, varmap: &VarMap, device: &Device) -> Result<LoadReport> {
    let tensors = read_checkpoint(path, device)?;
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| anyhow!("Parameter map lock poisoned"))?;

    let mut report = LoadReport::default();
    let mut mismatched = Vec::new();

    for (name, tensor) in tensors {
        let Some(var) = vars.get(&name) else {
            report.skipped += 1;
            continue;
        };
        if var.dims() != tensor.dims() {
            mismatched.push(format!(
                "{name}: checkpoint {:?}, network {:?}",
                tensor.dims(),
                var.dims()
            ));
            continue;
        }

        let tensor = tensor.to_dtype(var.dtype())?.to_device(device)?;
        var.set(&tensor)
            .with_context(|| format!("Failed to copy parameter {name}"))?;
        report.loaded += 1;
    }

    if !mismatched.is_empty() {
        bail!("Size mismatch for {}", mismatched.join("; "));
    }
    Ok(report)
}

/// Xavier-uniform weights and zero bias for the classification layer
pub fn xavier_uniform_head(varmap: &VarMap, seed: u64, device: &Device) -> Result<()> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| anyhow!("Parameter map lock poisoned"))?;
    let weight = vars
        .get(&format!("{HEAD_PREFIX}.weight"))
        .ok_or_else(|| anyhow!("Network has no {HEAD_PREFIX}.weight"))?;
    let bias = vars
        .get(&format!("{HEAD_PREFIX}.bias"))
        .ok_or_else(|| anyhow!("Network has no {HEAD_PREFIX}.bias"))?;

    let (fan_out, fan_in) = weight.dims2()?;
    let bound = (6.0 / (fan_in + fan_out) as f64).sqrt() as f32;
    let mut rng = StdRng::seed_from_u64(seed);
    let values: Vec<f32> = (0..fan_in * fan_out)
        .map(|_| rng.gen_range(-bound..=bound))
        .collect();

    weight.set(&Tensor::from_vec(values, (fan_out, fan_in), device)?)?;
    bias.set(&bias.zeros_like()?)?;
    Ok(())
}

/// Rebuild the network on detached copies of the parameters so inference
/// never records a gradient graph over them.
fn freeze(varmap: &VarMap, device: &Device) -> Result<SkinTypeNetwork> {
    let tensors: HashMap<String, Tensor> = varmap
        .data()
        .lock()
        .map_err(|_| anyhow!("Parameter map lock poisoned"))?
        .iter()
        .map(|(name, var)| (name.clone(), var.as_detached_tensor()))
        .collect();

    SkinTypeNetwork::new(VarBuilder::from_tensors(tensors, DType::F32, device))
        .context("Failed to build frozen network")
}

/// Pick the inference device: "auto", "cpu", "cuda"/"gpu" or "cuda:N"
pub fn select_device(spec: &str) -> Result<Device> {
    let spec = spec.trim().to_lowercase();
    match spec.as_str() {
        "auto" => Ok(Device::cuda_if_available(0)?),
        "cpu" => Ok(Device::Cpu),
        "cuda" | "gpu" => Device::new_cuda(0).context("Failed to create CUDA device 0"),
        s if s.starts_with("cuda:") => {
            let ordinal: usize = s["cuda:".len()..]
                .parse()
                .with_context(|| format!("Invalid CUDA device ordinal in {s:?}"))?;
            Device::new_cuda(ordinal)
                .with_context(|| format!("Failed to create CUDA device {ordinal}"))
        }
        other => bail!("Unknown device {other:?}, use 'auto', 'cpu', 'cuda' or 'cuda:N'"),
    }
}
