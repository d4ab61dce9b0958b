//! ResNet-50 body with a three-class skin type head.
//!
//! Parameter names follow torchvision's layout (`conv1`, `bn1`,
//! `layer{1..4}.{i}.conv{1..3}`, `layer{n}.0.downsample.{0,1}`) so checkpoints
//! exported from PyTorch load without renaming. The head is registered as
//! `fc.1` because it sits behind a dropout in a two-element sequential.

use candle_core::{ModuleT, Result, Tensor, D};
use candle_nn::{
    batch_norm, conv2d_no_bias, linear, BatchNorm, Conv2d, Conv2dConfig, Dropout, Linear,
    Module, VarBuilder,
};

/// Width of the pooled feature vector feeding the head
pub const FEATURE_DIM: usize = 2048;

/// Number of skin type classes
pub const NUM_CLASSES: usize = 3;

/// Variable path of the classification layer
pub const HEAD_PREFIX: &str = "fc.1";

const HEAD_DROPOUT: f32 = 0.5;
const BN_EPS: f64 = 1e-5;
const EXPANSION: usize = 4;

/// Blocks per stage for ResNet-50
pub const RESNET50_LAYERS: [usize; 4] = [3, 4, 6, 3];

fn conv(
    c_in: usize,
    c_out: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    vb: VarBuilder,
) -> Result<Conv2d> {
    let cfg = Conv2dConfig {
        stride,
        padding,
        ..Default::default()
    };
    conv2d_no_bias(c_in, c_out, kernel, cfg, vb)
}

struct Bottleneck {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
    conv3: Conv2d,
    bn3: BatchNorm,
    downsample: Option<(Conv2d, BatchNorm)>,
}

impl Bottleneck {
    fn new(c_in: usize, planes: usize, stride: usize, vb: VarBuilder) -> Result<Self> {
        let c_out = planes * EXPANSION;
        let downsample = if stride != 1 || c_in != c_out {
            Some((
                conv(c_in, c_out, 1, stride, 0, vb.pp("downsample.0"))?,
                batch_norm(c_out, BN_EPS, vb.pp("downsample.1"))?,
            ))
        } else {
            None
        };

        Ok(Self {
            conv1: conv(c_in, planes, 1, 1, 0, vb.pp("conv1"))?,
            bn1: batch_norm(planes, BN_EPS, vb.pp("bn1"))?,
            conv2: conv(planes, planes, 3, stride, 1, vb.pp("conv2"))?,
            bn2: batch_norm(planes, BN_EPS, vb.pp("bn2"))?,
            conv3: conv(planes, c_out, 1, 1, 0, vb.pp("conv3"))?,
            bn3: batch_norm(c_out, BN_EPS, vb.pp("bn3"))?,
            downsample,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let identity = match &self.downsample {
            Some((conv, bn)) => xs.apply(conv)?.apply_t(bn, false)?,
            None => xs.clone(),
        };

        let ys = xs
            .apply(&self.conv1)?
            .apply_t(&self.bn1, false)?
            .relu()?
            .apply(&self.conv2)?
            .apply_t(&self.bn2, false)?
            .relu()?
            .apply(&self.conv3)?
            .apply_t(&self.bn3, false)?;

        (ys + identity)?.relu()
    }
}

/// ResNet-50 classifier for skin type images
pub struct SkinTypeNetwork {
    conv1: Conv2d,
    bn1: BatchNorm,
    stages: Vec<Vec<Bottleneck>>,
    dropout: Dropout,
    head: Linear,
}

impl SkinTypeNetwork {
    /// Build the standard ResNet-50 topology
    pub fn new(vb: VarBuilder) -> Result<Self> {
        Self::with_layers(RESNET50_LAYERS, vb)
    }

    /// Build a bottleneck ResNet with the given blocks per stage
    pub fn with_layers(layers: [usize; 4], vb: VarBuilder) -> Result<Self> {
        let conv1 = conv(3, 64, 7, 2, 3, vb.pp("conv1"))?;
        let bn1 = batch_norm(64, BN_EPS, vb.pp("bn1"))?;

        let mut c_in = 64;
        let mut stages = Vec::with_capacity(4);
        for (i, &blocks) in layers.iter().enumerate() {
            let planes = 64 << i;
            let stride = if i == 0 { 1 } else { 2 };
            let stage_vb = vb.pp(format!("layer{}", i + 1));

            let mut stage = Vec::with_capacity(blocks);
            for b in 0..blocks {
                let block_stride = if b == 0 { stride } else { 1 };
                stage.push(Bottleneck::new(c_in, planes, block_stride, stage_vb.pp(b))?);
                c_in = planes * EXPANSION;
            }
            stages.push(stage);
        }

        let head = linear(FEATURE_DIM, NUM_CLASSES, vb.pp(HEAD_PREFIX))?;

        Ok(Self {
            conv1,
            bn1,
            stages,
            dropout: Dropout::new(HEAD_DROPOUT),
            head,
        })
    }

    /// Pooled `[batch, 2048]` features from the convolutional body
    pub fn features(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs
            .apply(&self.conv1)?
            .apply_t(&self.bn1, false)?
            .relu()?
            .pad_with_same(D::Minus1, 1, 1)?
            .pad_with_same(D::Minus2, 1, 1)?
            .max_pool2d_with_stride(3, 2)?;

        for stage in &self.stages {
            for block in stage {
                xs = block.forward(&xs)?;
            }
        }

        xs.mean(D::Minus1)?.mean(D::Minus1)
    }

    /// Raw `[batch, 3]` logits in inference mode
    pub fn logits(&self, xs: &Tensor) -> Result<Tensor> {
        let features = self.features(xs)?;
        self.head.forward(&self.dropout.forward_t(&features, false)?)
    }
}
