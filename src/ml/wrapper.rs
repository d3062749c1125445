// ============================================================
// Layer 5 — Classification Wrapper
// ============================================================
// The deployed input contract is a raw window (B, 16, 250).
// The backbone wants (B, chunks, 22, 500) plus an attention mask.
// The wrapper bridges the two:
//
//   x (B,16,250)
//     │  per-window, per-channel z-score
//     │    (x − mean_t) / (std_t + 1e-6)       std is unbiased
//     ▼
//   pad channels with zeros       (B,22,250)
//     ▼
//   linear upsample in time       (B,22,500)   edge-aligned
//     ▼
//   add chunk dim, mask of ones   (B,1,22,500), (B,1)
//     ▼
//   backbone
//     ├─ DecodingLogits → returned as-is            (B, classes)
//     ├─ Outputs        → last timestep + WARNING    (B, features)
//     └─ Unexpected     → WrapperError::UnexpectedOutput
//
// The upsampling is a fixed linear map, so it is precomputed once
// as a [250, 500] matrix and applied with one matmul.

use burn::{prelude::*, tensor::TensorData};

use crate::domain::error::WrapperError;
use crate::domain::window::{CANONICAL_LEN, CHANNELS};
use crate::ml::backbone::{Backbone, BackboneBatch, BackboneOutput};

pub const BACKBONE_CHANNELS: usize = 22;
pub const BACKBONE_SAMPLES:  usize = 500;
const NORM_EPS: f64 = 1e-6;

/// Result of one wrapper forward pass.
#[derive(Debug, Clone)]
pub struct WrapperOutput<B: Backend> {
    pub values: Tensor<B, 2>,
    /// True when the backbone had no decoding head and `values`
    /// are last-timestep sequence features, not class scores.
    pub pooled_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct ClassificationWrapper<B: Backend> {
    upsample:    Tensor<B, 2>,
    num_classes: usize,
}

impl<B: Backend> ClassificationWrapper<B> {
    pub fn new(num_classes: usize, device: &B::Device) -> Self {
        let weights = linear_resize_matrix(CANONICAL_LEN, BACKBONE_SAMPLES);
        Self {
            upsample: Tensor::from_data(
                TensorData::new(weights, [CANONICAL_LEN, BACKBONE_SAMPLES]),
                device,
            ),
            num_classes,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// The [250, 500] time-upsampling matrix.
    pub fn upsample_matrix(&self) -> Tensor<B, 2> {
        self.upsample.clone()
    }

    /// (B,16,250) → (B,22,500), everything before the backbone call.
    pub fn prepare(&self, x: Tensor<B, 3>) -> Result<Tensor<B, 3>, WrapperError> {
        let dims = x.dims();
        check_input_dims(&dims)?;
        let [b, c, t] = dims;

        let x = standardize(x);

        let device = x.device();
        let x = Tensor::cat(
            vec![x, Tensor::zeros([b, BACKBONE_CHANNELS - c, t], &device)],
            1,
        );

        Ok(x
            .reshape([b * BACKBONE_CHANNELS, t])
            .matmul(self.upsample.clone())
            .reshape([b, BACKBONE_CHANNELS, BACKBONE_SAMPLES]))
    }

    pub fn forward<M: Backbone<B>>(
        &self,
        backbone: &M,
        x:        Tensor<B, 3>,
    ) -> Result<WrapperOutput<B>, WrapperError> {
        let x = self.prepare(x)?;

        match backbone.forward_batch(BackboneBatch::single_chunk(x)) {
            BackboneOutput::DecodingLogits(values) => Ok(WrapperOutput {
                values,
                pooled_fallback: false,
            }),
            BackboneOutput::Outputs(outputs) => {
                tracing::warn!(
                    "backbone returned sequence outputs instead of decoding logits; \
                     returning last-timestep features (is decoding mode on?)"
                );
                let [b, t, f] = outputs.dims();
                let pooled = outputs.slice([0..b, t - 1..t, 0..f]).reshape([b, f]);
                Ok(WrapperOutput { values: pooled, pooled_fallback: true })
            }
            BackboneOutput::Unexpected(keys) => Err(WrapperError::UnexpectedOutput { keys }),
        }
    }
}

/// Shape check for a (B, 16, 250) input.
pub fn check_input_dims(dims: &[usize]) -> Result<(), WrapperError> {
    if dims.len() != 3 {
        return Err(WrapperError::InputRank { rank: dims.len(), dims: dims.to_vec() });
    }
    if dims[1] != CHANNELS {
        return Err(WrapperError::ChannelCount { found: dims[1] });
    }
    if dims[2] != CANONICAL_LEN {
        return Err(WrapperError::SampleCount { found: dims[2] });
    }
    Ok(())
}

/// Per-example, per-channel z-score over time.
fn standardize<B: Backend>(x: Tensor<B, 3>) -> Tensor<B, 3> {
    let mean     = x.clone().mean_dim(2);
    let centered = x - mean;
    let std      = centered.clone().var(2).sqrt();
    centered / std.add_scalar(NORM_EPS)
}

/// Row-major [src_len, dst_len] matrix M such that `row · M` is
/// the linear resize of `row` to `dst_len` samples, sampling at
/// pixel centres (no endpoint alignment):
///
///   src = (dst + 0.5) · src_len / dst_len − 0.5, clamped at 0
pub fn linear_resize_matrix(src_len: usize, dst_len: usize) -> Vec<f32> {
    let mut m = vec![0.0f32; src_len * dst_len];
    let scale = src_len as f64 / dst_len as f64;

    for j in 0..dst_len {
        let src  = ((j as f64 + 0.5) * scale - 0.5).max(0.0);
        let i0   = (src.floor() as usize).min(src_len - 1);
        let i1   = (i0 + 1).min(src_len - 1);
        let frac = (src - i0 as f64) as f32;

        m[i0 * dst_len + j] += 1.0 - frac;
        m[i1 * dst_len + j] += frac;
    }
    m
}
