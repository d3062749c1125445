// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All burn model code lives here. The data layer only builds
// input tensors; everything that owns parameters is in this layer.
//
//   params.rs   — named parameter table ("encoder.temporal_conv.weight"
//                 → &mut Param), seeded initialisers, and the
//                 strict / lenient state dict loader built on it
//
//   layers.rs   — GPT block on burn's LayerNorm + MultiHeadAttention
//
//   backbone.rs — NeuroGpt: conv encoder → embedder → causal GPT
//                 decoder → unembedder / decoding head
//
//   wrapper.rs  — ClassificationWrapper: adapts (B,16,250) windows
//                 to the backbone's (B,1,22,500) contract
//
//   trainer.rs  — AdamW + cross-entropy fine-tune loop
//
// Backends:
//   default       NdArray<f32>  (CPU)
//   --features wgpu  Wgpu       (GPU when --device cuda)

use serde::{Deserialize, Serialize};

/// Named parameter table and seeded initialisation
pub mod params;

/// Transformer building blocks
pub mod layers;

/// Pretrained EEG backbone
pub mod backbone;

/// Classification wrapper around the backbone
pub mod wrapper;

/// Fine-tune loop
pub mod trainer;

#[cfg(not(feature = "wgpu"))]
pub type InferenceBackend = burn::backend::NdArray<f32>;
#[cfg(feature = "wgpu")]
pub type InferenceBackend = burn::backend::Wgpu;

pub type TrainBackend = burn::backend::Autodiff<InferenceBackend>;

pub type Device = <InferenceBackend as burn::tensor::backend::Backend>::Device;

/// Requested execution device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    Cpu,
    Cuda,
}

impl DeviceChoice {
    pub fn from_flag(flag: &str) -> Self {
        if flag.eq_ignore_ascii_case("cuda") {
            DeviceChoice::Cuda
        } else {
            DeviceChoice::Cpu
        }
    }
}

/// Map a device choice onto the compiled-in backend.
pub fn resolve_device(choice: DeviceChoice) -> Device {
    match choice {
        DeviceChoice::Cpu  => cpu_device(),
        DeviceChoice::Cuda => gpu_device(),
    }
}

#[cfg(not(feature = "wgpu"))]
fn cpu_device() -> Device {
    burn::backend::ndarray::NdArrayDevice::Cpu
}

#[cfg(not(feature = "wgpu"))]
fn gpu_device() -> Device {
    tracing::warn!("cuda requested but this build has no GPU backend (enable the `wgpu` feature); using cpu");
    burn::backend::ndarray::NdArrayDevice::Cpu
}

#[cfg(feature = "wgpu")]
fn cpu_device() -> Device {
    burn::backend::wgpu::WgpuDevice::Cpu
}

#[cfg(feature = "wgpu")]
fn gpu_device() -> Device {
    burn::backend::wgpu::WgpuDevice::DiscreteGpu(0)
}

/// Serialises tests that draw from the backend's global RNG
/// (dropout, export dummy inputs), so seeded runs stay repeatable.
#[cfg(test)]
pub(crate) fn backend_rng_guard() -> std::sync::MutexGuard<'static, ()> {
    static BACKEND_RNG: std::sync::Mutex<()> = std::sync::Mutex::new(());
    BACKEND_RNG.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
