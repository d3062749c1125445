// ============================================================
// Layer 4 — Window Batcher
// ============================================================
// Stacks labelled windows into tensors for one training step.
//
//   Input:  N windows, each 16 × 250 channel-major f32
//   Output: signals [N, 16, 250] float, labels [N] int
//
// Every window already has the same shape, so batching is a
// flatten + reshape; no padding is involved.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::domain::window::{LabelledWindow, CANONICAL_LEN, CHANNELS};

/// A minibatch ready for the classification wrapper.
#[derive(Debug, Clone)]
pub struct WindowBatch<B: Backend> {
    /// [batch, 16, 250]
    pub signals: Tensor<B, 3>,
    /// [batch]
    pub labels:  Tensor<B, 1, Int>,
}

/// Stateless; the DataLoader hands it the target device per batch.
#[derive(Clone, Debug, Default)]
pub struct WindowBatcher;

// ─── Burn Batcher Trait Implementation ────────────────────────────────────────
impl<B: Backend> Batcher<B, LabelledWindow, WindowBatch<B>> for WindowBatcher {
    fn batch(&self, items: Vec<LabelledWindow>, device: &B::Device) -> WindowBatch<B> {
        let batch_size = items.len();

        let signal_flat: Vec<f32> = items
            .iter()
            .flat_map(|w| w.signal.iter().copied())
            .collect();
        let labels: Vec<i64> = items.iter().map(|w| w.label as i64).collect();

        let signals = Tensor::<B, 3>::from_data(
            TensorData::new(signal_flat, [batch_size, CHANNELS, CANONICAL_LEN]),
            device,
        );
        let labels = Tensor::<B, 1, Int>::from_data(
            TensorData::new(labels, [batch_size]),
            device,
        );

        WindowBatch { signals, labels }
    }
}
