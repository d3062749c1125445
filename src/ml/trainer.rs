// ============================================================
// Layer 5 — Fine-tune Loop
// ============================================================
// Manual loop over burn's DataLoader:
//
//   loader = DataLoaderBuilder(WindowBatcher)
//              .batch_size(batch_size)
//              .shuffle(seed)                 (new order each epoch)
//   for epoch in 1..=epochs
//     for batch in loader.iter()              (last may be short)
//       logits = wrapper(backbone, x)
//       loss   = CE(logits, y)
//       AdamW step over parameters that still require grad
//     report mean per-window loss and accuracy
//
// Frozen parameters (see NeuroGpt::freeze_backbone) produce no
// gradients, so the optimiser never touches them.
//
// Key Burn 0.20 notes:
//   - argmax(1) returns [batch, 1]; flatten before .equal()
//   - GradientsParams::from_grads pairs gradients with param ids
//   - dropout draws from the backend RNG; seed it (Backend::seed)
//     before building the model for repeatable runs

use anyhow::Result;
use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::batcher::WindowBatcher;
use crate::data::dataset::WindowDataset;
use crate::infra::metrics::EpochMetrics;
use crate::ml::backbone::NeuroGpt;
use crate::ml::wrapper::ClassificationWrapper;

/// AdamW weight decay, the common framework default.
pub const WEIGHT_DECAY: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainSettings {
    pub epochs:      usize,
    pub batch_size:  usize,
    pub lr:          f64,
    pub seed:        u64,
    pub num_classes: usize,
}

/// Train `model` on every window of `dataset`; `on_epoch` sees the
/// metrics of each finished epoch.
pub fn fine_tune<B: AutodiffBackend>(
    mut model: NeuroGpt<B>,
    dataset:   WindowDataset,
    settings:  &TrainSettings,
    device:    &B::Device,
    mut on_epoch: impl FnMut(&EpochMetrics) -> Result<()>,
) -> Result<NeuroGpt<B>> {
    let n = dataset.len();

    let wrapper = ClassificationWrapper::<B>::new(settings.num_classes, device);
    let ce      = CrossEntropyLossConfig::new().init(device);

    // ── AdamW optimiser ───────────────────────────────────────────────────────
    let mut optim = AdamWConfig::new().with_weight_decay(WEIGHT_DECAY).init();

    // ── Shuffled data loader ──────────────────────────────────────────────────
    let loader = DataLoaderBuilder::new(WindowBatcher)
        .batch_size(settings.batch_size)
        .shuffle(settings.seed)
        .set_device(device.clone())
        .build(dataset);

    tracing::info!(
        "Fine-tuning on {} windows: {} epochs, batch size {}, lr {}",
        n, settings.epochs, settings.batch_size, settings.lr,
    );

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 1..=settings.epochs {
        let mut loss_sum = 0.0f64;
        let mut correct  = 0usize;

        for batch in loader.iter() {
            let [batch_len] = batch.labels.dims();

            let output = wrapper.forward(&model, batch.signals)?;
            let loss   = ce.forward(output.values.clone(), batch.labels.clone());

            loss_sum += loss.clone().into_scalar().elem::<f64>() * batch_len as f64;

            let hits: i64 = output
                .values
                .argmax(1)
                .flatten::<1>(0, 1)
                .equal(batch.labels)
                .int()
                .sum()
                .into_scalar()
                .elem::<i64>();
            correct += hits as usize;

            // Backward pass + AdamW update
            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(settings.lr, model, grads);
        }

        let (loss, accuracy) = if n > 0 {
            (loss_sum / n as f64, correct as f64 / n as f64)
        } else {
            (f64::NAN, 0.0)
        };
        let metrics = EpochMetrics::new(epoch, loss, accuracy);

        println!("epoch {}/{} loss={:.4} acc={:.3}", epoch, settings.epochs, loss, accuracy);
        on_epoch(&metrics)?;
    }

    tracing::info!("Fine-tuning complete");
    Ok(model)
}
