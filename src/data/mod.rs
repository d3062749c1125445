// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Turns recorded EEG sessions into tensor minibatches.
//
//   training_data_*.csv
//       │
//       ▼
//   discover_logs       → glob, sorted
//       │
//       ▼
//   LabelMap::infer     → class id from the file name (or skip)
//       │
//       ▼
//   read_signal_log     → 16 × n_samples, µV → V
//       │
//       ▼
//   WindowExtractor     → fixed windows at a fixed stride
//       │
//       ▼
//   resample_linear     → every window becomes 16 × 250
//       │
//       ▼
//   WindowDataset       → implements burn's Dataset trait
//       │
//       ▼
//   DataLoader          → seeded shuffle, minibatches of windows
//       │
//       ▼
//   WindowBatcher       → [B, 16, 250] + [B] tensors

/// Reads CSV signal logs into channel-major arrays
pub mod loader;

/// Linear resampling to the canonical 250-sample window
pub mod resampler;

/// Sliding window extraction over one signal log
pub mod windower;

/// Labelled window collection + log discovery
pub mod dataset;

/// Stacks windows into tensor batches
pub mod batcher;
