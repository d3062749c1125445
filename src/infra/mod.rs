// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting file formats that more than one workflow needs:
//
//   checkpoint.rs — Reading pretrained weights
//                   Decodes .safetensors / .json checkpoint
//                   containers, digs out the state dict and
//                   loads it through a list of candidate key
//                   renamings until one fits.
//
//   export.rs     — Portable model export
//                   Traces a model once, then writes its weights
//                   as safetensors plus a JSON graph manifest.
//
//   metrics.rs    — Training metrics logging
//                   Writes epoch-level metrics (loss, accuracy)
//                   to a CSV file for later analysis.

/// Checkpoint decoding and flexible loading
pub mod checkpoint;

/// Safetensors + manifest exporter
pub mod export;

/// Training metrics CSV logger
pub mod metrics;
