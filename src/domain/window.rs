// ============================================================
// Layer 3 — Labelled Window Domain Type
// ============================================================
// One fixed-shape training example:
//   16 channels × 250 timesteps of float32 signal + a class id.
//
// The shape is an invariant, not a configuration: whatever the
// source sample rate, the window extractor resamples to the
// canonical length before a LabelledWindow is created.

use serde::{Deserialize, Serialize};

/// EEG channels in every signal log (Cyton + Daisy board).
pub const CHANNELS: usize = 16;

/// Timesteps per window after resampling.
pub const CANONICAL_LEN: usize = 250;

/// Sample rate the canonical length corresponds to.
pub const CANONICAL_RATE_HZ: f64 = 250.0;

/// Source logs are in microvolts, the backbone expects volts.
pub const MICROVOLT_TO_VOLT: f32 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledWindow {
    /// Channel-major samples: `signal[c * CANONICAL_LEN + t]`.
    pub signal: Vec<f32>,
    pub label:  usize,
}

impl LabelledWindow {
    /// Flatten channel rows into a window. Rows must already be
    /// CHANNELS × CANONICAL_LEN.
    pub fn from_rows(rows: Vec<Vec<f32>>, label: usize) -> Self {
        debug_assert_eq!(rows.len(), CHANNELS);
        debug_assert!(rows.iter().all(|r| r.len() == CANONICAL_LEN));
        let signal = rows.into_iter().flatten().collect();
        Self { signal, label }
    }

    pub fn channel(&self, c: usize) -> &[f32] {
        &self.signal[c * CANONICAL_LEN..(c + 1) * CANONICAL_LEN]
    }
}
