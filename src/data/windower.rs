// ============================================================
// Layer 4 — Window Extractor
// ============================================================
// Slices one signal log into fixed-length, overlapping windows.
//
//   window = round(sample_rate × window_seconds)   samples
//   stride = round(sample_rate × stride_seconds)   samples
//
// Windows start at 0, stride, 2·stride, ... and stop at the last
// start where a FULL window fits:
//
//   count = floor((n_samples − window) / stride) + 1
//
// A log shorter than one window yields nothing. No partial
// windows are ever produced.
//
// Example: 1000 samples at 250 Hz, window 1.0 s, stride 0.5 s
//   window = 250, stride = 125
//   count  = floor(750 / 125) + 1 = 7
//
// Each raw window is resampled to CANONICAL_LEN samples, so a
// 500 Hz log produces the same window shape as a 250 Hz one.
//
// Windows are produced lazily; calling windows() again restarts
// from the first one.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::loader::{read_signal_log, SignalLog};
use crate::data::resampler::resample_linear;
use crate::domain::error::{ConfigError, DataError};
use crate::domain::traits::WindowSource;
use crate::domain::window::{LabelledWindow, CANONICAL_LEN, CANONICAL_RATE_HZ};

/// Timing parameters shared by every log in a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowingConfig {
    pub sample_rate:    f64,
    pub window_seconds: f64,
    pub stride_seconds: f64,
}

impl WindowingConfig {
    /// Window and stride in samples.
    ///
    /// Rounds half to even, so 62.5 samples becomes 62.
    pub fn in_samples(&self) -> Result<(usize, usize), ConfigError> {
        let window = (self.sample_rate * self.window_seconds).round_ties_even();
        let stride = (self.sample_rate * self.stride_seconds).round_ties_even();

        // NaN and infinities fail this check too.
        if !(window >= 1.0 && stride >= 1.0 && window.is_finite() && stride.is_finite()) {
            return Err(ConfigError::InvalidWindow {
                sample_rate:    self.sample_rate,
                window_seconds: self.window_seconds,
                stride_seconds: self.stride_seconds,
                window_samples: window as i64,
                stride_samples: stride as i64,
            });
        }
        Ok((window as usize, stride as usize))
    }
}

/// Labelled windows over one decoded log.
#[derive(Debug, Clone)]
pub struct WindowExtractor {
    log:         SignalLog,
    label:       usize,
    sample_rate: f64,
    window:      usize,
    stride:      usize,
}

impl WindowExtractor {
    pub fn new(log: SignalLog, label: usize, cfg: &WindowingConfig) -> Result<Self, ConfigError> {
        let (window, stride) = cfg.in_samples()?;
        Ok(Self {
            log,
            label,
            sample_rate: cfg.sample_rate,
            window,
            stride,
        })
    }

    /// Validate the timing, then read the log.
    pub fn open(path: &Path, label: usize, cfg: &WindowingConfig) -> Result<Self, DataError> {
        cfg.in_samples()?;
        let log = read_signal_log(path)?;
        Ok(Self::new(log, label, cfg)?)
    }
}

impl WindowSource for WindowExtractor {
    type Windows<'a> = Windows<'a>;

    fn windows(&self) -> Windows<'_> {
        Windows {
            extractor: self,
            next:      0,
        }
    }

    fn window_count(&self) -> usize {
        let n = self.log.sample_count();
        if n < self.window {
            0
        } else {
            (n - self.window) / self.stride + 1
        }
    }
}

/// One pass over an extractor's windows.
pub struct Windows<'a> {
    extractor: &'a WindowExtractor,
    next:      usize,
}

impl Iterator for Windows<'_> {
    type Item = LabelledWindow;

    fn next(&mut self) -> Option<LabelledWindow> {
        let ex    = self.extractor;
        let start = self.next;
        let end   = start + ex.window;
        if end > ex.log.sample_count() {
            return None;
        }
        self.next += ex.stride;

        let segment: Vec<Vec<f32>> = ex
            .log
            .channels
            .iter()
            .map(|ch| ch[start..end].to_vec())
            .collect();
        let rows = resample_linear(&segment, ex.sample_rate, CANONICAL_RATE_HZ, CANONICAL_LEN);

        Some(LabelledWindow::from_rows(rows, ex.label))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let ex = self.extractor;
        let n  = ex.log.sample_count();
        let remaining = if self.next + ex.window > n {
            0
        } else {
            (n - self.next - ex.window) / ex.stride + 1
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Windows<'_> {}
