// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records fine-tune metrics to a CSV file after each epoch.
//
// Metrics recorded per epoch:
//   - epoch:    the epoch number (1, 2, 3, ...)
//   - loss:     mean per-window cross-entropy over the epoch
//   - accuracy: fraction of windows classified correctly
//
// Output file: <metrics dir>/metrics.csv
//
// Example CSV output:
//   epoch,loss,accuracy
//   1,1.098612,0.333333
//   2,1.041250,0.458333
//   ...
//
// Rows are appended, so repeated runs into the same directory
// keep one growing log; the header is only written once.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

/// One row of metrics for a single training epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch: usize,

    /// Mean cross-entropy per window; each batch contributes
    /// in proportion to its size
    pub loss: f64,

    /// Range: [0.0, 1.0]
    pub accuracy: f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, loss: f64, accuracy: f64) -> Self {
        Self { epoch, loss, accuracy }
    }
}

/// Appends epoch metrics to a CSV file.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create the directory if needed and write the CSV header
    /// if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");

        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("cannot create '{}'", csv_path.display()))?;
            writeln!(f, "epoch,loss,accuracy")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("cannot open '{}'", self.csv_path.display()))?;

        writeln!(f, "{},{:.6},{:.6}", m.epoch, m.loss, m.accuracy)?;

        tracing::debug!(
            "Logged epoch {} metrics: loss={:.4}, accuracy={:.4}",
            m.epoch,
            m.loss,
            m.accuracy,
        );

        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_written_once_and_rows_appended() {
        let dir = tempfile::tempdir().unwrap();

        let logger = MetricsLogger::new(dir.path().join("run")).unwrap();
        logger.log(&EpochMetrics::new(1, 1.25, 0.5)).unwrap();

        // A second logger on the same directory keeps the existing rows.
        let again = MetricsLogger::new(dir.path().join("run")).unwrap();
        again.log(&EpochMetrics::new(2, 1.0, 0.75)).unwrap();

        let text = fs::read_to_string(dir.path().join("run/metrics.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![
            "epoch,loss,accuracy",
            "1,1.250000,0.500000",
            "2,1.000000,0.750000",
        ]);
    }
}
