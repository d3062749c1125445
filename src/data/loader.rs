// ============================================================
// Layer 4 — Signal Log Loader
// ============================================================
// Reads one recorded EEG session from CSV.
//
// File layout (one header row, then one row per sample):
//
//   Timestamp, Ch0, Ch1, ..., Ch15[, anything else]
//   0.000,     12.5, -3.1, ..., 8.0
//
// Column 0 is ignored. The next 16 columns are channel values in
// microvolts; they are scaled by 1e-6 into volts on the way in.
// Extra trailing columns are ignored, missing ones are an error.
//
// The result is channel-major (16 rows × n_samples) because every
// downstream step (windowing, resampling) walks one channel at a
// time.

use std::path::Path;

use crate::domain::error::DataError;
use crate::domain::window::{CHANNELS, MICROVOLT_TO_VOLT};

/// A decoded signal log.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalLog {
    /// `channels[c][t]` in volts.
    pub channels: Vec<Vec<f32>>,
}

impl SignalLog {
    pub fn sample_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }
}

/// Read and scale one CSV log.
pub fn read_signal_log(path: &Path) -> Result<SignalLog, DataError> {
    let csv_err = |source: csv::Error| DataError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;

    // A header that is too narrow means no row can be valid either,
    // so fail here even when the log has no data rows.
    let header_width = reader.headers().map_err(csv_err)?.len();
    check_width(path, 0, header_width)?;

    let mut channels: Vec<Vec<f32>> = vec![Vec::new(); CHANNELS];

    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(csv_err)?;
        let row    = i + 1;
        check_width(path, row, record.len())?;

        for (c, channel) in channels.iter_mut().enumerate() {
            let column = c + 1;
            let raw    = record.get(column).unwrap_or("").trim();
            let value  = raw.parse::<f32>().map_err(|_| DataError::NotNumeric {
                path:  path.to_path_buf(),
                row,
                column,
                value: raw.to_string(),
            })?;
            channel.push(value * MICROVOLT_TO_VOLT);
        }
    }

    tracing::debug!(
        "Read {} samples × {} channels from '{}'",
        channels[0].len(),
        CHANNELS,
        path.display()
    );

    Ok(SignalLog { channels })
}

/// The timestamp column plus exactly 16 channel columns must exist.
fn check_width(path: &Path, row: usize, width: usize) -> Result<(), DataError> {
    let found = width.saturating_sub(1).min(CHANNELS);
    if found != CHANNELS {
        return Err(DataError::ChannelCount {
            path: path.to_path_buf(),
            row,
            found,
        });
    }
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;
    use std::fs;

    fn header(extra: &str) -> String {
        let mut h = String::from("Timestamp");
        for c in 0..CHANNELS {
            write!(h, ",Ch{c}").unwrap();
        }
        h.push_str(extra);
        h
    }

    #[test]
    fn test_skips_timestamp_and_scales_to_volts() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("left_01.csv");
        let mut text = header(",Marker");
        text.push('\n');
        for t in 0..3 {
            let values: Vec<String> = (0..CHANNELS).map(|c| format!("{}", (c * 10 + t) as f32)).collect();
            writeln!(text, "{}.0,{},99", t, values.join(",")).unwrap();
        }
        fs::write(&path, text).unwrap();

        let log = read_signal_log(&path).unwrap();
        assert_eq!(log.channels.len(), CHANNELS);
        assert_eq!(log.sample_count(), 3);
        // channel 2, sample 1 was 21 µV
        assert!((log.channels[2][1] - 21.0e-6).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_narrow_logs() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("narrow.csv");
        fs::write(&path, "Timestamp,Ch0,Ch1\n0.0,1,2\n").unwrap();

        let err = read_signal_log(&path).unwrap_err();
        assert!(matches!(err, DataError::ChannelCount { found: 2, .. }));
    }

    #[test]
    fn test_rejects_non_numeric_values() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        let mut text = header("");
        text.push('\n');
        let mut row = vec!["0.0".to_string()];
        row.extend((0..CHANNELS).map(|_| "1".to_string()));
        row[5] = "oops".to_string();
        writeln!(text, "{}", row.join(",")).unwrap();
        fs::write(&path, text).unwrap();

        let err = read_signal_log(&path).unwrap_err();
        assert!(matches!(err, DataError::NotNumeric { row: 1, column: 5, .. }));
    }

    #[test]
    fn test_header_only_log_has_no_samples() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        fs::write(&path, header("") + "\n").unwrap();

        let log = read_signal_log(&path).unwrap();
        assert_eq!(log.sample_count(), 0);
    }
}
