// ============================================================
// Layer 4 — Window Dataset
// ============================================================
// Collects the labelled windows of every matching signal log.
//
//   discover_logs       glob → sorted paths (none is an error)
//   open_labelled_logs  label from the file name, else skip
//   WindowDataset       every window of every source, file order
//
// WindowDataset implements burn's Dataset trait, so the training
// DataLoader shuffles and batches it directly.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;

use crate::data::windower::{WindowExtractor, WindowingConfig};
use crate::domain::error::DataError;
use crate::domain::label_map::LabelMap;
use crate::domain::traits::WindowSource;
use crate::domain::window::LabelledWindow;

/// Every labelled window of a training run, in file order.
pub struct WindowDataset {
    windows: Vec<LabelledWindow>,
}

impl WindowDataset {
    pub fn new(windows: Vec<LabelledWindow>) -> Self { Self { windows } }

    /// Drain every source once, in order.
    pub fn from_sources<S: WindowSource>(sources: &[S]) -> Self {
        let windows = sources.iter().flat_map(|s| s.windows()).collect();
        Self { windows }
    }

    pub fn distinct_labels(&self) -> BTreeSet<usize> {
        self.windows.iter().map(|w| w.label).collect()
    }

    pub fn max_label(&self) -> Option<usize> {
        self.windows.iter().map(|w| w.label).max()
    }
}

impl Dataset<LabelledWindow> for WindowDataset {
    fn get(&self, index: usize) -> Option<LabelledWindow> {
        self.windows.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.windows.len()
    }
}

/// Sorted paths matching `pattern`.
pub fn discover_logs(pattern: &str) -> Result<Vec<PathBuf>, DataError> {
    let paths = glob::glob(pattern).map_err(|e| DataError::InvalidGlob {
        pattern: pattern.to_string(),
        reason:  e.to_string(),
    })?;

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) => files.push(path),
            Err(e)   => tracing::warn!("Skipping unreadable glob entry: {}", e),
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(DataError::NoFilesMatched { pattern: pattern.to_string() });
    }
    Ok(files)
}

/// Open an extractor for every file the label map recognises.
/// Files without a matching label are skipped.
pub fn open_labelled_logs(
    files:  &[PathBuf],
    labels: &LabelMap,
    cfg:    &WindowingConfig,
) -> Result<Vec<WindowExtractor>, DataError> {
    let mut extractors = Vec::new();
    for path in files {
        let Some(label) = labels.infer(path) else {
            tracing::debug!("No label for '{}', skipping", path.display());
            continue;
        };
        let ex = WindowExtractor::open(path, label, cfg)?;
        tracing::info!(
            "{} → class {} ({} windows)",
            display_name(path),
            label,
            ex.window_count()
        );
        extractors.push(ex);
    }
    Ok(extractors)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
