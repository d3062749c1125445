// ============================================================
// Layer 3 — Typed Failures
// ============================================================
// Every unrecoverable condition the tools can detect has a
// named variant here. The application layer wraps these in
// anyhow with file/step context; main() turns them into a
// non-zero exit.
//
//   ConfigError      — bad flags, label maps, shapes, classes
//   DataError        — signal logs that cannot become windows
//   CheckpointError  — weights that cannot be read or applied
//   WrapperError     — tensors that violate the classifier contract
//
// Degraded-but-continuable situations (key mismatches solved
// by prefix stripping, unexpected class sets) are NOT errors;
// they are logged with tracing::warn! where they happen.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("label map is empty")]
    EmptyLabelMap,

    #[error("label map entry '{entry}' is not of the form name=class")]
    MalformedLabelEntry { entry: String },

    #[error("label map entry '{entry}' has an invalid class id: {reason}")]
    InvalidClassId { entry: String, reason: String },

    #[error(
        "invalid window/stride: window={window_seconds}s stride={stride_seconds}s at \
         {sample_rate} Hz gives window={window_samples} and stride={stride_samples} samples"
    )]
    InvalidWindow {
        sample_rate:    f64,
        window_seconds: f64,
        stride_seconds: f64,
        window_samples: i64,
        stride_samples: i64,
    },

    #[error("input shape '{raw}' must be three positive integers B,C,T")]
    InvalidInputShape { raw: String },

    #[error("unknown model class '{name}' (known: {known})")]
    UnknownModelClass { name: String, known: String },

    #[error("{name} must be greater than zero (got {value})")]
    NotPositive { name: &'static str, value: String },

    #[error("model class {class} expects input (B,{channels},{samples}), got {found:?}")]
    InputShapeMismatch {
        class:    String,
        channels: usize,
        samples:  usize,
        found:    [usize; 3],
    },

    #[error("invalid backbone architecture: {reason}")]
    InvalidArchitecture { reason: String },

    #[error("model definition not found: {path}")]
    ModelDefNotFound { path: PathBuf },
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("csv error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("expected 16 channels, got {found} in {path} (row {row})")]
    ChannelCount { path: PathBuf, row: usize, found: usize },

    #[error("non-numeric value '{value}' in {path} (row {row}, column {column})")]
    NotNumeric {
        path:   PathBuf,
        row:    usize,
        column: usize,
        value:  String,
    },

    #[error("invalid data glob '{pattern}': {reason}")]
    InvalidGlob { pattern: String, reason: String },

    #[error("no CSV files matched: {pattern}")]
    NoFilesMatched { pattern: String },

    #[error("no labeled windows found; check --label-map and --data-glob")]
    EmptyDataset,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("weights not found: {path}")]
    NotFound { path: PathBuf },

    #[error("cannot read checkpoint {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("unsupported checkpoint file {path} (expected .safetensors, .pt, .pth, .bin or .json)")]
    UnsupportedFile { path: PathBuf },

    #[error("unrecognized checkpoint format: {found}")]
    UnrecognizedFormat { found: String },

    #[error("checkpoint entry '{key}' is not a tensor ({found})")]
    NotATensor { key: String, found: String },

    #[error("tensor '{key}' declares shape {shape:?} but holds {len} values")]
    MalformedTensor { key: String, shape: Vec<usize>, len: usize },

    #[error("unsupported tensor dtype {dtype} for '{key}'")]
    UnsupportedDtype { key: String, dtype: String },

    #[error(
        "strict load failed: {} missing and {} unexpected keys",
        .missing.len(),
        .unexpected.len()
    )]
    KeyMismatch {
        missing:    Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("size mismatch for '{key}': checkpoint has {found:?}, model expects {expected:?}")]
    ShapeMismatch {
        key:      String,
        expected: Vec<usize>,
        found:    Vec<usize>,
    },
}

#[derive(Debug, Error)]
pub enum WrapperError {
    #[error("expected a 3-dimensional (B,16,250) input, got {rank} dimensions {dims:?}")]
    InputRank { rank: usize, dims: Vec<usize> },

    #[error("expected 16 channels, got {found}")]
    ChannelCount { found: usize },

    #[error("expected 250 timesteps, got {found}")]
    SampleCount { found: usize },

    #[error("unexpected backbone output shape (keys: {keys:?})")]
    UnexpectedOutput { keys: Vec<String> },
}
