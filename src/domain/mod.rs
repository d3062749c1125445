// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs, enums and traits that define what the
// system works with:
//
//   - labelled EEG windows and their fixed shape
//   - the filename → class label map
//   - framework-free checkpoint containers and state dicts
//   - typed failures
//
// Rules for this layer:
//   - NO burn types
//   - NO file I/O
//   - Only plain data and the traits other layers implement

/// Typed failures for every layer
pub mod error;

/// Filename-substring → class id map
pub mod label_map;

/// Framework-free weights: snapshots, state dicts, containers
pub mod state_dict;

/// Core abstractions implemented by the data and ml layers
pub mod traits;

/// Fixed-shape labelled signal window
pub mod window;
