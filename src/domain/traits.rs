// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The seams between layers:
//
//   StateDictTarget — anything whose weights can be replaced from
//                     a StateDict (the burn backbone, test doubles).
//                     The flexible checkpoint loader only talks to
//                     this trait, so it never needs to know which
//                     model it is feeding.
//
//   WindowSource    — anything that yields labelled windows (one
//                     CSV log today). The dataset builder works on
//                     any number of sources.

use crate::domain::error::CheckpointError;
use crate::domain::state_dict::{LoadReport, StateDict};
use crate::domain::window::LabelledWindow;

// ─── StateDictTarget ──────────────────────────────────────────────────────────
/// A parameter container that can load named weights.
pub trait StateDictTarget {
    /// Apply `state` to the container's parameters in place.
    ///
    /// * `strict = true`  — every key must match in both directions,
    ///   otherwise `KeyMismatch` is returned and nothing is changed.
    /// * `strict = false` — matching keys are applied, the rest are
    ///   listed in the report; parameters without a key keep their
    ///   current values.
    ///
    /// A shape disagreement on a matching key is an error in both modes.
    fn load_state_dict(
        &mut self,
        state:  &StateDict,
        strict: bool,
    ) -> Result<LoadReport, CheckpointError>;
}

// ─── WindowSource ─────────────────────────────────────────────────────────────
/// Something that can produce labelled windows, any number of times.
pub trait WindowSource {
    type Windows<'a>: Iterator<Item = LabelledWindow>
    where
        Self: 'a;

    /// A fresh pass over the windows, starting from the first one.
    fn windows(&self) -> Self::Windows<'_>;

    /// Number of windows one pass yields.
    fn window_count(&self) -> usize;
}
