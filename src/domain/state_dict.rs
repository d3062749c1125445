// ============================================================
// Layer 3 — Checkpoint Domain Types
// ============================================================
// Framework-free representations of learned weights:
//
//   TensorSnapshot  — shape + flat row-major f32 values
//   StateDict       — parameter name → TensorSnapshot
//   CheckpointNode  — whatever container a checkpoint file holds
//                     before the state dict is dug out of it
//   LoadReport      — what happened when weights were applied
//
// Checkpoints are read-only inputs: every key remapping makes a
// new StateDict and never touches the one it came from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A dense tensor copied out of (or into) a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TensorSnapshot {
    pub shape: Vec<usize>,
    pub data:  Vec<f32>,
}

impl TensorSnapshot {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    /// Number of values the shape calls for.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_consistent(&self) -> bool {
        self.numel() == self.data.len()
    }
}

/// Parameter name → tensor. Sorted by name so files and reports
/// come out the same on every run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDict {
    tensors: BTreeMap<String, TensorSnapshot>,
}

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, tensor: TensorSnapshot) {
        self.tensors.insert(key.into(), tensor);
    }

    pub fn get(&self, key: &str) -> Option<&TensorSnapshot> {
        self.tensors.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.tensors.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.tensors.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TensorSnapshot)> {
        self.tensors.iter()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Copy with every key passed through `f`. When two keys collide
    /// after renaming, the later one (in key order) wins.
    pub fn map_keys(&self, f: impl Fn(&str) -> String) -> Self {
        self.tensors
            .iter()
            .map(|(k, v)| (f(k), v.clone()))
            .collect()
    }
}

impl FromIterator<(String, TensorSnapshot)> for StateDict {
    fn from_iter<I: IntoIterator<Item = (String, TensorSnapshot)>>(iter: I) -> Self {
        Self { tensors: iter.into_iter().collect() }
    }
}

/// Raw checkpoint content before a state dict is extracted.
///
/// Decoded from JSON with `untagged`, so variant order matters:
/// an object with exactly `shape` and `data` is a tensor, any
/// other object is a mapping.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CheckpointNode {
    Tensor(TensorSnapshot),
    Map(BTreeMap<String, CheckpointNode>),
    List(Vec<CheckpointNode>),
    Scalar(serde_json::Value),
}

impl CheckpointNode {
    pub fn kind(&self) -> &'static str {
        match self {
            CheckpointNode::Tensor(_) => "tensor",
            CheckpointNode::Map(_)    => "mapping",
            CheckpointNode::List(_)   => "list",
            CheckpointNode::Scalar(_) => "scalar",
        }
    }
}

/// Outcome of applying a state dict to a model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// True when the exact (every key must match) load succeeded.
    pub strict:          bool,
    pub missing_keys:    Vec<String>,
    pub unexpected_keys: Vec<String>,
}

impl LoadReport {
    /// Key sets matched perfectly.
    pub fn is_clean(&self) -> bool {
        self.missing_keys.is_empty() && self.unexpected_keys.is_empty()
    }
}
