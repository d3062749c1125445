// ============================================================
// Layer 6 — Checkpoint Reader + Flexible Loader
// ============================================================
// Reads pretrained weights from disk and applies them to any
// StateDictTarget, tolerating the usual naming differences.
//
// Supported files:
//   *.safetensors  flat name → tensor table; float, integer and bool
//                  dtypes are all read as f32
//   *.pt/.pth/.bin PyTorch pickle (read with burn-store); keys under a
//                  wrapper key such as `state_dict.` are nested again
//   *.json         nested container:
//                    {"model_state_dict": {"w": {"shape": [..], "data": [..]}}, "epoch": 3}
//
// Extraction:
//   mapping with a `state_dict` / `model_state_dict` / `model` / `net`
//   entry that is itself a mapping → that entry
//   any other mapping                → the mapping itself
//   list / tensor / scalar root      → UnrecognizedFormat
//
// Candidate key sets, tried in this order:
//   1. unchanged
//   2. every structural prefix stripped (module. model. net.
//      backbone. encoder. neurogpt., left to right, once each)
//   3. only the data-parallel prefix `module.` stripped
//
// For each candidate: strict load; on a key mismatch, lenient load.
// Accept the first strict success or a lenient load with no
// missing and no unexpected keys. If nothing is accepted, the
// last candidate's lenient report is returned. Missing
// parameters keep their initial values.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use burn_store::pytorch::PytorchReader;
use safetensors::{Dtype, SafeTensors};

use crate::domain::error::CheckpointError;
use crate::domain::state_dict::{CheckpointNode, LoadReport, StateDict, TensorSnapshot};
use crate::domain::traits::StateDictTarget;

/// Container keys a state dict is commonly nested under.
pub const WRAPPER_KEYS: [&str; 4] = ["state_dict", "model_state_dict", "model", "net"];

/// Structural prefixes left behind by training wrappers and module nesting.
pub const STRUCTURAL_PREFIXES: [&str; 6] =
    ["module.", "model.", "net.", "backbone.", "encoder.", "neurogpt."];

/// Prefix added by data-parallel training wrappers.
pub const DATA_PARALLEL_PREFIX: &str = "module.";

/// How many key names a load warning lists.
const KEYS_SHOWN: usize = 50;

// ─── Reading ──────────────────────────────────────────────────────────────────
/// Decode a checkpoint file into its raw container.
pub fn read_checkpoint(path: &Path) -> Result<CheckpointNode, CheckpointError> {
    if !path.exists() {
        return Err(CheckpointError::NotFound { path: absolute(path) });
    }
    let unreadable = |reason: String| CheckpointError::Unreadable {
        path: path.to_path_buf(),
        reason,
    };

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "safetensors" => {
            let bytes = fs::read(path).map_err(|e| unreadable(e.to_string()))?;
            let tensors = SafeTensors::deserialize(&bytes).map_err(|e| unreadable(e.to_string()))?;
            decode_safetensors(&tensors).map(CheckpointNode::Map)
        }
        "pt" | "pth" | "bin" => {
            let reader = PytorchReader::new(path).map_err(|e| unreadable(format!("{e:?}")))?;
            decode_pickle(&reader).map_err(unreadable).map(CheckpointNode::Map)
        }
        "json" => {
            let bytes = fs::read(path).map_err(|e| unreadable(e.to_string()))?;
            serde_json::from_slice(&bytes).map_err(|e| unreadable(e.to_string()))
        }
        _ => Err(CheckpointError::UnsupportedFile { path: path.to_path_buf() }),
    }
}

fn decode_safetensors(
    tensors: &SafeTensors<'_>,
) -> Result<BTreeMap<String, CheckpointNode>, CheckpointError> {
    let mut map = BTreeMap::new();

    for (name, tensor) in tensors.tensors() {
        let shape: Vec<usize> = tensor.shape().to_vec();
        let data = tensor.data();

        let values: Vec<f32> = match tensor.dtype() {
            Dtype::F32  => decode_le(data, f32::from_le_bytes),
            Dtype::F64  => decode_le(data, |b| f64::from_le_bytes(b) as f32),
            Dtype::F16  => decode_le(data, |b| half::f16::from_le_bytes(b).to_f32()),
            Dtype::BF16 => decode_le(data, |b| half::bf16::from_le_bytes(b).to_f32()),
            Dtype::I64  => decode_le(data, |b| i64::from_le_bytes(b) as f32),
            Dtype::I32  => decode_le(data, |b| i32::from_le_bytes(b) as f32),
            Dtype::I16  => decode_le(data, |b| i16::from_le_bytes(b) as f32),
            Dtype::I8   => decode_le(data, |b| i8::from_le_bytes(b) as f32),
            Dtype::U64  => decode_le(data, |b| u64::from_le_bytes(b) as f32),
            Dtype::U32  => decode_le(data, |b| u32::from_le_bytes(b) as f32),
            Dtype::U16  => decode_le(data, |b| u16::from_le_bytes(b) as f32),
            Dtype::U8   => data.iter().map(|&b| b as f32).collect(),
            Dtype::BOOL => data.iter().map(|&b| if b != 0 { 1.0 } else { 0.0 }).collect(),
            other => {
                return Err(CheckpointError::UnsupportedDtype {
                    key:   name,
                    dtype: format!("{other:?}"),
                })
            }
        };

        map.insert(name, CheckpointNode::Tensor(TensorSnapshot::new(shape, values)));
    }
    Ok(map)
}

/// Little-endian `N`-byte elements converted to f32.
fn decode_le<const N: usize>(data: &[u8], to_f32: impl Fn([u8; N]) -> f32) -> Vec<f32> {
    data.chunks_exact(N)
        .map(|chunk| {
            let mut raw = [0u8; N];
            raw.copy_from_slice(chunk);
            to_f32(raw)
        })
        .collect()
}

fn decode_pickle(reader: &PytorchReader) -> Result<BTreeMap<String, CheckpointNode>, String> {
    let mut map: BTreeMap<String, CheckpointNode> = BTreeMap::new();

    for name in reader.keys() {
        let name = name.to_string();
        let Some(snapshot) = reader.get(&name) else { continue };
        let data = snapshot.to_data().map_err(|e| format!("tensor '{name}': {e:?}"))?;
        let tensor = CheckpointNode::Tensor(TensorSnapshot::new(
            data.shape.to_vec(),
            data.iter::<f32>().collect(),
        ));

        let wrapped = WRAPPER_KEYS
            .iter()
            .find_map(|w| name.strip_prefix(w).and_then(|r| r.strip_prefix('.')).map(|r| (*w, r)));
        match wrapped {
            Some((wrapper, rest)) => {
                let entry = map
                    .entry(wrapper.to_string())
                    .or_insert_with(|| CheckpointNode::Map(BTreeMap::new()));
                if let CheckpointNode::Map(inner) = entry {
                    inner.insert(rest.to_string(), tensor);
                }
            }
            None => {
                map.insert(name, tensor);
            }
        }
    }
    Ok(map)
}

// ─── Extraction ───────────────────────────────────────────────────────────────
/// Dig the parameter table out of a checkpoint container.
pub fn extract_state_dict(node: CheckpointNode) -> Result<StateDict, CheckpointError> {
    let mut map = match node {
        CheckpointNode::Map(map) => map,
        other => {
            return Err(CheckpointError::UnrecognizedFormat { found: other.kind().to_string() })
        }
    };

    for key in WRAPPER_KEYS {
        if matches!(map.get(key), Some(CheckpointNode::Map(_))) {
            if let Some(CheckpointNode::Map(inner)) = map.remove(key) {
                map = inner;
            }
            break;
        }
    }

    let mut state = StateDict::new();
    for (key, value) in map {
        match value {
            CheckpointNode::Tensor(t) if t.is_consistent() => state.insert(key, t),
            CheckpointNode::Tensor(t) => {
                return Err(CheckpointError::MalformedTensor {
                    key,
                    shape: t.shape.clone(),
                    len:   t.data.len(),
                })
            }
            other => {
                return Err(CheckpointError::NotATensor { key, found: other.kind().to_string() })
            }
        }
    }
    Ok(state)
}

// ─── Key remapping ────────────────────────────────────────────────────────────
/// Strip each prefix, in order, at most once, when the key
/// currently starts with it.
pub fn strip_key(key: &str, prefixes: &[&str]) -> String {
    let mut k = key;
    for p in prefixes {
        if let Some(rest) = k.strip_prefix(p) {
            k = rest;
        }
    }
    k.to_string()
}

pub fn strip_prefixes(state: &StateDict, prefixes: &[&str]) -> StateDict {
    state.map_keys(|k| strip_key(k, prefixes))
}

/// One way of renaming checkpoint keys before loading.
pub struct Candidate {
    pub name:      &'static str,
    pub transform: fn(&StateDict) -> StateDict,
}

/// The renamings tried, in order.
pub fn candidates() -> [Candidate; 3] {
    [
        Candidate { name: "unchanged", transform: StateDict::clone },
        Candidate {
            name:      "structural prefixes stripped",
            transform: |s| strip_prefixes(s, &STRUCTURAL_PREFIXES),
        },
        Candidate {
            name:      "data-parallel prefix stripped",
            transform: |s| strip_prefixes(s, &[DATA_PARALLEL_PREFIX]),
        },
    ]
}

// ─── Flexible loading ─────────────────────────────────────────────────────────
/// Load `path` into `target`, trying every candidate renaming.
pub fn load_state_dict_flexible<T: StateDictTarget>(
    target: &mut T,
    path:   &Path,
) -> Result<LoadReport, CheckpointError> {
    let state = extract_state_dict(read_checkpoint(path)?)?;
    tracing::info!("Read {} tensors from '{}'", state.len(), path.display());
    load_state_dict_candidates(target, &state)
}

/// The candidate loop over an already extracted state dict.
pub fn load_state_dict_candidates<T: StateDictTarget>(
    target: &mut T,
    state:  &StateDict,
) -> Result<LoadReport, CheckpointError> {
    let mut last = LoadReport::default();

    for candidate in candidates() {
        let remapped = (candidate.transform)(state);

        match target.load_state_dict(&remapped, true) {
            Ok(report) => {
                tracing::info!("Strict load succeeded ({})", candidate.name);
                return Ok(report);
            }
            Err(CheckpointError::KeyMismatch { .. }) => {}
            Err(e) => return Err(e),
        }

        let report = target.load_state_dict(&remapped, false)?;
        if report.is_clean() {
            tracing::info!("Lenient load matched every key ({})", candidate.name);
            return Ok(report);
        }
        tracing::debug!(
            "{}: {} missing, {} unexpected",
            candidate.name,
            report.missing_keys.len(),
            report.unexpected_keys.len(),
        );
        last = report;
    }

    Ok(last)
}

/// The warning lines a degraded load produces; empty for a clean strict load.
/// Each key list shows at most the first 50 names.
pub fn degraded_load_warnings(report: &LoadReport) -> Vec<String> {
    let mut lines = Vec::new();
    if !report.strict {
        lines.push("strict load failed; lenient load was used due to key mismatch".to_string());
    }
    for (label, keys) in [
        ("missing_keys", &report.missing_keys),
        ("unexpected_keys", &report.unexpected_keys),
    ] {
        if !keys.is_empty() {
            lines.push(format!("{label} ({}): {:?}", keys.len(), &keys[..keys.len().min(KEYS_SHOWN)]));
        }
    }
    lines
}

/// Surface a degraded load as warnings.
pub fn warn_on_degraded_load(report: &LoadReport) {
    for line in degraded_load_warnings(report) {
        tracing::warn!("{}", line);
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Minimal StateDictTarget: a fixed set of named vectors.
    #[derive(Debug, Default)]
    struct Params {
        values: BTreeMap<String, TensorSnapshot>,
        strict_calls: usize,
    }

    impl Params {
        fn with(names: &[&str]) -> Self {
            let values = names
                .iter()
                .map(|n| (n.to_string(), TensorSnapshot::new(vec![2], vec![0.0, 0.0])))
                .collect();
            Self { values, strict_calls: 0 }
        }
    }

    impl StateDictTarget for Params {
        fn load_state_dict(&mut self, state: &StateDict, strict: bool) -> Result<LoadReport, CheckpointError> {
            if strict {
                self.strict_calls += 1;
            }
            let missing_keys: Vec<String> =
                self.values.keys().filter(|k| !state.contains_key(k)).cloned().collect();
            let unexpected_keys: Vec<String> =
                state.keys().filter(|k| !self.values.contains_key(*k)).cloned().collect();
            if strict && (!missing_keys.is_empty() || !unexpected_keys.is_empty()) {
                return Err(CheckpointError::KeyMismatch { missing: missing_keys, unexpected: unexpected_keys });
            }
            for (k, v) in state.iter() {
                if let Some(slot) = self.values.get_mut(k) {
                    if slot.shape != v.shape {
                        return Err(CheckpointError::ShapeMismatch {
                            key:      k.clone(),
                            expected: slot.shape.clone(),
                            found:    v.shape.clone(),
                        });
                    }
                    *slot = v.clone();
                }
            }
            Ok(LoadReport { strict, missing_keys, unexpected_keys })
        }
    }

    fn tensor(a: f32, b: f32) -> TensorSnapshot {
        TensorSnapshot::new(vec![2], vec![a, b])
    }

    fn write_json(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_strip_key_applies_prefixes_in_order_once_each() {
        assert_eq!(strip_key("module.model.fc.weight", &STRUCTURAL_PREFIXES), "fc.weight");
        // encoder. comes before neurogpt. in the list, so it survives here
        assert_eq!(strip_key("neurogpt.encoder.conv", &STRUCTURAL_PREFIXES), "encoder.conv");
        assert_eq!(strip_key("model.model.fc", &STRUCTURAL_PREFIXES), "model.fc");
        assert_eq!(strip_key("fc.module.weight", &[DATA_PARALLEL_PREFIX]), "fc.module.weight");
    }

    #[test]
    fn test_unwraps_model_state_dict() {
        let dir  = tempfile::tempdir().unwrap();
        let path = write_json(
            dir.path(),
            "ckpt.json",
            r#"{"epoch": 4, "model_state_dict": {"a": {"shape": [2], "data": [1.0, 2.0]}}}"#,
        );
        let state = extract_state_dict(read_checkpoint(&path).unwrap()).unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(state.get("a"), Some(&tensor(1.0, 2.0)));
    }

    #[test]
    fn test_list_root_is_unrecognized() {
        let dir  = tempfile::tempdir().unwrap();
        let path = write_json(dir.path(), "ckpt.json", r#"[{"shape": [1], "data": [0.0]}]"#);
        let err  = extract_state_dict(read_checkpoint(&path).unwrap()).unwrap_err();
        assert!(matches!(err, CheckpointError::UnrecognizedFormat { ref found } if found == "list"));
    }

    #[test]
    fn test_non_tensor_entry_is_rejected() {
        let node: CheckpointNode = serde_json::from_str(r#"{"a": "text"}"#).unwrap();
        let err = extract_state_dict(node).unwrap_err();
        assert!(matches!(err, CheckpointError::NotATensor { .. }));
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_checkpoint(&dir.path().join("absent.safetensors")).unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound { .. }));

        let path = write_json(dir.path(), "weights.onnx", "");
        let err  = read_checkpoint(&path).unwrap_err();
        assert!(matches!(err, CheckpointError::UnsupportedFile { .. }));
    }

    #[test]
    fn test_torch_pickle_is_read_not_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["weights.bin", "weights.pt"] {
            let path = write_json(dir.path(), name, "not a pickle");
            let err  = read_checkpoint(&path).unwrap_err();
            assert!(matches!(err, CheckpointError::Unreadable { .. }), "{name}: {err:?}");
        }
    }

    #[test]
    fn test_integer_buffers_are_decoded_and_reported_unexpected() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");

        let weight: Vec<u8> = [0.25f32, -1.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let tracked: Vec<u8> = 7i64.to_le_bytes().to_vec();
        let flags: Vec<u8> = vec![1, 0];
        let views = vec![
            ("fc.weight", safetensors::tensor::TensorView::new(Dtype::F32, vec![2], &weight).unwrap()),
            ("bn.num_batches_tracked", safetensors::tensor::TensorView::new(Dtype::I64, vec![], &tracked).unwrap()),
            ("bn.mask", safetensors::tensor::TensorView::new(Dtype::BOOL, vec![2], &flags).unwrap()),
        ];
        let bytes = safetensors::serialize(views, &None::<HashMap<String, String>>).unwrap();
        fs::write(&path, bytes).unwrap();

        let state = extract_state_dict(read_checkpoint(&path).unwrap()).unwrap();
        assert_eq!(state.get("bn.num_batches_tracked"), Some(&TensorSnapshot::new(vec![], vec![7.0])));
        assert_eq!(state.get("bn.mask"), Some(&tensor(1.0, 0.0)));

        let mut target = Params::with(&["fc.weight"]);
        let report = load_state_dict_flexible(&mut target, &path).unwrap();
        assert_eq!(target.values["fc.weight"].data, vec![0.25f32, -1.0]);
        assert_eq!(
            report.unexpected_keys,
            vec!["bn.mask".to_string(), "bn.num_batches_tracked".to_string()],
        );
    }

    #[test]
    fn test_degraded_load_warnings() {
        assert!(degraded_load_warnings(&LoadReport { strict: true, ..LoadReport::default() }).is_empty());

        let report = LoadReport {
            strict:          false,
            missing_keys:    (0..60).map(|i| format!("k{i}")).collect(),
            unexpected_keys: vec!["extra".to_string()],
        };
        let lines = degraded_load_warnings(&report);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("lenient load was used"));
        assert!(lines[1].starts_with("missing_keys (60): "));
        assert!(lines[1].contains("\"k49\""));
        assert!(!lines[1].contains("\"k50\""));
        assert_eq!(lines[2], "unexpected_keys (1): [\"extra\"]");
    }

    #[test]
    fn test_reads_safetensors_with_half_precision() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");

        let f32_bytes: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let f16_bytes: Vec<u8> = [half::f16::from_f32(0.5), half::f16::from_f32(4.0)]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let views = vec![
            ("module.a", safetensors::tensor::TensorView::new(Dtype::F32, vec![2], &f32_bytes).unwrap()),
            ("module.b", safetensors::tensor::TensorView::new(Dtype::F16, vec![2], &f16_bytes).unwrap()),
        ];
        let bytes = safetensors::serialize(views, &None::<HashMap<String, String>>).unwrap();
        fs::write(&path, bytes).unwrap();

        let state = extract_state_dict(read_checkpoint(&path).unwrap()).unwrap();
        assert_eq!(state.get("module.a"), Some(&tensor(1.5, -2.0)));
        assert_eq!(state.get("module.b"), Some(&tensor(0.5, 4.0)));
    }

    #[test]
    fn test_module_prefixed_checkpoint_loads_clean_and_exact() {
        let dir  = tempfile::tempdir().unwrap();
        let path = write_json(
            dir.path(),
            "ckpt.json",
            r#"{"state_dict": {
                "module.fc.weight": {"shape": [2], "data": [0.1, 0.2]},
                "module.fc.bias":   {"shape": [2], "data": [-3.5, 1e-7]}
            }}"#,
        );
        let mut target = Params::with(&["fc.weight", "fc.bias"]);
        let report = load_state_dict_flexible(&mut target, &path).unwrap();

        assert!(report.is_clean());
        assert!(report.strict);
        // unchanged keys fail strict, the second candidate succeeds
        assert_eq!(target.strict_calls, 2);
        assert_eq!(target.values["fc.weight"].data, vec![0.1f32, 0.2]);
        assert_eq!(target.values["fc.bias"].data, vec![-3.5f32, 1e-7]);
    }

    #[test]
    fn test_no_clean_candidate_returns_last_lenient_report() {
        let mut state = StateDict::new();
        state.insert("module.backbone.fc.weight", tensor(1.0, 1.0));
        state.insert("module.extra", tensor(0.0, 0.0));

        let mut target = Params::with(&["backbone.fc.weight", "head.weight"]);
        let report = load_state_dict_candidates(&mut target, &state).unwrap();

        // last candidate strips only `module.`
        assert!(!report.strict);
        assert_eq!(report.missing_keys, vec!["head.weight".to_string()]);
        assert_eq!(report.unexpected_keys, vec!["extra".to_string()]);
        assert_eq!(target.values["backbone.fc.weight"].data, vec![1.0, 1.0]);
        assert_eq!(target.values["head.weight"].data, vec![0.0, 0.0]);
    }

    #[test]
    fn test_shape_mismatch_is_fatal() {
        let mut state = StateDict::new();
        state.insert("fc.weight", TensorSnapshot::new(vec![3], vec![0.0; 3]));
        let mut target = Params::with(&["fc.weight"]);
        let err = load_state_dict_candidates(&mut target, &state).unwrap_err();
        assert!(matches!(err, CheckpointError::ShapeMismatch { .. }));
    }
}
