// ============================================================
// Layer 6 — Portable Exporter
// ============================================================
// Writes a trained model in a runtime-agnostic form:
//
//   <out>       safetensors file, every named parameter as F32
//               header metadata: format, format_version,
//               input_name, output_name, model_class
//               constant folding on → precomputed forward-pass
//               constants stored under `constants.`
//
//   <out>.json  graph manifest
//               {
//                 "format": "neurogpt-portable",
//                 "format_version": 17,
//                 "model_class": "NeuroGPTClassifier",
//                 "inputs":  [{"name": "input",  "shape": ["batch", 16, 250]}],
//                 "outputs": [{"name": "logits", "shape": ["batch", 3]}],
//                 "ops": ["standardize(...)", ...],
//                 "config": { ...architecture... },
//                 "constant_folding": true
//               }
//
// Before anything is written the model is traced once on a
// standard-normal dummy input of the requested shape; a model
// that cannot run that input is never exported.

use anyhow::{bail, Context, Result};
use burn::{prelude::*, tensor::Distribution};
use safetensors::{tensor::TensorView, Dtype};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::domain::state_dict::{StateDict, TensorSnapshot};
use crate::domain::window::{CANONICAL_LEN, CHANNELS};
use crate::ml::backbone::{BackboneBatch, BackboneOutput, NeuroGpt, NeuroGptConfig};
use crate::ml::wrapper::{ClassificationWrapper, BACKBONE_CHANNELS, BACKBONE_SAMPLES};

pub const FORMAT_NAME: &str = "neurogpt-portable";

/// Tensor-name prefix of folded constants in the weight file.
pub const CONSTANTS_PREFIX: &str = "constants.";

/// Name the batch axis carries in the manifest.
pub const BATCH_AXIS: &str = "batch";

/// How one export should be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSpec {
    pub format_version:   u32,
    pub input_name:       String,
    pub output_name:      String,
    pub dummy_shape:      [usize; 3],
    pub constant_folding: bool,
}

/// A manifest axis: a fixed size or a named dynamic one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    Fixed(usize),
    Symbolic(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name:  String,
    pub shape: Vec<Dim>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format:           String,
    pub format_version:   u32,
    pub model_class:      String,
    pub inputs:           Vec<TensorSpec>,
    pub outputs:          Vec<TensorSpec>,
    pub ops:              Vec<String>,
    pub config:           serde_json::Value,
    pub constant_folding: bool,
    pub tensor_count:     usize,
}

/// Where an export went and what it traced.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub weights_path:  PathBuf,
    pub manifest_path: PathBuf,
    pub output_shape:  Vec<usize>,
    pub tensor_count:  usize,
}

// ─── PortableModel ────────────────────────────────────────────────────────────
/// Everything the exporter needs from a model.
pub trait PortableModel<B: Backend> {
    fn model_class(&self) -> &'static str;

    /// Run one forward pass and return the output dims.
    fn trace(&self, input: Tensor<B, 3>) -> Result<Vec<usize>>;

    fn state_dict(&self) -> StateDict;

    /// Forward-pass constants that can be stored precomputed.
    fn folded_constants(&self) -> StateDict {
        StateDict::new()
    }

    /// Forward operations, in execution order.
    fn graph_ops(&self) -> Vec<String>;

    fn architecture(&self) -> Result<serde_json::Value>;
}

/// The backbone alone, as pretrained (no decoding head).
pub struct PortableBackbone<B: Backend> {
    pub model:  NeuroGpt<B>,
    pub config: NeuroGptConfig,
}

/// Wrapper + backbone with decoding head: raw (B,16,250) windows in, class scores out.
pub struct PortableClassifier<B: Backend> {
    pub model:   NeuroGpt<B>,
    pub wrapper: ClassificationWrapper<B>,
    pub config:  NeuroGptConfig,
}

fn backbone_ops(config: &NeuroGptConfig) -> Vec<String> {
    let mut ops = vec![
        "attention_mask(ones[batch, chunks])".to_string(),
        format!("conv2d(encoder.temporal_conv, kernel=[1,{}])", config.filter_time_length),
        format!("conv2d(encoder.spatial_conv, kernel=[{},1])", config.in_channels),
        "gelu".to_string(),
        format!(
            "avg_pool2d(kernel=[1,{}], stride=[1,{}])",
            config.pool_time_length, config.stride_avg_pool,
        ),
        format!("flatten({})", config.parcellation_dim()),
        "linear(embedder.projection)".to_string(),
        "add(embedding(embedder.positions))".to_string(),
    ];
    for i in 0..config.num_hidden_layers {
        ops.push(format!("gpt_block(decoder.layers.{i}, causal)"));
    }
    ops.push("layer_norm(decoder.final_norm)".to_string());
    ops
}

impl<B: Backend> PortableModel<B> for PortableBackbone<B> {
    fn model_class(&self) -> &'static str {
        "NeuroGPT"
    }

    fn trace(&self, input: Tensor<B, 3>) -> Result<Vec<usize>> {
        match self.model.forward(BackboneBatch::single_chunk(input)) {
            BackboneOutput::Outputs(out)        => Ok(out.dims().to_vec()),
            BackboneOutput::DecodingLogits(out) => Ok(out.dims().to_vec()),
            BackboneOutput::Unexpected(keys)    => bail!("backbone produced unexpected outputs: {keys:?}"),
        }
    }

    fn state_dict(&self) -> StateDict {
        self.model.state_dict()
    }

    fn graph_ops(&self) -> Vec<String> {
        let mut ops = vec!["unsqueeze(1)".to_string()];
        ops.extend(backbone_ops(&self.config));
        match self.model.is_decoding() {
            true  => ops.extend(["take_last(chunks)".to_string(), "linear(decoding_head)".to_string()]),
            false => ops.push("linear(unembedder)".to_string()),
        }
        ops
    }

    fn architecture(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.config)?)
    }
}

impl<B: Backend> PortableModel<B> for PortableClassifier<B> {
    fn model_class(&self) -> &'static str {
        "NeuroGPTClassifier"
    }

    fn trace(&self, input: Tensor<B, 3>) -> Result<Vec<usize>> {
        let out = self.wrapper.forward(&self.model, input)?;
        Ok(out.values.dims().to_vec())
    }

    fn state_dict(&self) -> StateDict {
        self.model.state_dict()
    }

    fn folded_constants(&self) -> StateDict {
        let data = self.wrapper.upsample_matrix().into_data();
        let mut constants = StateDict::new();
        constants.insert(
            "upsample_matrix",
            TensorSnapshot::new(vec![CANONICAL_LEN, BACKBONE_SAMPLES], data.iter::<f32>().collect()),
        );
        constants
    }

    fn graph_ops(&self) -> Vec<String> {
        let mut ops = vec![
            "standardize(axis=time, eps=1e-6, unbiased)".to_string(),
            format!("pad_channels({CHANNELS}->{BACKBONE_CHANNELS}, zeros)"),
            format!("resize_linear({CANONICAL_LEN}->{BACKBONE_SAMPLES}, half_pixel)"),
            "unsqueeze(1)".to_string(),
        ];
        ops.extend(backbone_ops(&self.config));
        match self.model.is_decoding() {
            true  => ops.extend(["take_last(chunks)".to_string(), "linear(decoding_head)".to_string()]),
            false => ops.extend(["linear(unembedder)".to_string(), "take_last(time)".to_string()]),
        }
        ops
    }

    fn architecture(&self) -> Result<serde_json::Value> {
        let mut config = serde_json::to_value(&self.config)?;
        if let Some(obj) = config.as_object_mut() {
            obj.insert("wrapper_num_classes".into(), self.wrapper.num_classes().into());
        }
        Ok(config)
    }
}

// ─── Export ───────────────────────────────────────────────────────────────────
/// `<out>.json`
pub fn manifest_path(out: &Path) -> PathBuf {
    let mut name = out.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

/// Trace `model` on a dummy input, then write the weight file and
/// its manifest.
pub fn export_portable<B: Backend, M: PortableModel<B>>(
    model:  &M,
    spec:   &ExportSpec,
    out:    &Path,
    device: &B::Device,
) -> Result<ExportSummary> {
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create output directory '{}'", parent.display()))?;
    }

    // ── Trace ─────────────────────────────────────────────────────────────────
    let dummy = Tensor::<B, 3>::random(spec.dummy_shape, Distribution::Normal(0.0, 1.0), device);
    let output_shape = model
        .trace(dummy)
        .with_context(|| format!("{} failed on a dummy input of shape {:?}", model.model_class(), spec.dummy_shape))?;
    tracing::debug!("Traced {}: output shape {:?}", model.model_class(), output_shape);

    // ── Weights ───────────────────────────────────────────────────────────────
    let mut tensors: Vec<(String, TensorSnapshot)> = model
        .state_dict()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if spec.constant_folding {
        tensors.extend(
            model
                .folded_constants()
                .iter()
                .map(|(k, v)| (format!("{CONSTANTS_PREFIX}{k}"), v.clone())),
        );
    }

    let metadata: HashMap<String, String> = [
        ("format", FORMAT_NAME.to_string()),
        ("format_version", spec.format_version.to_string()),
        ("input_name", spec.input_name.clone()),
        ("output_name", spec.output_name.clone()),
        ("model_class", model.model_class().to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let bytes = serialize_tensors(&tensors, metadata)?;
    fs::write(out, bytes).with_context(|| format!("cannot write '{}'", out.display()))?;

    // ── Manifest ──────────────────────────────────────────────────────────────
    let [_, channels, samples] = spec.dummy_shape;
    let manifest = Manifest {
        format:         FORMAT_NAME.to_string(),
        format_version: spec.format_version,
        model_class:    model.model_class().to_string(),
        inputs: vec![TensorSpec {
            name:  spec.input_name.clone(),
            shape: vec![Dim::Symbolic(BATCH_AXIS.into()), Dim::Fixed(channels), Dim::Fixed(samples)],
        }],
        outputs: vec![TensorSpec {
            name:  spec.output_name.clone(),
            shape: std::iter::once(Dim::Symbolic(BATCH_AXIS.into()))
                .chain(output_shape.iter().skip(1).map(|&d| Dim::Fixed(d)))
                .collect(),
        }],
        ops:              model.graph_ops(),
        config:           model.architecture()?,
        constant_folding: spec.constant_folding,
        tensor_count:     tensors.len(),
    };

    let manifest_path = manifest_path(out);
    let json = serde_json::to_string_pretty(&manifest)?;
    fs::write(&manifest_path, json)
        .with_context(|| format!("cannot write '{}'", manifest_path.display()))?;

    tracing::info!(
        "Exported {} ({} tensors) → '{}'",
        model.model_class(),
        tensors.len(),
        out.display(),
    );

    Ok(ExportSummary {
        weights_path: out.to_path_buf(),
        manifest_path,
        output_shape,
        tensor_count: tensors.len(),
    })
}

/// Little-endian F32 safetensors bytes for `tensors`.
fn serialize_tensors(
    tensors:  &[(String, TensorSnapshot)],
    metadata: HashMap<String, String>,
) -> Result<Vec<u8>> {
    let buffers: Vec<(&str, &[usize], Vec<u8>)> = tensors
        .iter()
        .map(|(name, t)| {
            let bytes = t.data.iter().flat_map(|v| v.to_le_bytes()).collect();
            (name.as_str(), t.shape.as_slice(), bytes)
        })
        .collect();

    let mut views = Vec::with_capacity(buffers.len());
    for (name, shape, bytes) in &buffers {
        let view = TensorView::new(Dtype::F32, shape.to_vec(), bytes)
            .with_context(|| format!("tensor '{name}' does not match its shape {shape:?}"))?;
        views.push((*name, view));
    }

    safetensors::serialize(views, &Some(metadata)).context("cannot serialize weights")
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::checkpoint::{extract_state_dict, read_checkpoint};
    use crate::ml::backbone::tests::tiny_config;
    use crate::ml::backend_rng_guard;
    use burn::backend::NdArray;
    use rand::{rngs::StdRng, SeedableRng};
    use safetensors::SafeTensors;

    type B = NdArray;

    fn spec(output_name: &str, shape: [usize; 3], folding: bool) -> ExportSpec {
        ExportSpec {
            format_version:   17,
            input_name:       "input".into(),
            output_name:      output_name.into(),
            dummy_shape:      shape,
            constant_folding: folding,
        }
    }

    fn classifier() -> PortableClassifier<B> {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(5);
        let config = tiny_config();
        let mut model: NeuroGpt<B> = config.init(&mut rng, &device);
        model.switch_decoding_mode(true, 3, &mut rng);
        PortableClassifier { model, wrapper: ClassificationWrapper::new(3, &device), config }
    }

    #[test]
    fn test_manifest_path_appends_json() {
        assert_eq!(manifest_path(Path::new("out/model.onnx")), PathBuf::from("out/model.onnx.json"));
    }

    #[test]
    fn test_classifier_export_writes_weights_and_manifest() {
        let _rng = backend_rng_guard();
        let dir   = tempfile::tempdir().unwrap();
        let out   = dir.path().join("nested/neurogpt_mi.safetensors");
        let model = classifier();

        let summary = export_portable(&model, &spec("logits", [1, 16, 250], true), &out, &Default::default())
            .unwrap();
        assert_eq!(summary.output_shape, vec![1, 3]);

        let bytes = fs::read(&out).unwrap();
        let (_, header) = SafeTensors::read_metadata(&bytes).unwrap();
        let meta = header.metadata().clone().unwrap();
        assert_eq!(meta["format_version"], "17");
        assert_eq!(meta["output_name"], "logits");
        assert_eq!(meta["model_class"], "NeuroGPTClassifier");

        let stored = extract_state_dict(read_checkpoint(&out).unwrap()).unwrap();
        assert_eq!(stored.get("constants.upsample_matrix").map(|t| t.shape.clone()), Some(vec![250, 500]));
        let params = model.model.state_dict();
        assert_eq!(stored.get("decoding_head.weight"), params.get("decoding_head.weight"));
        assert_eq!(stored.len(), params.len() + 1);

        let manifest: Manifest =
            serde_json::from_str(&fs::read_to_string(&summary.manifest_path).unwrap()).unwrap();
        assert_eq!(manifest.inputs[0].shape, vec![
            Dim::Symbolic("batch".into()),
            Dim::Fixed(16),
            Dim::Fixed(250),
        ]);
        assert_eq!(manifest.outputs[0].shape, vec![Dim::Symbolic("batch".into()), Dim::Fixed(3)]);
        assert_eq!(manifest.ops.last().map(String::as_str), Some("linear(decoding_head)"));
        assert!(manifest.constant_folding);
    }

    #[test]
    fn test_without_folding_no_constants_are_stored() {
        let _rng = backend_rng_guard();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("m.safetensors");
        export_portable(&classifier(), &spec("output", [2, 16, 250], false), &out, &Default::default())
            .unwrap();
        let stored = extract_state_dict(read_checkpoint(&out).unwrap()).unwrap();
        assert!(stored.keys().all(|k| !k.starts_with(CONSTANTS_PREFIX)));
    }

    #[test]
    fn test_backbone_export_traces_pretraining_outputs() {
        let _rng = backend_rng_guard();
        let dir    = tempfile::tempdir().unwrap();
        let out    = dir.path().join("backbone.safetensors");
        let config = tiny_config();
        let model  = PortableBackbone::<B> {
            model: config.init(&mut StdRng::seed_from_u64(9), &Default::default()),
            config: config.clone(),
        };

        let shape = [2, config.in_channels, config.chunk_len];
        let summary = export_portable(&model, &spec("output", shape, true), &out, &Default::default()).unwrap();
        assert_eq!(summary.output_shape, vec![2, 1, config.parcellation_dim()]);
    }

    #[test]
    fn test_untraceable_input_is_not_written() {
        let _rng = backend_rng_guard();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("bad.safetensors");
        let err = export_portable(&classifier(), &spec("logits", [1, 8, 250], true), &out, &Default::default());
        assert!(err.is_err());
        assert!(!out.exists());
    }
}
