// ============================================================
// Layer 2 — ConvertUseCase
// ============================================================
// Turns a pretrained checkpoint into the portable format:
//
//   Step 1: Resolve model class + dummy shape  (Layer 3 - domain)
//   Step 2: Load the architecture definition   (Layer 5 - ml)
//   Step 3: Build the model                    (Layer 5 - ml)
//   Step 4: Load weights, tolerating prefixes  (Layer 6 - infra)
//   Step 5: Trace + export                     (Layer 6 - infra)
//
// The model definition is a NeuroGptConfig JSON file; the class
// name picks how that backbone is presented to the runtime.

use anyhow::{Context, Result};
use burn::{config::Config, tensor::backend::Backend};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::error::ConfigError;
use crate::domain::window::{CANONICAL_LEN, CHANNELS};
use crate::infra::{
    checkpoint::{load_state_dict_flexible, warn_on_degraded_load},
    export::{export_portable, ExportSpec, ExportSummary, PortableBackbone, PortableClassifier},
};
use crate::ml::{
    backbone::{NeuroGpt, NeuroGptConfig},
    resolve_device,
    wrapper::{ClassificationWrapper, BACKBONE_CHANNELS, BACKBONE_SAMPLES},
    DeviceChoice, InferenceBackend,
};

/// Seed for the weights a checkpoint does not cover and for the
/// backend RNG that draws the export's dummy input.
pub const INIT_SEED: u64 = 42;

// ─── Model registry ───────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelClass {
    /// The backbone alone, as pretrained.
    NeuroGpt,
    /// Raw (B,16,250) windows in, class scores out.
    NeuroGptClassifier,
}

impl ModelClass {
    pub const ALL: [ModelClass; 2] = [ModelClass::NeuroGpt, ModelClass::NeuroGptClassifier];

    pub fn name(self) -> &'static str {
        match self {
            ModelClass::NeuroGpt           => "NeuroGPT",
            ModelClass::NeuroGptClassifier => "NeuroGPTClassifier",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| ConfigError::UnknownModelClass {
                name:  name.to_string(),
                known: Self::ALL.map(ModelClass::name).join(", "),
            })
    }

    /// Reject dummy shapes the class cannot run.
    pub fn check_input_shape(self, config: &NeuroGptConfig, shape: [usize; 3]) -> Result<(), ConfigError> {
        let (channels, samples) = match self {
            ModelClass::NeuroGpt           => (config.in_channels, config.chunk_len),
            ModelClass::NeuroGptClassifier => (CHANNELS, CANONICAL_LEN),
        };
        if shape[1] != channels || shape[2] != samples {
            return Err(ConfigError::InputShapeMismatch {
                class: self.name().to_string(),
                channels,
                samples,
                found: shape,
            });
        }
        if self == ModelClass::NeuroGptClassifier
            && (config.in_channels != BACKBONE_CHANNELS || config.chunk_len != BACKBONE_SAMPLES)
        {
            return Err(ConfigError::InvalidArchitecture {
                reason: format!(
                    "{} needs a backbone with in_channels {} and chunk_len {}, got {} and {}",
                    self.name(),
                    BACKBONE_CHANNELS,
                    BACKBONE_SAMPLES,
                    config.in_channels,
                    config.chunk_len,
                ),
            });
        }
        Ok(())
    }
}

/// Parse a "B,C,T" dummy-input shape.
pub fn parse_input_shape(raw: &str) -> Result<[usize; 3], ConfigError> {
    let invalid = || ConfigError::InvalidInputShape { raw: raw.to_string() };

    let dims: Vec<usize> = raw
        .split(',')
        .map(|d| d.trim().parse::<usize>().map_err(|_| invalid()))
        .collect::<Result<_, _>>()?;

    match dims.as_slice() {
        &[b, c, t] if b > 0 && c > 0 && t > 0 => Ok([b, c, t]),
        _ => Err(invalid()),
    }
}

// ─── Convert Configuration ────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertConfig {
    pub model_def:   String,
    pub model_class: String,
    pub weights:     String,
    pub output:      String,
    pub opset:       u32,
    pub input_shape: String,
    pub device:      DeviceChoice,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            model_def:   "model/neurogpt.json".to_string(),
            model_class: ModelClass::NeuroGptClassifier.name().to_string(),
            weights:     "model/neurogpt.safetensors".to_string(),
            output:      "model/neurogpt.portable.safetensors".to_string(),
            opset:       17,
            input_shape: "1,16,250".to_string(),
            device:      DeviceChoice::Cpu,
        }
    }
}

// ─── ConvertUseCase ───────────────────────────────────────────────────────────
pub struct ConvertUseCase {
    config: ConvertConfig,
}

impl ConvertUseCase {
    pub fn new(config: ConvertConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<ExportSummary> {
        let cfg = &self.config;

        // ── Step 1: Class and dummy shape ─────────────────────────────────────
        let class = ModelClass::from_name(&cfg.model_class)?;
        let shape = parse_input_shape(&cfg.input_shape)?;

        // ── Step 2: Architecture definition ───────────────────────────────────
        let def_path = Path::new(&cfg.model_def);
        if !def_path.exists() {
            return Err(ConfigError::ModelDefNotFound { path: def_path.to_path_buf() }.into());
        }
        let arch = NeuroGptConfig::load(def_path)
            .map_err(|e| anyhow::anyhow!("{e:?}"))
            .with_context(|| format!("cannot load model definition '{}'", def_path.display()))?;
        arch.validate()?;
        class.check_input_shape(&arch, shape)?;

        if class == ModelClass::NeuroGptClassifier && arch.num_decoding_classes.is_none() {
            return Err(ConfigError::InvalidArchitecture {
                reason: format!("{} needs num_decoding_classes in '{}'", class.name(), cfg.model_def),
            }
            .into());
        }

        // ── Step 3: Build ─────────────────────────────────────────────────────
        let device = resolve_device(cfg.device);
        InferenceBackend::seed(&device, INIT_SEED);
        let mut rng = StdRng::seed_from_u64(INIT_SEED);
        let mut model: NeuroGpt<InferenceBackend> = arch.init(&mut rng, &device);
        tracing::info!(
            "Built {} ({} parameter tensors)",
            class.name(),
            model.state_dict().len(),
        );

        // ── Step 4: Weights ───────────────────────────────────────────────────
        let report = load_state_dict_flexible(&mut model, Path::new(&cfg.weights))
            .with_context(|| format!("cannot load weights from '{}'", cfg.weights))?;
        warn_on_degraded_load(&report);

        // ── Step 5: Export ────────────────────────────────────────────────────
        let spec = ExportSpec {
            format_version:   cfg.opset,
            input_name:       "input".to_string(),
            output_name:      "output".to_string(),
            dummy_shape:      shape,
            constant_folding: true,
        };
        let out = Path::new(&cfg.output);

        let summary = match class {
            ModelClass::NeuroGpt => {
                let portable = PortableBackbone { model, config: arch };
                export_portable(&portable, &spec, out, &device)?
            }
            ModelClass::NeuroGptClassifier => {
                let wrapper  = ClassificationWrapper::new(arch.num_decoding_classes.unwrap_or_default(), &device);
                let portable = PortableClassifier { model, wrapper, config: arch };
                export_portable(&portable, &spec, out, &device)?
            }
        };

        Ok(summary)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::checkpoint::{extract_state_dict, read_checkpoint};
    use crate::ml::backbone::tests::tiny_config;
    use crate::ml::backend_rng_guard;
    use std::fs;

    #[test]
    fn test_parse_input_shape() {
        assert_eq!(parse_input_shape("1,16,250").unwrap(), [1, 16, 250]);
        assert_eq!(parse_input_shape(" 4, 22 ,500").unwrap(), [4, 22, 500]);
        assert!(parse_input_shape("1,16").is_err());
        assert!(parse_input_shape("1,16,250,1").is_err());
        assert!(parse_input_shape("1,x,250").is_err());
        assert!(parse_input_shape("0,16,250").is_err());
        assert!(parse_input_shape("-1,16,250").is_err());
    }

    #[test]
    fn test_model_class_registry() {
        assert_eq!(ModelClass::from_name("NeuroGPT").unwrap(), ModelClass::NeuroGpt);
        let err = ModelClass::from_name("ResNet").unwrap_err();
        assert!(err.to_string().contains("NeuroGPTClassifier"));
    }

    #[test]
    fn test_backbone_class_requires_backbone_shaped_input() {
        let arch = tiny_config();
        assert!(ModelClass::NeuroGpt.check_input_shape(&arch, [1, 22, 500]).is_ok());
        let err = ModelClass::NeuroGpt.check_input_shape(&arch, [1, 16, 250]).unwrap_err();
        assert!(matches!(err, ConfigError::InputShapeMismatch { channels: 22, samples: 500, .. }));
        assert!(ModelClass::NeuroGptClassifier.check_input_shape(&arch, [1, 16, 250]).is_ok());
    }

    fn write_fixture(dir: &Path, classes: Option<usize>) -> (String, String) {
        let arch = tiny_config().with_num_decoding_classes(classes);
        let def  = dir.join("neurogpt.json");
        arch.save(&def).unwrap();

        // checkpoint as a data-parallel run would save it
        let model: NeuroGpt<InferenceBackend> =
            arch.init(&mut StdRng::seed_from_u64(1), &Default::default());
        let entries: serde_json::Map<String, serde_json::Value> = model
            .state_dict()
            .iter()
            .map(|(k, v)| (format!("module.{k}"), serde_json::json!({"shape": v.shape, "data": v.data})))
            .collect();
        let weights = dir.join("pretrained.json");
        fs::write(&weights, serde_json::json!({ "state_dict": entries }).to_string()).unwrap();

        (def.display().to_string(), weights.display().to_string())
    }

    #[test]
    fn test_converts_prefixed_checkpoint_for_classifier() {
        let _rng = backend_rng_guard();
        let dir = tempfile::tempdir().unwrap();
        let (model_def, weights) = write_fixture(dir.path(), Some(3));
        let output = dir.path().join("out/model.safetensors");

        let summary = ConvertUseCase::new(ConvertConfig {
            model_def,
            weights: weights.clone(),
            output: output.display().to_string(),
            ..ConvertConfig::default()
        })
        .execute()
        .unwrap();

        assert_eq!(summary.output_shape, vec![1, 3]);
        let source   = extract_state_dict(read_checkpoint(Path::new(&weights)).unwrap()).unwrap();
        let exported = extract_state_dict(read_checkpoint(&output).unwrap()).unwrap();
        assert_eq!(
            exported.get("decoding_head.weight"),
            source.get("module.decoding_head.weight"),
        );
    }

    #[test]
    fn test_classifier_without_head_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (model_def, weights) = write_fixture(dir.path(), None);
        let err = ConvertUseCase::new(ConvertConfig {
            model_def,
            weights,
            output: dir.path().join("o.safetensors").display().to_string(),
            ..ConvertConfig::default()
        })
        .execute()
        .unwrap_err();
        assert!(err.to_string().contains("num_decoding_classes"));
    }

    #[test]
    fn test_missing_model_definition() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConvertUseCase::new(ConvertConfig {
            model_def: dir.path().join("absent.json").display().to_string(),
            ..ConvertConfig::default()
        })
        .execute()
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ModelDefNotFound { .. })
        ));
    }
}
