// ============================================================
// Layer 2 — FinetuneUseCase
// ============================================================
// Orchestrates the motor-imagery fine-tune in order:
//
//   Step 1: Parse the label map            (Layer 3 - domain)
//   Step 2: Find the CSV signal logs       (Layer 4 - data)
//   Step 3: Window every labelled log      (Layer 4 - data)
//   Step 4: Collect the dataset            (Layer 4 - data)
//   Step 5: Work out the head width        (Layer 4 - data)
//   Step 6: Build backbone, load weights   (Layer 5 - ml, Layer 6 - infra)
//   Step 7: Run the training loop          (Layer 5 - ml)
//   Step 8: Save the run config            (Layer 6 - infra)
//   Step 9: Export the classifier          (Layer 6 - infra)

use anyhow::{Context, Result};
use burn::{
    config::Config, data::dataset::Dataset, module::AutodiffModule, tensor::backend::Backend,
};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use crate::data::{
    dataset::{discover_logs, open_labelled_logs, WindowDataset},
    windower::WindowingConfig,
};
use crate::domain::error::{ConfigError, DataError};
use crate::domain::label_map::LabelMap;
use crate::domain::window::{CANONICAL_LEN, CHANNELS};
use crate::infra::{
    checkpoint::{load_state_dict_flexible, warn_on_degraded_load},
    export::{export_portable, ExportSpec, ExportSummary, PortableClassifier},
    metrics::MetricsLogger,
};
use crate::ml::{
    backbone::{NeuroGpt, NeuroGptConfig},
    resolve_device,
    trainer::{fine_tune, TrainSettings},
    wrapper::ClassificationWrapper,
    DeviceChoice, TrainBackend,
};

/// Architecture file looked up under `--neurogpt-root`.
pub const ROOT_CONFIG_FILE: &str = "neurogpt.json";

/// Portable format version written with the fine-tuned classifier.
pub const EXPORT_FORMAT_VERSION: u32 = 17;

// ─── Fine-tune Configuration ──────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinetuneConfig {
    pub neurogpt_root:   String,
    pub weights:         String,
    pub data_glob:       String,
    pub label_map:       String,
    pub sample_rate:     f64,
    pub window_seconds:  f64,
    pub stride_seconds:  f64,
    pub epochs:          usize,
    pub batch_size:      usize,
    pub lr:              f64,
    pub seed:            u64,
    pub freeze_backbone: bool,
    pub num_classes:     usize,
    pub output:          String,
    pub metrics_dir:     Option<String>,
    pub device:          DeviceChoice,
}

impl Default for FinetuneConfig {
    fn default() -> Self {
        Self {
            neurogpt_root:   "NeuroGPT".to_string(),
            weights:         "model/neurogpt.safetensors".to_string(),
            data_glob:       "training_data_*.csv".to_string(),
            label_map:       "left=0,right=1,attack=2".to_string(),
            sample_rate:     250.0,
            window_seconds:  1.0,
            stride_seconds:  0.5,
            epochs:          10,
            batch_size:      32,
            lr:              1e-4,
            seed:            42,
            freeze_backbone: false,
            num_classes:     3,
            output:          "model/neurogpt_mi.safetensors".to_string(),
            metrics_dir:     None,
            device:          DeviceChoice::Cpu,
        }
    }
}

impl FinetuneConfig {
    fn check(&self) -> Result<(), ConfigError> {
        let positive = [
            ("epochs", self.epochs),
            ("batch-size", self.batch_size),
            ("num-classes", self.num_classes),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::NotPositive { name, value: value.to_string() });
            }
        }
        if !(self.lr > 0.0) {
            return Err(ConfigError::NotPositive { name: "lr", value: self.lr.to_string() });
        }
        Ok(())
    }

    fn windowing(&self) -> WindowingConfig {
        WindowingConfig {
            sample_rate:    self.sample_rate,
            window_seconds: self.window_seconds,
            stride_seconds: self.stride_seconds,
        }
    }

    /// Where metrics.csv goes: the explicit directory, else next to the output.
    pub fn metrics_dir(&self) -> PathBuf {
        match &self.metrics_dir {
            Some(dir) => PathBuf::from(dir),
            None => Path::new(&self.output)
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

/// `<out>.finetune.json`
pub fn run_config_path(out: &Path) -> PathBuf {
    let mut name = out.as_os_str().to_owned();
    name.push(".finetune.json");
    PathBuf::from(name)
}

/// Architecture under `root`, or the built-in defaults.
pub fn backbone_config(root: &Path) -> Result<NeuroGptConfig> {
    if !root.is_dir() {
        tracing::warn!(
            "NeuroGPT root '{}' does not exist; using the built-in architecture",
            root.display()
        );
        return Ok(NeuroGptConfig::new());
    }

    let path = root.join(ROOT_CONFIG_FILE);
    if !path.exists() {
        tracing::info!("No {} under '{}'; using the built-in architecture", ROOT_CONFIG_FILE, root.display());
        return Ok(NeuroGptConfig::new());
    }

    let config = NeuroGptConfig::load(&path)
        .map_err(|e| anyhow::anyhow!("{e:?}"))
        .with_context(|| format!("cannot load architecture '{}'", path.display()))?;
    tracing::info!("Loaded architecture from '{}'", path.display());
    Ok(config)
}

/// Warning text when the labels found differ from `--num-classes`.
pub fn class_count_warning(detected: &BTreeSet<usize>, expected: usize) -> Option<String> {
    (detected.len() != expected).then(|| {
        format!("detected {} classes {:?}, expected {}", detected.len(), detected, expected)
    })
}

// ─── FinetuneUseCase ──────────────────────────────────────────────────────────
pub struct FinetuneUseCase {
    config: FinetuneConfig,
}

impl FinetuneUseCase {
    pub fn new(config: FinetuneConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<ExportSummary> {
        let cfg = &self.config;
        cfg.check()?;

        // ── Step 1: Label map ─────────────────────────────────────────────────
        let labels = LabelMap::parse(&cfg.label_map)?;
        tracing::info!("Label map: {:?}", labels.entries());

        // ── Step 2: Signal logs ───────────────────────────────────────────────
        let files = discover_logs(&cfg.data_glob)?;
        tracing::info!("Found {} CSV files matching '{}'", files.len(), cfg.data_glob);

        // ── Step 3: Window extractors ─────────────────────────────────────────
        // Window/stride are checked here, before any file is read.
        let windowing = cfg.windowing();
        let (window_len, stride) = windowing.in_samples()?;
        tracing::info!("Windows of {} samples every {} samples", window_len, stride);
        let sources = open_labelled_logs(&files, &labels, &windowing)?;

        // ── Step 4: Dataset ───────────────────────────────────────────────────
        let dataset = WindowDataset::from_sources(&sources);
        if dataset.is_empty() {
            return Err(DataError::EmptyDataset.into());
        }
        tracing::info!("Dataset: {} windows of {}x{}", dataset.len(), CHANNELS, CANONICAL_LEN);

        // ── Step 5: Head width ────────────────────────────────────────────────
        let detected    = dataset.distinct_labels();
        let num_classes = dataset.max_label().map_or(0, |m| m + 1);
        if let Some(warning) = class_count_warning(&detected, cfg.num_classes) {
            tracing::warn!("{}", warning);
        }

        // ── Step 6: Backbone + pretrained weights ─────────────────────────────
        // Weights come from the StdRng; dropout from the backend RNG.
        let device = resolve_device(cfg.device);
        TrainBackend::seed(&device, cfg.seed);
        let mut rng = StdRng::seed_from_u64(cfg.seed);

        let mut arch = backbone_config(Path::new(&cfg.neurogpt_root))?;
        arch.num_decoding_classes = None;
        arch.validate()?;

        let mut model: NeuroGpt<TrainBackend> = arch.init(&mut rng, &device);
        let report = load_state_dict_flexible(&mut model, Path::new(&cfg.weights))
            .with_context(|| format!("cannot load pretrained weights from '{}'", cfg.weights))?;
        warn_on_degraded_load(&report);

        model.switch_decoding_mode(true, num_classes, &mut rng);
        arch.num_decoding_classes = Some(num_classes);

        if cfg.freeze_backbone {
            model = model.freeze_backbone();
            tracing::info!("Backbone frozen; training {:?}", model.trainable_parameter_names());
        }

        // ── Step 7: Training loop ─────────────────────────────────────────────
        let metrics  = MetricsLogger::new(cfg.metrics_dir())?;
        let settings = TrainSettings {
            epochs:     cfg.epochs,
            batch_size: cfg.batch_size,
            lr:         cfg.lr,
            seed:       cfg.seed,
            num_classes,
        };
        let model = fine_tune(model, dataset, &settings, &device, |m| metrics.log(m))?;

        // ── Step 8: Run config ────────────────────────────────────────────────
        let out = Path::new(&cfg.output);
        if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create output directory '{}'", parent.display()))?;
        }
        let run_path = run_config_path(out);
        fs::write(&run_path, serde_json::to_string_pretty(cfg)?)
            .with_context(|| format!("cannot write '{}'", run_path.display()))?;

        // ── Step 9: Export ────────────────────────────────────────────────────
        let model    = model.valid();
        let device   = model.unembedder.weight.val().device();
        let portable = PortableClassifier {
            model,
            wrapper: ClassificationWrapper::new(num_classes, &device),
            config:  arch,
        };
        let spec = ExportSpec {
            format_version:   EXPORT_FORMAT_VERSION,
            input_name:       "input".to_string(),
            output_name:      "logits".to_string(),
            dummy_shape:      [1, CHANNELS, CANONICAL_LEN],
            constant_folding: true,
        };
        export_portable(&portable, &spec, out, &device)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::checkpoint::{extract_state_dict, read_checkpoint};
    use crate::ml::backbone::tests::tiny_config;
    use crate::ml::backend_rng_guard;
    use std::fmt::Write as _;

    fn write_log(dir: &Path, name: &str, samples: usize) {
        let mut text = String::from("Timestamp");
        for c in 0..CHANNELS {
            write!(text, ",Ch{c}").unwrap();
        }
        text.push('\n');
        for t in 0..samples {
            write!(text, "{t}").unwrap();
            for c in 0..CHANNELS {
                write!(text, ",{}", ((t * (c + 1)) % 17) as f32 - 8.0).unwrap();
            }
            text.push('\n');
        }
        fs::write(dir.join(name), text).unwrap();
    }

    /// Root with a tiny architecture and a matching pretrained checkpoint.
    fn write_backbone(dir: &Path) -> (PathBuf, PathBuf) {
        write_backbone_with(dir, tiny_config())
    }

    fn write_backbone_with(dir: &Path, arch: NeuroGptConfig) -> (PathBuf, PathBuf) {
        let root = dir.join("NeuroGPT");
        fs::create_dir_all(&root).unwrap();
        arch.save(root.join(ROOT_CONFIG_FILE)).unwrap();

        let model: NeuroGpt<TrainBackend> = arch.init(&mut StdRng::seed_from_u64(7), &Default::default());
        let weights = dir.join("pretrained.json");
        let entries: serde_json::Map<String, serde_json::Value> = model
            .state_dict()
            .iter()
            .map(|(k, v)| (format!("module.{k}"), serde_json::json!({"shape": v.shape, "data": v.data})))
            .collect();
        fs::write(&weights, serde_json::json!({ "model_state_dict": entries }).to_string()).unwrap();
        (root, weights)
    }

    fn config(dir: &Path, root: &Path, weights: &Path) -> FinetuneConfig {
        FinetuneConfig {
            neurogpt_root: root.display().to_string(),
            weights:       weights.display().to_string(),
            data_glob:     dir.join("training_data_*.csv").display().to_string(),
            epochs:        1,
            batch_size:    4,
            lr:            1e-3,
            output:        dir.join("out/neurogpt_mi.safetensors").display().to_string(),
            ..FinetuneConfig::default()
        }
    }

    #[test]
    fn test_run_config_and_metrics_paths() {
        assert_eq!(
            run_config_path(Path::new("model/mi.safetensors")),
            PathBuf::from("model/mi.safetensors.finetune.json"),
        );
        let cfg = FinetuneConfig { output: "model/mi.safetensors".into(), ..FinetuneConfig::default() };
        assert_eq!(cfg.metrics_dir(), PathBuf::from("model"));
        let cfg = FinetuneConfig { output: "mi.safetensors".into(), ..FinetuneConfig::default() };
        assert_eq!(cfg.metrics_dir(), PathBuf::from("."));
    }

    #[test]
    fn test_missing_root_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = backbone_config(&dir.path().join("absent")).unwrap();
        assert_eq!(config.embedding_dim, NeuroGptConfig::new().embedding_dim);
    }

    #[test]
    fn test_rejects_non_positive_options() {
        let cfg = FinetuneConfig { batch_size: 0, ..FinetuneConfig::default() };
        assert!(matches!(cfg.check(), Err(ConfigError::NotPositive { name: "batch-size", .. })));
    }

    #[test]
    fn test_no_labelled_windows_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (root, weights) = write_backbone(dir.path());
        // matches no label, and too short for a window anyway
        write_log(dir.path(), "training_data_rest.csv", 300);
        write_log(dir.path(), "training_data_left.csv", 100);

        let err = FinetuneUseCase::new(config(dir.path(), &root, &weights)).execute().unwrap_err();
        assert!(matches!(err.downcast_ref::<DataError>(), Some(DataError::EmptyDataset)));
    }

    #[test]
    fn test_class_count_warning() {
        let detected: BTreeSet<usize> = [0, 1].into_iter().collect();
        assert_eq!(
            class_count_warning(&detected, 3).as_deref(),
            Some("detected 2 classes {0, 1}, expected 3"),
        );
        assert_eq!(class_count_warning(&detected, 2), None);
    }

    #[test]
    fn test_fine_tunes_and_exports_classifier() {
        let _rng = backend_rng_guard();
        let dir = tempfile::tempdir().unwrap();
        let (root, weights) = write_backbone(dir.path());
        write_log(dir.path(), "training_data_left.csv", 500);
        write_log(dir.path(), "training_data_right.csv", 500);

        let cfg = FinetuneConfig { freeze_backbone: true, ..config(dir.path(), &root, &weights) };
        let summary = FinetuneUseCase::new(cfg.clone()).execute().unwrap();

        // labels 0 and 1 → two-way head
        assert_eq!(summary.output_shape, vec![1, 2]);

        let out = PathBuf::from(&cfg.output);
        let stored = extract_state_dict(read_checkpoint(&out).unwrap()).unwrap();
        assert_eq!(stored.get("decoding_head.weight").map(|t| t.shape.clone()), Some(vec![16, 2]));
        assert!(stored.contains_key("constants.upsample_matrix"));

        assert!(run_config_path(&out).exists());
        let csv = fs::read_to_string(out.parent().unwrap().join("metrics.csv")).unwrap();
        assert_eq!(csv.lines().count(), 2);
    }

    #[test]
    fn test_same_seed_reproduces_the_run() {
        let _rng = backend_rng_guard();
        let run = || {
            let dir = tempfile::tempdir().unwrap();
            let (root, weights) = write_backbone_with(dir.path(), tiny_config().with_dropout(0.1));
            write_log(dir.path(), "training_data_left.csv", 500);
            write_log(dir.path(), "training_data_right.csv", 500);

            let cfg = FinetuneConfig { epochs: 2, ..config(dir.path(), &root, &weights) };
            FinetuneUseCase::new(cfg.clone()).execute().unwrap();

            let out = PathBuf::from(&cfg.output);
            let csv = fs::read_to_string(out.parent().unwrap().join("metrics.csv")).unwrap();
            let stored = extract_state_dict(read_checkpoint(&out).unwrap()).unwrap();
            (csv, stored)
        };

        let (csv_a, weights_a) = run();
        let (csv_b, weights_b) = run();
        assert_eq!(csv_a, csv_b);
        assert_eq!(weights_a, weights_b);
    }
}
