// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `convert` and `finetune`, and
// all their flags. Each Args struct converts into its plain
// application config, so Layer 2 never sees clap types.

use clap::{Args, Subcommand};

use crate::application::{convert_use_case::ConvertConfig, finetune_use_case::FinetuneConfig};
use crate::ml::DeviceChoice;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a checkpoint into a registered model class and export it
    Convert(ConvertArgs),

    /// Fine-tune a classification head on windowed EEG logs and export it
    Finetune(FinetuneArgs),
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Architecture definition (NeuroGptConfig JSON)
    #[arg(long, default_value = "model/neurogpt.json")]
    pub model_def: String,

    /// Registered model class: NeuroGPT or NeuroGPTClassifier
    #[arg(long, default_value = "NeuroGPTClassifier")]
    pub model_class: String,

    /// Checkpoint to load (.safetensors, .pt/.pth/.bin or .json)
    #[arg(long, default_value = "model/neurogpt.safetensors")]
    pub weights: String,

    #[arg(long, default_value = "model/neurogpt.portable.safetensors")]
    pub output: String,

    /// Portable format version recorded in the export
    #[arg(long, default_value_t = 17)]
    pub opset: u32,

    /// Dummy input shape "B,C,T" used to trace the model
    #[arg(long, default_value = "1,16,250")]
    pub input_shape: String,

    /// cuda falls back to cpu when no GPU backend is compiled in
    #[arg(long, default_value = "cpu", value_parser = ["cpu", "cuda"])]
    pub device: String,
}

impl From<ConvertArgs> for ConvertConfig {
    fn from(a: ConvertArgs) -> Self {
        ConvertConfig {
            model_def:   a.model_def,
            model_class: a.model_class,
            weights:     a.weights,
            output:      a.output,
            opset:       a.opset,
            input_shape: a.input_shape,
            device:      DeviceChoice::from_flag(&a.device),
        }
    }
}

#[derive(Args, Debug)]
pub struct FinetuneArgs {
    /// NeuroGPT repository root; its neurogpt.json overrides the built-in architecture
    #[arg(long, default_value = "NeuroGPT")]
    pub neurogpt_root: String,

    /// Pretrained backbone checkpoint
    #[arg(long, default_value = "model/neurogpt.safetensors")]
    pub weights: String,

    /// Glob selecting the training CSV logs
    #[arg(long, default_value = "training_data_*.csv")]
    pub data_glob: String,

    /// Filename substring → class, first match wins
    #[arg(long, default_value = "left=0,right=1,attack=2")]
    pub label_map: String,

    /// Source sample rate in Hz
    #[arg(long, default_value_t = 250.0)]
    pub sample_rate: f64,

    #[arg(long, default_value_t = 1.0)]
    pub window_seconds: f64,

    #[arg(long, default_value_t = 0.5)]
    pub stride_seconds: f64,

    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,

    /// Seeds weight init and shuffling
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Train only the decoding head
    #[arg(long)]
    pub freeze_backbone: bool,

    /// Expected number of classes; a different detected count is only a warning
    #[arg(long, default_value_t = 3)]
    pub num_classes: usize,

    #[arg(long, default_value = "model/neurogpt_mi.safetensors")]
    pub output: String,

    /// Directory for metrics.csv (default: the output's directory)
    #[arg(long)]
    pub metrics_dir: Option<String>,

    #[arg(long, default_value = "cpu", value_parser = ["cpu", "cuda"])]
    pub device: String,
}

impl From<FinetuneArgs> for FinetuneConfig {
    fn from(a: FinetuneArgs) -> Self {
        FinetuneConfig {
            neurogpt_root:   a.neurogpt_root,
            weights:         a.weights,
            data_glob:       a.data_glob,
            label_map:       a.label_map,
            sample_rate:     a.sample_rate,
            window_seconds:  a.window_seconds,
            stride_seconds:  a.stride_seconds,
            epochs:          a.epochs,
            batch_size:      a.batch_size,
            lr:              a.lr,
            seed:            a.seed,
            freeze_backbone: a.freeze_backbone,
            num_classes:     a.num_classes,
            output:          a.output,
            metrics_dir:     a.metrics_dir,
            device:          DeviceChoice::from_flag(&a.device),
        }
    }
}
