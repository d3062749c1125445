// ============================================================
// Layer 5 — NeuroGPT Backbone
// ============================================================
// Pretrained EEG foundation model, chunk-sequence in, chunk-
// sequence (or class scores) out.
//
//   inputs          [B, chunks, 22, 500]
//     │
//     ▼
//   ConvEncoder     temporal conv (1×25) → spatial conv (22×1)
//                   → GELU → avg pool (1×75, stride 15) → flatten
//                   [B, chunks, parcellation_dim]        (27·40 = 1080)
//     │
//     ▼
//   Embedder        linear → + position embedding → dropout
//                   [B, chunks, embedding_dim]
//     │
//     ▼
//   Decoder         N × causal GPT block → final LayerNorm
//     │
//     ├─ decoding head present → last chunk → Linear → [B, classes]
//     └─ otherwise              → Unembedder          → [B, chunks, parcellation_dim]
//
// Pretraining mode reconstructs parcellation features; decoding
// mode (switch_decoding_mode) classifies the sequence.

use burn::{
    module::Param,
    nn::{
        attention::generate_autoregressive_mask,
        conv::{Conv2d, Conv2dConfig},
        pool::{AvgPool2d, AvgPool2dConfig},
        Dropout, DropoutConfig, Embedding, EmbeddingConfig, Initializer, LayerNorm,
        LayerNormConfig, Linear,
    },
    prelude::*,
    tensor::activation,
};
use rand::rngs::StdRng;

use crate::domain::error::{CheckpointError, ConfigError};
use crate::domain::state_dict::{LoadReport, StateDict};
use crate::domain::traits::StateDictTarget;
use crate::ml::layers::{layer_norm_slots, seeded_linear, GptBlock};
use crate::ml::params::{
    conv2d_slots, init_conv2d, linear_slots, load_into_slots, snapshot_slots, uniform_tensor,
    NamedSlots, ParamSlot,
};

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct NeuroGptConfig {
    #[config(default = 500)]
    pub chunk_len: usize,
    #[config(default = 1)]
    pub num_chunks: usize,
    #[config(default = 22)]
    pub in_channels: usize,
    #[config(default = 40)]
    pub n_filters_time: usize,
    #[config(default = 25)]
    pub filter_time_length: usize,
    #[config(default = 75)]
    pub pool_time_length: usize,
    #[config(default = 15)]
    pub stride_avg_pool: usize,
    #[config(default = 1024)]
    pub embedding_dim: usize,
    #[config(default = 6)]
    pub num_hidden_layers: usize,
    #[config(default = 16)]
    pub num_attention_heads: usize,
    #[config(default = 4)]
    pub intermediate_dim_factor: usize,
    #[config(default = 512)]
    pub n_positions: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
    /// Decoding head width; `None` builds the backbone in pretraining mode.
    #[config(default = "None")]
    pub num_decoding_classes: Option<usize>,
}

impl NeuroGptConfig {
    /// Flattened encoder output per chunk:
    /// ((chunk_len − filter + 1 − pool) / stride + 1) × n_filters_time
    pub fn parcellation_dim(&self) -> usize {
        self.pooled_len() * self.n_filters_time
    }

    fn pooled_len(&self) -> usize {
        (self.chunk_len + 1).saturating_sub(self.filter_time_length + self.pool_time_length)
            / self.stride_avg_pool.max(1)
            + 1
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("chunk_len", self.chunk_len),
            ("num_chunks", self.num_chunks),
            ("in_channels", self.in_channels),
            ("n_filters_time", self.n_filters_time),
            ("filter_time_length", self.filter_time_length),
            ("pool_time_length", self.pool_time_length),
            ("stride_avg_pool", self.stride_avg_pool),
            ("embedding_dim", self.embedding_dim),
            ("num_attention_heads", self.num_attention_heads),
            ("intermediate_dim_factor", self.intermediate_dim_factor),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::NotPositive { name, value: value.to_string() });
            }
        }
        if self.filter_time_length + self.pool_time_length > self.chunk_len + 1 {
            return Err(ConfigError::InvalidArchitecture {
                reason: format!(
                    "chunk_len {} is shorter than filter_time_length {} + pool_time_length {} - 1",
                    self.chunk_len, self.filter_time_length, self.pool_time_length
                ),
            });
        }
        if self.embedding_dim % self.num_attention_heads != 0 {
            return Err(ConfigError::InvalidArchitecture {
                reason: format!(
                    "embedding_dim {} is not divisible by num_attention_heads {}",
                    self.embedding_dim, self.num_attention_heads
                ),
            });
        }
        if self.num_chunks > self.n_positions {
            return Err(ConfigError::InvalidArchitecture {
                reason: format!(
                    "num_chunks {} exceeds n_positions {}",
                    self.num_chunks, self.n_positions
                ),
            });
        }
        Ok(())
    }

    /// Build the backbone with every weight drawn from `rng`.
    pub fn init<B: Backend>(&self, rng: &mut StdRng, device: &B::Device) -> NeuroGpt<B> {
        let parcellation_dim = self.parcellation_dim();
        let d = self.embedding_dim;

        let encoder = ConvEncoder {
            temporal_conv: seeded_conv(rng, [1, self.n_filters_time], [1, self.filter_time_length], device),
            spatial_conv:  seeded_conv(
                rng,
                [self.n_filters_time, self.n_filters_time],
                [self.in_channels, 1],
                device,
            ),
            pool: AvgPool2dConfig::new([1, self.pool_time_length])
                .with_strides([1, self.stride_avg_pool])
                .init(),
            dropout: DropoutConfig::new(self.dropout).init(),
        };

        let mut positions = EmbeddingConfig::new(self.n_positions, d)
            .with_initializer(Initializer::Zeros)
            .init(device);
        positions.weight = Param::from_tensor(uniform_tensor(rng, [self.n_positions, d], 0.02, device));

        let embedder = Embedder {
            projection: seeded_linear(rng, parcellation_dim, d, device),
            positions,
            dropout:    DropoutConfig::new(self.dropout).init(),
        };

        let layers = (0..self.num_hidden_layers)
            .map(|_| {
                GptBlock::new(
                    rng,
                    d,
                    self.num_attention_heads,
                    self.intermediate_dim_factor,
                    self.dropout,
                    device,
                )
            })
            .collect();
        let decoder = Decoder { layers, final_norm: LayerNormConfig::new(d).init(device) };

        let unembedder    = seeded_linear(rng, d, parcellation_dim, device);
        let decoding_head = self
            .num_decoding_classes
            .map(|n| seeded_linear(rng, d, n, device));

        NeuroGpt {
            encoder,
            embedder,
            decoder,
            unembedder,
            decoding_head,
            in_channels: self.in_channels,
            chunk_len: self.chunk_len,
            embedding_dim: d,
        }
    }
}

fn seeded_conv<B: Backend>(
    rng:      &mut StdRng,
    channels: [usize; 2],
    kernel:   [usize; 2],
    device:   &B::Device,
) -> Conv2d<B> {
    let mut conv = Conv2dConfig::new(channels, kernel)
        .with_initializer(Initializer::Zeros)
        .init(device);
    init_conv2d(rng, &mut conv, device);
    conv
}

// ─── Sub-modules ──────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct ConvEncoder<B: Backend> {
    pub temporal_conv: Conv2d<B>,
    pub spatial_conv:  Conv2d<B>,
    pub pool:          AvgPool2d,
    pub dropout:       Dropout,
}

impl<B: Backend> ConvEncoder<B> {
    /// [B, chunks, C, T] → [B, chunks, parcellation_dim]
    pub fn forward(&self, inputs: Tensor<B, 4>) -> Tensor<B, 3> {
        let [b, chunks, c, t] = inputs.dims();
        let x = inputs.reshape([b * chunks, 1, c, t]);
        let x = self.temporal_conv.forward(x);
        let x = activation::gelu(self.spatial_conv.forward(x));
        let x = self.dropout.forward(self.pool.forward(x));
        let [_, filters, rows, pooled] = x.dims();
        x.reshape([b, chunks, filters * rows * pooled])
    }
}

#[derive(Module, Debug)]
pub struct Embedder<B: Backend> {
    pub projection: Linear<B>,
    pub positions:  Embedding<B>,
    pub dropout:    Dropout,
}

impl<B: Backend> Embedder<B> {
    pub fn forward(&self, features: Tensor<B, 3>) -> Tensor<B, 3> {
        let [b, chunks, _] = features.dims();
        let device = features.device();
        let x = self.projection.forward(features);

        let ids = Tensor::<B, 1, Int>::arange(0..chunks as i64, &device)
            .unsqueeze::<2>()
            .expand([b, chunks]);
        self.dropout.forward(x + self.positions.forward(ids))
    }
}

#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    pub layers:     Vec<GptBlock<B>>,
    pub final_norm: LayerNorm<B>,
}

impl<B: Backend> Decoder<B> {
    pub fn forward(
        &self,
        x:       Tensor<B, 3>,
        padding: Tensor<B, 2, Bool>,
        causal:  Tensor<B, 3, Bool>,
    ) -> Tensor<B, 3> {
        let mut x = x;
        for layer in &self.layers {
            x = layer.forward(x, padding.clone(), causal.clone());
        }
        self.final_norm.forward(x)
    }
}

// ─── Batch and output types ───────────────────────────────────────────────────
/// The backbone's batching convention.
#[derive(Debug, Clone)]
pub struct BackboneBatch<B: Backend> {
    /// [B, chunks, channels, samples]
    pub inputs:         Tensor<B, 4>,
    /// [B, chunks], 1 = real chunk, 0 = padding
    pub attention_mask: Tensor<B, 2, Int>,
}

impl<B: Backend> BackboneBatch<B> {
    /// One chunk per example, every chunk attended.
    pub fn single_chunk(inputs: Tensor<B, 3>) -> Self {
        let [b, _, _] = inputs.dims();
        let device = inputs.device();
        Self {
            inputs:         inputs.unsqueeze_dim(1),
            attention_mask: Tensor::ones([b, 1], &device),
        }
    }
}

/// What a backbone forward pass produced.
#[derive(Debug, Clone)]
pub enum BackboneOutput<B: Backend> {
    /// [B, classes] scores from the decoding head.
    DecodingLogits(Tensor<B, 2>),
    /// [B, chunks, features] sequence outputs (pretraining mode).
    Outputs(Tensor<B, 3>),
    /// Anything else; carries the names of what was produced.
    Unexpected(Vec<String>),
}

/// Anything the classification wrapper can drive.
pub trait Backbone<B: Backend> {
    fn forward_batch(&self, batch: BackboneBatch<B>) -> BackboneOutput<B>;
}

// ─── NeuroGpt ─────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct NeuroGpt<B: Backend> {
    pub encoder:       ConvEncoder<B>,
    pub embedder:      Embedder<B>,
    pub decoder:       Decoder<B>,
    pub unembedder:    Linear<B>,
    pub decoding_head: Option<Linear<B>>,
    pub in_channels:   usize,
    pub chunk_len:     usize,
    pub embedding_dim: usize,
}

impl<B: Backend> NeuroGpt<B> {
    pub fn forward(&self, batch: BackboneBatch<B>) -> BackboneOutput<B> {
        let [b, chunks, _, _] = batch.inputs.dims();
        if chunks == 0 {
            return BackboneOutput::Unexpected(Vec::new());
        }
        let device = batch.inputs.device();

        let features = self.encoder.forward(batch.inputs);
        let hidden   = self.embedder.forward(features);

        let padding = batch.attention_mask.equal_elem(0);
        let causal  = generate_autoregressive_mask::<B>(b, chunks, &device);
        let hidden  = self.decoder.forward(hidden, padding, causal);

        match &self.decoding_head {
            Some(head) => {
                let d    = self.embedding_dim;
                let last = hidden.slice([0..b, chunks - 1..chunks, 0..d]).reshape([b, d]);
                BackboneOutput::DecodingLogits(head.forward(last))
            }
            None => BackboneOutput::Outputs(self.unembedder.forward(hidden)),
        }
    }

    /// Install (`true`) or remove (`false`) the decoding head.
    pub fn switch_decoding_mode(&mut self, decoding: bool, num_classes: usize, rng: &mut StdRng) {
        if decoding {
            let device = self.unembedder.weight.val().device();
            self.decoding_head = Some(seeded_linear(rng, self.embedding_dim, num_classes, &device));
        } else {
            self.decoding_head = None;
        }
    }

    pub fn is_decoding(&self) -> bool {
        self.decoding_head.is_some()
    }

    /// Stop gradients everywhere except the decoding head.
    pub fn freeze_backbone(mut self) -> Self {
        self.encoder    = self.encoder.no_grad();
        self.embedder   = self.embedder.no_grad();
        self.decoder    = self.decoder.no_grad();
        self.unembedder = self.unembedder.no_grad();
        self
    }

    /// Every parameter, named by its dotted path.
    pub fn param_slots(&mut self) -> NamedSlots<'_, B> {
        let mut slots = conv2d_slots("encoder.temporal_conv", &mut self.encoder.temporal_conv);
        slots.extend(conv2d_slots("encoder.spatial_conv", &mut self.encoder.spatial_conv));
        slots.extend(linear_slots("embedder.projection", &mut self.embedder.projection));
        slots.push((
            "embedder.positions.weight".to_string(),
            ParamSlot::Rank2(&mut self.embedder.positions.weight),
        ));
        for (i, layer) in self.decoder.layers.iter_mut().enumerate() {
            slots.extend(layer.param_slots(&format!("decoder.layers.{i}")));
        }
        slots.extend(layer_norm_slots("decoder.final_norm", &mut self.decoder.final_norm));
        slots.extend(linear_slots("unembedder", &mut self.unembedder));
        if let Some(head) = self.decoding_head.as_mut() {
            slots.extend(linear_slots("decoding_head", head));
        }
        slots
    }

    pub fn state_dict(&self) -> StateDict {
        let mut view = self.clone();
        let state = snapshot_slots(&view.param_slots());
        state
    }

    /// Names of the parameters that still receive gradients.
    pub fn trainable_parameter_names(&self) -> Vec<String> {
        let mut view = self.clone();
        let names = view
            .param_slots()
            .into_iter()
            .filter(|(_, slot)| slot.is_trainable())
            .map(|(name, _)| name)
            .collect();
        names
    }
}

impl<B: Backend> Backbone<B> for NeuroGpt<B> {
    fn forward_batch(&self, batch: BackboneBatch<B>) -> BackboneOutput<B> {
        self.forward(batch)
    }
}

impl<B: Backend> StateDictTarget for NeuroGpt<B> {
    fn load_state_dict(
        &mut self,
        state:  &StateDict,
        strict: bool,
    ) -> Result<LoadReport, CheckpointError> {
        load_into_slots(self.param_slots(), state, strict)
    }
}
