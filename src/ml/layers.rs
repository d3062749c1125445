// ============================================================
// Layer 5 — Transformer Building Blocks
// ============================================================
// GPT-style pre-norm decoder block on burn's own modules:
//
//   x = x + Attn(LayerNorm1(x))   MultiHeadAttention, causal + padding masks
//   x = x + Mlp(LayerNorm2(x))    d → factor·d → d, GELU
//
// burn masks are boolean, true = NOT attended:
//   causal  [b, t, t]  generate_autoregressive_mask
//   padding [b, t]     attention_mask == 0
//
// Linear and attention weights start as zeros and are then
// filled from the caller's seeded StdRng.

use burn::{
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig, Initializer, LayerNorm, LayerNormConfig, Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation,
};
use rand::rngs::StdRng;

use crate::ml::params::{init_linear, linear_slots, NamedSlots, ParamSlot};

/// Zero-initialised Linear; the caller overwrites it from its seeded RNG.
pub fn seeded_linear<B: Backend>(
    rng:    &mut StdRng,
    d_in:   usize,
    d_out:  usize,
    device: &B::Device,
) -> Linear<B> {
    let mut linear = LinearConfig::new(d_in, d_out)
        .with_initializer(Initializer::Zeros)
        .init(device);
    init_linear(rng, &mut linear, device);
    linear
}

/// Self-attention with its four projections drawn from `rng`.
pub fn seeded_attention<B: Backend>(
    rng:     &mut StdRng,
    d_model: usize,
    n_heads: usize,
    dropout: f64,
    device:  &B::Device,
) -> MultiHeadAttention<B> {
    let mut attn = MultiHeadAttentionConfig::new(d_model, n_heads)
        .with_dropout(dropout)
        .with_initializer(Initializer::Zeros)
        .init(device);
    init_linear(rng, &mut attn.query, device);
    init_linear(rng, &mut attn.key, device);
    init_linear(rng, &mut attn.value, device);
    init_linear(rng, &mut attn.output, device);
    attn
}

/// `weight`/`bias` names for a LayerNorm's scale and shift.
pub fn layer_norm_slots<'a, B: Backend>(prefix: &str, norm: &'a mut LayerNorm<B>) -> NamedSlots<'a, B> {
    let mut slots = vec![(format!("{prefix}.weight"), ParamSlot::Rank1(&mut norm.gamma))];
    if let Some(beta) = norm.beta.as_mut() {
        slots.push((format!("{prefix}.bias"), ParamSlot::Rank1(beta)));
    }
    slots
}

pub fn attention_slots<'a, B: Backend>(
    prefix: &str,
    attn:   &'a mut MultiHeadAttention<B>,
) -> NamedSlots<'a, B> {
    let mut slots = linear_slots(&format!("{prefix}.query"), &mut attn.query);
    slots.extend(linear_slots(&format!("{prefix}.key"), &mut attn.key));
    slots.extend(linear_slots(&format!("{prefix}.value"), &mut attn.value));
    slots.extend(linear_slots(&format!("{prefix}.output"), &mut attn.output));
    slots
}

// ─── GPT block ────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct GptBlock<B: Backend> {
    pub norm1:    LayerNorm<B>,
    pub attn:     MultiHeadAttention<B>,
    pub norm2:    LayerNorm<B>,
    pub mlp_in:   Linear<B>,
    pub mlp_out:  Linear<B>,
    pub dropout:  Dropout,
}

impl<B: Backend> GptBlock<B> {
    pub fn new(
        rng:        &mut StdRng,
        d_model:    usize,
        n_heads:    usize,
        ffn_factor: usize,
        dropout:    f64,
        device:     &B::Device,
    ) -> Self {
        Self {
            norm1:   LayerNormConfig::new(d_model).init(device),
            attn:    seeded_attention(rng, d_model, n_heads, dropout, device),
            norm2:   LayerNormConfig::new(d_model).init(device),
            mlp_in:  seeded_linear(rng, d_model, d_model * ffn_factor, device),
            mlp_out: seeded_linear(rng, d_model * ffn_factor, d_model, device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    /// x: [b, t, d]; `padding`: [b, t]; `causal`: [b, t, t].
    pub fn forward(
        &self,
        x:       Tensor<B, 3>,
        padding: Tensor<B, 2, Bool>,
        causal:  Tensor<B, 3, Bool>,
    ) -> Tensor<B, 3> {
        let input = MhaInput::self_attn(self.norm1.forward(x.clone()))
            .mask_pad(padding)
            .mask_attn(causal);
        let attn = self.attn.forward(input).context;
        let x    = x + self.dropout.forward(attn);

        let hidden = activation::gelu(self.mlp_in.forward(self.norm2.forward(x.clone())));
        x + self.dropout.forward(self.mlp_out.forward(hidden))
    }

    pub fn param_slots(&mut self, prefix: &str) -> NamedSlots<'_, B> {
        let mut slots = layer_norm_slots(&format!("{prefix}.norm1"), &mut self.norm1);
        slots.extend(attention_slots(&format!("{prefix}.attn"), &mut self.attn));
        slots.extend(layer_norm_slots(&format!("{prefix}.norm2"), &mut self.norm2));
        slots.extend(linear_slots(&format!("{prefix}.mlp_in"), &mut self.mlp_in));
        slots.extend(linear_slots(&format!("{prefix}.mlp_out"), &mut self.mlp_out));
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, nn::attention::generate_autoregressive_mask, tensor::TensorData};
    use rand::SeedableRng;

    type B = NdArray;

    fn unpadded(b: usize, t: usize) -> Tensor<B, 2, Bool> {
        Tensor::<B, 2, Int>::ones([b, t], &Default::default()).equal_elem(0)
    }

    #[test]
    fn test_block_keeps_shape() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(0);
        let block = GptBlock::<B>::new(&mut rng, 8, 2, 4, 0.0, &device);
        let x = Tensor::<B, 3>::zeros([2, 3, 8], &device);
        let causal = generate_autoregressive_mask::<B>(2, 3, &device);
        assert_eq!(block.forward(x, unpadded(2, 3), causal).dims(), [2, 3, 8]);
    }

    #[test]
    fn test_earlier_positions_ignore_later_ones() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(3);
        let block = GptBlock::<B>::new(&mut rng, 8, 2, 2, 0.0, &device);

        let values: Vec<f32> = (0..24).map(|i| (i as f32 * 0.37).sin()).collect();
        let mut changed = values.clone();
        for v in &mut changed[16..] {
            *v += 5.0;
        }
        let run = |v: Vec<f32>| -> Vec<f32> {
            let x = Tensor::<B, 3>::from_data(TensorData::new(v, [1, 3, 8]), &device);
            let causal = generate_autoregressive_mask::<B>(1, 3, &device);
            block
                .forward(x, unpadded(1, 3), causal)
                .slice([0..1, 0..2, 0..8])
                .into_data()
                .to_vec()
                .unwrap()
        };

        // only the last position differs, so the first two rows must not move
        let a = run(values);
        let b = run(changed);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_block_parameter_names() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut block = GptBlock::<B>::new(&mut rng, 8, 2, 4, 0.0, &Default::default());
        let names: Vec<String> = block.param_slots("layer").into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"layer.attn.query.weight".to_string()));
        assert!(names.contains(&"layer.attn.output.bias".to_string()));
        assert!(names.contains(&"layer.norm2.bias".to_string()));
        assert_eq!(names.len(), 2 + 8 + 2 + 4);
    }

    #[test]
    fn test_attention_weights_come_from_the_seed() {
        let device = Default::default();
        let mut a = GptBlock::<B>::new(&mut StdRng::seed_from_u64(9), 8, 2, 2, 0.0, &device);
        let mut b = GptBlock::<B>::new(&mut StdRng::seed_from_u64(9), 8, 2, 2, 0.0, &device);
        let snap = |blk: &mut GptBlock<B>| -> Vec<Vec<f32>> {
            blk.param_slots("l").iter().map(|(_, s)| s.snapshot().data).collect()
        };
        let (sa, sb) = (snap(&mut a), snap(&mut b));
        assert_eq!(sa, sb);
        // query weights are drawn, not left at zero
        assert!(sa[2].iter().any(|&v| v != 0.0));
    }
}
