// ============================================================
// Layer 5 — Named Parameter Table
// ============================================================
// burn modules hold their weights as Param<Tensor<B, D>> fields.
// Checkpoints and exports talk about weights by NAME, so every
// model in this layer lists its parameters as
//
//   ("decoder.layers.3.attn.query.weight", ParamSlot::Rank2(&mut ..))
//
// Names use dotted paths from the model root. Layouts are burn's:
// a Linear weight is [d_in, d_out], a Conv2d weight is
// [out_channels, in_channels, k_h, k_w].
//
// Weight initialisation goes through a caller-owned StdRng so a
// run with the same seed starts from the same weights.

use std::collections::BTreeSet;

use burn::{
    module::Param,
    nn::{conv::Conv2d, Linear},
    prelude::*,
    tensor::TensorData,
};
use rand::{rngs::StdRng, Rng};

use crate::domain::error::CheckpointError;
use crate::domain::state_dict::{LoadReport, StateDict, TensorSnapshot};

/// A mutable handle to one parameter tensor of any supported rank.
pub enum ParamSlot<'a, B: Backend> {
    Rank1(&'a mut Param<Tensor<B, 1>>),
    Rank2(&'a mut Param<Tensor<B, 2>>),
    Rank4(&'a mut Param<Tensor<B, 4>>),
}

pub type NamedSlots<'a, B> = Vec<(String, ParamSlot<'a, B>)>;

impl<B: Backend> ParamSlot<'_, B> {
    pub fn shape(&self) -> Vec<usize> {
        match self {
            ParamSlot::Rank1(p) => p.val().dims().to_vec(),
            ParamSlot::Rank2(p) => p.val().dims().to_vec(),
            ParamSlot::Rank4(p) => p.val().dims().to_vec(),
        }
    }

    /// Whether gradients are tracked for this parameter.
    pub fn is_trainable(&self) -> bool {
        match self {
            ParamSlot::Rank1(p) => p.val().is_require_grad(),
            ParamSlot::Rank2(p) => p.val().is_require_grad(),
            ParamSlot::Rank4(p) => p.val().is_require_grad(),
        }
    }

    pub fn snapshot(&self) -> TensorSnapshot {
        let data = match self {
            ParamSlot::Rank1(p) => p.val().into_data(),
            ParamSlot::Rank2(p) => p.val().into_data(),
            ParamSlot::Rank4(p) => p.val().into_data(),
        };
        TensorSnapshot::new(self.shape(), data.iter::<f32>().collect())
    }

    /// Replace the parameter with `tensor`. The caller has already
    /// checked that the shapes agree.
    fn assign(&mut self, tensor: &TensorSnapshot) {
        let data = || TensorData::new(tensor.data.clone(), tensor.shape.clone());
        match self {
            ParamSlot::Rank1(p) => {
                let device = p.val().device();
                **p = Param::from_tensor(Tensor::from_data(data(), &device));
            }
            ParamSlot::Rank2(p) => {
                let device = p.val().device();
                **p = Param::from_tensor(Tensor::from_data(data(), &device));
            }
            ParamSlot::Rank4(p) => {
                let device = p.val().device();
                **p = Param::from_tensor(Tensor::from_data(data(), &device));
            }
        }
    }
}

// ─── Slot helpers for burn's built-in layers ─────────────────────────────────
pub fn linear_slots<'a, B: Backend>(prefix: &str, linear: &'a mut Linear<B>) -> NamedSlots<'a, B> {
    let mut slots = vec![(format!("{prefix}.weight"), ParamSlot::Rank2(&mut linear.weight))];
    if let Some(bias) = linear.bias.as_mut() {
        slots.push((format!("{prefix}.bias"), ParamSlot::Rank1(bias)));
    }
    slots
}

pub fn conv2d_slots<'a, B: Backend>(prefix: &str, conv: &'a mut Conv2d<B>) -> NamedSlots<'a, B> {
    let mut slots = vec![(format!("{prefix}.weight"), ParamSlot::Rank4(&mut conv.weight))];
    if let Some(bias) = conv.bias.as_mut() {
        slots.push((format!("{prefix}.bias"), ParamSlot::Rank1(bias)));
    }
    slots
}

// ─── Seeded initialisation ────────────────────────────────────────────────────
/// U(−bound, bound) tensor drawn from `rng`.
pub fn uniform_tensor<B: Backend, const D: usize>(
    rng:    &mut StdRng,
    shape:  [usize; D],
    bound:  f32,
    device: &B::Device,
) -> Tensor<B, D> {
    let n: usize = shape.iter().product();
    let values: Vec<f32> = (0..n).map(|_| rng.gen_range(-bound..=bound)).collect();
    Tensor::from_data(TensorData::new(values, shape), device)
}

/// U(−1/√fan_in, 1/√fan_in) for weight and bias, the usual
/// default for linear and convolution layers.
pub fn fan_in_bound(fan_in: usize) -> f32 {
    1.0 / (fan_in.max(1) as f32).sqrt()
}

pub fn init_linear<B: Backend>(rng: &mut StdRng, linear: &mut Linear<B>, device: &B::Device) {
    let [d_in, d_out] = linear.weight.val().dims();
    let bound = fan_in_bound(d_in);
    linear.weight = Param::from_tensor(uniform_tensor(rng, [d_in, d_out], bound, device));
    if linear.bias.is_some() {
        linear.bias = Some(Param::from_tensor(uniform_tensor(rng, [d_out], bound, device)));
    }
}

pub fn init_conv2d<B: Backend>(rng: &mut StdRng, conv: &mut Conv2d<B>, device: &B::Device) {
    let [c_out, c_in, k_h, k_w] = conv.weight.val().dims();
    let bound = fan_in_bound(c_in * k_h * k_w);
    conv.weight = Param::from_tensor(uniform_tensor(rng, [c_out, c_in, k_h, k_w], bound, device));
    if conv.bias.is_some() {
        conv.bias = Some(Param::from_tensor(uniform_tensor(rng, [c_out], bound, device)));
    }
}

// ─── State dict loading ───────────────────────────────────────────────────────
/// Apply `state` to `slots`.
///
/// Every check runs before the first parameter is replaced, so a
/// failed load leaves the model exactly as it was.
pub fn load_into_slots<B: Backend>(
    slots:  NamedSlots<'_, B>,
    state:  &StateDict,
    strict: bool,
) -> Result<LoadReport, CheckpointError> {
    let names: BTreeSet<&str> = slots.iter().map(|(n, _)| n.as_str()).collect();

    let missing_keys: Vec<String> = slots
        .iter()
        .filter(|(n, _)| !state.contains_key(n))
        .map(|(n, _)| n.clone())
        .collect();
    let unexpected_keys: Vec<String> = state
        .keys()
        .filter(|k| !names.contains(k.as_str()))
        .cloned()
        .collect();

    if strict && (!missing_keys.is_empty() || !unexpected_keys.is_empty()) {
        return Err(CheckpointError::KeyMismatch {
            missing:    missing_keys,
            unexpected: unexpected_keys,
        });
    }

    for (name, slot) in &slots {
        let Some(tensor) = state.get(name) else { continue };
        if !tensor.is_consistent() {
            return Err(CheckpointError::MalformedTensor {
                key:   name.clone(),
                shape: tensor.shape.clone(),
                len:   tensor.data.len(),
            });
        }
        let expected = slot.shape();
        if tensor.shape != expected {
            return Err(CheckpointError::ShapeMismatch {
                key:   name.clone(),
                expected,
                found: tensor.shape.clone(),
            });
        }
    }

    for (name, mut slot) in slots {
        if let Some(tensor) = state.get(&name) {
            slot.assign(tensor);
        }
    }

    Ok(LoadReport { strict, missing_keys, unexpected_keys })
}

/// Snapshot every slot into a state dict.
pub fn snapshot_slots<B: Backend>(slots: &NamedSlots<'_, B>) -> StateDict {
    slots.iter().map(|(n, s)| (n.clone(), s.snapshot())).collect()
}
