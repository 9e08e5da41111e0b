//! AdamW with decoupled weight decay, and global gradient-norm clipping.
//!
//! Moments are kept per named variable so the optimizer state can be written
//! into a checkpoint and restored for resumed training.

use std::collections::BTreeMap;

use candle_core::backprop::GradStore;
use candle_core::{Device, Tensor, Var};
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;
use crate::model::{ModelResult, TensorRecord};

/// AdamW hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamWParams {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for AdamWParams {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.01,
        }
    }
}

struct Slot {
    name: String,
    var: Var,
    first: Tensor,
    second: Tensor,
}

/// Serializable optimizer state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdamWState {
    pub params: AdamWParams,
    pub step: u64,
    pub first_moments: BTreeMap<String, TensorRecord>,
    pub second_moments: BTreeMap<String, TensorRecord>,
}

pub struct AdamW {
    slots: Vec<Slot>,
    params: AdamWParams,
    step: u64,
}

impl AdamW {
    /// Optimize `vars`, visited in name order.
    pub fn new(vars: Vec<(String, Var)>, params: AdamWParams) -> ModelResult<Self> {
        let mut vars = vars;
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        let slots = vars
            .into_iter()
            .map(|(name, var)| {
                let first = var.zeros_like()?;
                let second = var.zeros_like()?;
                Ok(Slot {
                    name,
                    var,
                    first,
                    second,
                })
            })
            .collect::<ModelResult<Vec<_>>>()?;
        Ok(Self {
            slots,
            params,
            step: 0,
        })
    }

    pub fn vars(&self) -> impl Iterator<Item = &Var> + Clone {
        self.slots.iter().map(|s| &s.var)
    }

    pub fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr;
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    /// Apply one update from `grads`. Variables without a gradient are left alone.
    pub fn step(&mut self, grads: &GradStore) -> ModelResult<()> {
        self.step += 1;
        let p = self.params;
        let bias1 = 1.0 - p.beta1.powi(self.step as i32);
        let bias2 = 1.0 - p.beta2.powi(self.step as i32);
        let decay = 1.0 - p.lr * p.weight_decay;

        for slot in &mut self.slots {
            let theta = slot.var.as_tensor();
            let Some(grad) = grads.get(theta) else {
                continue;
            };
            let first = ((&slot.first * p.beta1)? + (grad * (1.0 - p.beta1))?)?;
            let second = ((&slot.second * p.beta2)? + (grad.sqr()? * (1.0 - p.beta2))?)?;
            let m_hat = (&first / bias1)?;
            let v_hat = (&second / bias2)?;
            let update = (m_hat / (v_hat.sqrt()? + p.eps)?)?;
            let next = ((theta * decay)? - (update * p.lr)?)?;
            slot.var.set(&next.detach())?;
            slot.first = first.detach();
            slot.second = second.detach();
        }
        Ok(())
    }

    /// Snapshot moments and step count.
    pub fn state(&self) -> ModelResult<AdamWState> {
        let mut first_moments = BTreeMap::new();
        let mut second_moments = BTreeMap::new();
        for slot in &self.slots {
            first_moments.insert(slot.name.clone(), TensorRecord::from_tensor(&slot.first)?);
            second_moments.insert(slot.name.clone(), TensorRecord::from_tensor(&slot.second)?);
        }
        Ok(AdamWState {
            params: self.params,
            step: self.step,
            first_moments,
            second_moments,
        })
    }

    /// Restore moments saved by [`AdamW::state`].
    pub fn load_state(&mut self, state: &AdamWState, device: &Device) -> Result<(), CheckpointError> {
        for slot in &mut self.slots {
            let missing = || CheckpointError::MissingTensor {
                name: format!("optimizer/{}", slot.name),
            };
            let first = state.first_moments.get(&slot.name).ok_or_else(missing)?;
            let second = state.second_moments.get(&slot.name).ok_or_else(missing)?;
            slot.first = first.to_tensor(device)?;
            slot.second = second.to_tensor(device)?;
        }
        self.params = state.params;
        self.step = state.step;
        Ok(())
    }
}

/// Scale all gradients so their global L2 norm is at most `max_norm`.
///
/// Returns the norm before clipping.
pub fn clip_grad_norm<'a>(
    grads: &mut GradStore,
    vars: impl Iterator<Item = &'a Var> + Clone,
    max_norm: f64,
) -> ModelResult<f64> {
    let mut total = 0.0f64;
    for var in vars.clone() {
        if let Some(g) = grads.get(var.as_tensor()) {
            total += g.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    let norm = total.sqrt();
    if norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        for var in vars {
            if let Some(g) = grads.get(var.as_tensor()) {
                let scaled = (g * scale)?;
                grads.insert(var.as_tensor(), scaled);
            }
        }
    }
    Ok(norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic_loss(var: &Var) -> Tensor {
        // (x - 3)^2 summed; minimum at x = 3.
        (var.as_tensor() - 3.0).unwrap().sqr().unwrap().sum_all().unwrap()
    }

    #[test]
    fn adamw_descends_on_a_quadratic() {
        let var = Var::new(&[0.0f32, 1.0], &Device::Cpu).unwrap();
        let mut opt = AdamW::new(
            vec![("x".into(), var.clone())],
            AdamWParams {
                lr: 0.1,
                weight_decay: 0.0,
                ..Default::default()
            },
        )
        .unwrap();
        let before = quadratic_loss(&var).to_scalar::<f32>().unwrap();
        for _ in 0..50 {
            let grads = quadratic_loss(&var).backward().unwrap();
            opt.step(&grads).unwrap();
        }
        let after = quadratic_loss(&var).to_scalar::<f32>().unwrap();
        assert!(after < before * 0.1, "{before} -> {after}");
        assert_eq!(opt.step_count(), 50);
    }

    #[test]
    fn clipping_bounds_the_norm() {
        let var = Var::new(&[0.0f32, 0.0], &Device::Cpu).unwrap();
        // d/dx (x - 3)^2 at 0 = -6 per element, norm = 6 * sqrt(2).
        let mut grads = quadratic_loss(&var).backward().unwrap();
        let norm = clip_grad_norm(&mut grads, [&var].into_iter(), 1.0).unwrap();
        assert!((norm - 6.0 * 2f64.sqrt()).abs() < 1e-4);
        let g = grads.get(var.as_tensor()).unwrap();
        let clipped = g.sqr().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap().sqrt();
        assert!((clipped - 1.0).abs() < 1e-3);
    }

    #[test]
    fn state_round_trips() {
        let var = Var::new(&[0.5f32, -0.5], &Device::Cpu).unwrap();
        let mut opt = AdamW::new(vec![("x".into(), var.clone())], AdamWParams::default()).unwrap();
        let grads = quadratic_loss(&var).backward().unwrap();
        opt.step(&grads).unwrap();
        let state = opt.state().unwrap();

        let other = Var::new(&[0.5f32, -0.5], &Device::Cpu).unwrap();
        let mut restored =
            AdamW::new(vec![("x".into(), other)], AdamWParams::default()).unwrap();
        restored.load_state(&state, &Device::Cpu).unwrap();
        assert_eq!(restored.step_count(), 1);
        let again = restored.state().unwrap();
        assert_eq!(again.first_moments["x"], state.first_moments["x"]);
    }

    #[test]
    fn missing_moment_is_reported() {
        let var = Var::new(&[1.0f32], &Device::Cpu).unwrap();
        let mut opt = AdamW::new(vec![("y".into(), var)], AdamWParams::default()).unwrap();
        let empty = AdamWState {
            params: AdamWParams::default(),
            step: 3,
            first_moments: BTreeMap::new(),
            second_moments: BTreeMap::new(),
        };
        let err = opt.load_state(&empty, &Device::Cpu).unwrap_err();
        assert!(matches!(err, CheckpointError::MissingTensor { .. }));
    }
}
