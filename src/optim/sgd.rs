//! Stochastic gradient descent with momentum and weight decay

use std::collections::BTreeMap;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use super::Optimizer;
use crate::error::{Error, Result};
use crate::model::ParamMap;

/// SGD optimizer. With momentum > 0 a per-parameter velocity is kept:
/// `v = momentum * v - lr * g`, `p += v`.
pub struct Sgd {
    lr: f32,
    momentum: f32,
    weight_decay: f32,
    velocities: BTreeMap<String, ArrayD<f32>>,
}

#[derive(Serialize, Deserialize)]
struct SgdState {
    lr: f32,
    momentum: f32,
    weight_decay: f32,
    velocities: BTreeMap<String, ArrayD<f32>>,
}

impl Sgd {
    pub fn new(lr: f32, momentum: f32) -> Self {
        Self {
            lr,
            momentum,
            weight_decay: 0.0,
            velocities: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut ParamMap, grads: &ParamMap) {
        for (name, grad) in grads {
            let Some(param) = params.get_mut(name) else {
                continue;
            };
            if param.shape() != grad.shape() {
                continue;
            }

            let mut g = grad.clone();
            if self.weight_decay > 0.0 {
                g = g + &*param * self.weight_decay;
            }

            if self.momentum > 0.0 {
                let velocity = match self.velocities.remove(name) {
                    Some(v) => v * self.momentum - &g * self.lr,
                    None => &g * (-self.lr),
                };
                *param += &velocity;
                self.velocities.insert(name.clone(), velocity);
            } else {
                *param -= &(&g * self.lr);
            }
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn reset(&mut self) {
        self.velocities.clear();
    }

    fn state(&self) -> serde_json::Value {
        serde_json::to_value(SgdState {
            lr: self.lr,
            momentum: self.momentum,
            weight_decay: self.weight_decay,
            velocities: self.velocities.clone(),
        })
        .unwrap_or(serde_json::Value::Null)
    }

    fn load_state(&mut self, state: serde_json::Value) -> Result<()> {
        let state: SgdState = serde_json::from_value(state)
            .map_err(|e| Error::Serialization(format!("SGD state restore failed: {e}")))?;
        self.lr = state.lr;
        self.momentum = state.momentum;
        self.weight_decay = state.weight_decay;
        self.velocities = state.velocities;
        Ok(())
    }
}
