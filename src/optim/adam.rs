//! Adam optimizer

use std::collections::BTreeMap;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use super::Optimizer;
use crate::error::{Error, Result};
use crate::model::ParamMap;

/// Adam with bias-corrected first and second moment estimates and
/// optional decoupled weight decay.
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    t: u64,
    m: BTreeMap<String, ArrayD<f32>>,
    v: BTreeMap<String, ArrayD<f32>>,
}

#[derive(Serialize, Deserialize)]
struct AdamState {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    t: u64,
    m: BTreeMap<String, ArrayD<f32>>,
    v: BTreeMap<String, ArrayD<f32>>,
}

impl Adam {
    pub fn new(lr: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay: 0.0,
            t: 0,
            m: BTreeMap::new(),
            v: BTreeMap::new(),
        }
    }

    /// Adam with the usual betas and epsilon
    pub fn default_betas(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8)
    }

    #[must_use]
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut ParamMap, grads: &ParamMap) {
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);

        for (name, grad) in grads {
            let Some(param) = params.get_mut(name) else {
                continue;
            };
            if param.shape() != grad.shape() {
                continue;
            }

            let m = self
                .m
                .entry(name.clone())
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
            let v = self
                .v
                .entry(name.clone())
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));

            m.zip_mut_with(grad, |mi, &gi| {
                *mi = self.beta1 * *mi + (1.0 - self.beta1) * gi;
            });
            v.zip_mut_with(grad, |vi, &gi| {
                *vi = self.beta2 * *vi + (1.0 - self.beta2) * gi * gi;
            });

            let lr = self.lr;
            let eps = self.eps;
            let weight_decay = self.weight_decay;
            ndarray::Zip::from(&mut *param)
                .and(&*m)
                .and(&*v)
                .for_each(|p, &mi, &vi| {
                    let m_hat = mi / bc1;
                    let v_hat = vi / bc2;
                    *p -= lr * (m_hat / (v_hat.sqrt() + eps) + weight_decay * *p);
                });
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn reset(&mut self) {
        self.t = 0;
        self.m.clear();
        self.v.clear();
    }

    fn state(&self) -> serde_json::Value {
        serde_json::to_value(AdamState {
            lr: self.lr,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.eps,
            weight_decay: self.weight_decay,
            t: self.t,
            m: self.m.clone(),
            v: self.v.clone(),
        })
        .unwrap_or(serde_json::Value::Null)
    }

    fn load_state(&mut self, state: serde_json::Value) -> Result<()> {
        let state: AdamState = serde_json::from_value(state)
            .map_err(|e| Error::Serialization(format!("Adam state restore failed: {e}")))?;
        self.lr = state.lr;
        self.beta1 = state.beta1;
        self.beta2 = state.beta2;
        self.eps = state.eps;
        self.weight_decay = state.weight_decay;
        self.t = state.t;
        self.m = state.m;
        self.v = state.v;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn single_param(value: f32) -> ParamMap {
        let mut map = ParamMap::new();
        map.insert("w".to_string(), ArrayD::from_elem(vec![1], value));
        map
    }

    #[test]
    fn test_first_step_moves_by_about_lr() {
        // With bias correction the first Adam step is ~lr in the gradient
        // direction regardless of gradient magnitude.
        let mut opt = Adam::default_betas(0.01);
        let mut params = single_param(1.0);
        let grads = single_param(5.0);

        opt.step(&mut params, &grads);
        assert_abs_diff_eq!(params["w"][[0]], 0.99, epsilon = 1e-4);
    }

    #[test]
    fn test_descends_on_quadratic() {
        // Minimize (w - 3)^2 / 2; grad = w - 3.
        let mut opt = Adam::default_betas(0.1);
        let mut params = single_param(0.0);

        for _ in 0..200 {
            let w = params["w"][[0]];
            let mut grads = ParamMap::new();
            grads.insert("w".to_string(), ArrayD::from_elem(vec![1], w - 3.0));
            opt.step(&mut params, &grads);
        }
        assert_abs_diff_eq!(params["w"][[0]], 3.0, epsilon = 0.05);
    }

    #[test]
    fn test_state_round_trip() {
        let mut opt = Adam::default_betas(0.01);
        let mut params = single_param(1.0);
        let grads = single_param(1.0);
        opt.step(&mut params, &grads);

        let mut restored = Adam::default_betas(0.0);
        restored.load_state(opt.state()).unwrap();

        let mut p1 = params.clone();
        let mut p2 = params.clone();
        opt.step(&mut p1, &grads);
        restored.step(&mut p2, &grads);
        assert_abs_diff_eq!(p1["w"][[0]], p2["w"][[0]], epsilon = 1e-6);
    }

    #[test]
    fn test_reset_matches_a_fresh_optimizer() {
        let mut warmed = Adam::default_betas(0.01);
        let mut params = single_param(1.0);
        let grads = single_param(5.0);
        for _ in 0..3 {
            warmed.step(&mut params, &grads);
        }

        warmed.reset();
        let mut fresh = Adam::default_betas(0.01);
        let mut p1 = single_param(1.0);
        let mut p2 = single_param(1.0);
        warmed.step(&mut p1, &grads);
        fresh.step(&mut p2, &grads);
        assert_abs_diff_eq!(p1["w"][[0]], p2["w"][[0]], epsilon = 1e-7);
    }

    #[test]
    fn test_load_state_rejects_garbage() {
        let mut opt = Adam::default_betas(0.01);
        assert!(opt.load_state(serde_json::json!({"bogus": 1})).is_err());
    }
}
