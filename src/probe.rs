//! Linear per-pixel probe
//!
//! A minimal concrete model: one 1x1-convolution-equivalent linear map
//! from input channels to class scores, shared across all pixels. It
//! exists so the binary and the integration tests have a real model and
//! an analytically differentiable loss to drive the trainer with; the
//! segmentation networks themselves live outside this crate and plug in
//! through the same traits.

use ndarray::{Array1, Array2, Array4};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::model::{Batch, Criterion, ForwardMode, LossOutput, Model, ParamMap, ScoreMap};

const WEIGHT_KEY: &str = "output_conv.weight";
const BIAS_KEY: &str = "output_conv.bias";

/// Per-pixel linear classifier, `scores = W * pixel + b`.
pub struct LinearProbe {
    arch: String,
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl LinearProbe {
    /// Small uniform random initialization, reproducible from the seed.
    pub fn new(arch: impl Into<String>, in_channels: usize, num_classes: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let dist = Uniform::new(-0.1f32, 0.1f32);
        Self {
            arch: arch.into(),
            weight: Array2::from_shape_fn((num_classes, in_channels), |_| dist.sample(&mut rng)),
            bias: Array1::zeros(num_classes),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.weight.nrows()
    }

    pub fn in_channels(&self) -> usize {
        self.weight.ncols()
    }
}

impl Model for LinearProbe {
    fn architecture(&self) -> &str {
        &self.arch
    }

    // The probe has no separable decoder; encode-only and full passes
    // produce the same single head.
    fn forward(&self, images: &Array4<f32>, _mode: ForwardMode) -> Vec<ScoreMap> {
        let (n, c, h, w) = images.dim();
        let k = self.num_classes();
        let mut scores = Array4::<f32>::zeros((n, k, h, w));
        for i in 0..n {
            for y in 0..h {
                for x in 0..w {
                    for class in 0..k {
                        let mut s = self.bias[class];
                        for ch in 0..c.min(self.in_channels()) {
                            s += self.weight[[class, ch]] * images[[i, ch, y, x]];
                        }
                        scores[[i, class, y, x]] = s;
                    }
                }
            }
        }
        vec![scores]
    }

    fn state_dict(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.insert(WEIGHT_KEY.to_string(), self.weight.clone().into_dyn());
        params.insert(BIAS_KEY.to_string(), self.bias.clone().into_dyn());
        params
    }

    fn load_state_dict(&mut self, weights: ParamMap) {
        for (name, value) in weights {
            match name.as_str() {
                WEIGHT_KEY => {
                    if let Ok(w) = value.into_dimensionality() {
                        self.weight = w;
                    }
                }
                BIAS_KEY => {
                    if let Ok(b) = value.into_dimensionality() {
                        self.bias = b;
                    }
                }
                _ => {}
            }
        }
    }

    fn output_parameter_names(&self) -> Vec<String> {
        vec![WEIGHT_KEY.to_string(), BIAS_KEY.to_string()]
    }
}

/// Squared error against one-hot targets, with analytic gradients for
/// the probe's two parameters.
///
/// Pixels whose label falls outside the class range contribute nothing.
/// Multi-head outputs are summed, matching how auxiliary losses combine.
/// With class weights set, each pixel's error is scaled by the weight of
/// its ground-truth class, so rare classes pull harder on the gradients.
#[derive(Default)]
pub struct SquaredError {
    class_weights: Option<Vec<f32>>,
}

impl SquaredError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Weight each pixel by its ground-truth class
    pub fn with_class_weights(weights: Vec<f64>) -> Self {
        Self {
            class_weights: Some(weights.into_iter().map(|w| w as f32).collect()),
        }
    }

    fn weight_of(&self, label: usize) -> f32 {
        match &self.class_weights {
            Some(w) => w.get(label).copied().unwrap_or(1.0),
            None => 1.0,
        }
    }
}

impl Criterion for SquaredError {
    fn compute(&self, _model: &dyn Model, batch: &Batch, outputs: &[ScoreMap]) -> LossOutput {
        let k = outputs[0].dim().1;
        let in_channels = batch.images.dim().1;
        let mut loss = 0.0f32;
        let mut grad_w = Array2::<f32>::zeros((k, in_channels));
        let mut grad_b = Array1::<f32>::zeros(k);

        for scores in outputs {
            let (n, _, h, w) = scores.dim();
            let mut valid = 0u64;
            let mut head_loss = 0.0f32;
            let mut head_gw = Array2::<f32>::zeros((k, in_channels));
            let mut head_gb = Array1::<f32>::zeros(k);

            for i in 0..n {
                for y in 0..h {
                    for x in 0..w {
                        let label = batch.labels[[i, y, x]] as usize;
                        if label >= k {
                            continue;
                        }
                        valid += 1;
                        let weight = self.weight_of(label);
                        for class in 0..k {
                            let target = if class == label { 1.0 } else { 0.0 };
                            let r = scores[[i, class, y, x]] - target;
                            head_loss += weight * r * r;
                            head_gb[class] += 2.0 * weight * r;
                            for ch in 0..in_channels {
                                head_gw[[class, ch]] +=
                                    2.0 * weight * r * batch.images[[i, ch, y, x]];
                            }
                        }
                    }
                }
            }

            if valid > 0 {
                let norm = valid as f32;
                loss += head_loss / norm;
                grad_w += &(head_gw / norm);
                grad_b += &(head_gb / norm);
            }
        }

        let mut grads = ParamMap::new();
        grads.insert(WEIGHT_KEY.to_string(), grad_w.into_dyn());
        grads.insert(BIAS_KEY.to_string(), grad_b.into_dyn());
        LossOutput { loss, grads }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::{Optimizer, Sgd};
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn separable_batch() -> Batch {
        // Channel 0 lights up where the label is 0, channel 1 where it is 1.
        let mut images = Array4::<f32>::zeros((1, 2, 2, 2));
        let labels = Array3::from_shape_fn((1, 2, 2), |(_, y, _)| y as u32);
        for y in 0..2 {
            for x in 0..2 {
                images[[0, y, y, x]] = 1.0;
            }
        }
        Batch::new(images, labels)
    }

    #[test]
    fn test_forward_shape_and_determinism() {
        let probe = LinearProbe::new("probe", 2, 3, 7);
        let images = Array4::<f32>::zeros((2, 2, 4, 5));
        let out = probe.forward(&images, ForwardMode::Full);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dim(), (2, 3, 4, 5));

        let again = LinearProbe::new("probe", 2, 3, 7);
        assert_eq!(probe.state_dict(), again.state_dict());
    }

    #[test]
    fn test_state_dict_round_trip() {
        let probe = LinearProbe::new("probe", 2, 2, 1);
        let mut other = LinearProbe::new("probe", 2, 2, 2);
        other.load_state_dict(probe.state_dict());
        assert_eq!(probe.state_dict(), other.state_dict());
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let probe = LinearProbe::new("probe", 2, 2, 3);
        let batch = separable_batch();
        let outputs = probe.forward(&batch.images, ForwardMode::Full);
        let result = SquaredError::new().compute(&probe, &batch, &outputs);

        let eps = 1e-3f32;
        let mut params = probe.state_dict();
        let base = result.loss;
        let analytic = result.grads[WEIGHT_KEY][[0, 0]];

        if let Some(w) = params.get_mut(WEIGHT_KEY) {
            w[[0, 0]] += eps;
        }
        let mut bumped = LinearProbe::new("probe", 2, 2, 3);
        bumped.load_state_dict(params);
        let outputs = bumped.forward(&batch.images, ForwardMode::Full);
        let bumped_loss = SquaredError::new().compute(&bumped, &batch, &outputs).loss;

        let numeric = (bumped_loss - base) / eps;
        assert_relative_eq!(analytic, numeric, epsilon = 1e-2);
    }

    #[test]
    fn test_class_weights_scale_loss_and_gradients() {
        let probe = LinearProbe::new("probe", 2, 2, 3);
        let batch = separable_batch();
        let outputs = probe.forward(&batch.images, ForwardMode::Full);

        let plain = SquaredError::new().compute(&probe, &batch, &outputs);
        let doubled = SquaredError::with_class_weights(vec![2.0, 2.0])
            .compute(&probe, &batch, &outputs);
        assert_relative_eq!(doubled.loss, 2.0 * plain.loss, epsilon = 1e-6);
        assert_relative_eq!(
            doubled.grads[WEIGHT_KEY][[0, 0]],
            2.0 * plain.grads[WEIGHT_KEY][[0, 0]],
            epsilon = 1e-6
        );

        // Uneven weights shift the balance toward the heavier class.
        let skewed = SquaredError::with_class_weights(vec![2.0, 1.0])
            .compute(&probe, &batch, &outputs);
        assert!(skewed.loss > plain.loss);
        assert!(skewed.loss < doubled.loss);
    }

    #[test]
    fn test_descent_reduces_loss() {
        let mut probe = LinearProbe::new("probe", 2, 2, 5);
        let batch = separable_batch();
        let mut sgd = Sgd::new(0.1, 0.0);

        let outputs = probe.forward(&batch.images, ForwardMode::Full);
        let first = SquaredError::new().compute(&probe, &batch, &outputs).loss;

        for _ in 0..50 {
            let outputs = probe.forward(&batch.images, ForwardMode::Full);
            let result = SquaredError::new().compute(&probe, &batch, &outputs);
            let mut params = probe.state_dict();
            sgd.step(&mut params, &result.grads);
            probe.load_state_dict(params);
        }

        let outputs = probe.forward(&batch.images, ForwardMode::Full);
        let last = SquaredError::new().compute(&probe, &batch, &outputs).loss;
        assert!(last < first * 0.1, "loss {first} -> {last}");

        // The separable fixture is learnable to a perfect prediction.
        let classes = crate::model::argmax_classes(&outputs[0]);
        assert_eq!(classes, batch.labels);
    }
}
