//! External collaborator contracts
//!
//! The trainer and the statistics passes never know a concrete network or
//! loss. They see three seams: a `Model` that maps image batches to
//! per-pixel class scores, a `Criterion` that turns scores and targets
//! into a scalar loss plus named parameter gradients, and a `BatchLoader`
//! that yields finite, restartable batch sequences.

use std::collections::BTreeMap;

use ndarray::{Array3, Array4, ArrayD};

/// Named parameter set: unique key to shaped weight array.
///
/// A `BTreeMap` so every traversal (checkpointing, reconciliation,
/// optimizer steps) sees the same total key order.
pub type ParamMap = BTreeMap<String, ArrayD<f32>>;

/// Per-pixel class scores for one batch, laid out `(N, C, H, W)`.
pub type ScoreMap = Array4<f32>;

/// Ground-truth class labels for one batch, laid out `(N, H, W)`.
pub type LabelMap = Array3<u32>;

/// Forward-pass mode for architectures with a separable encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// Full encoder + decoder pass
    Full,
    /// Encoder-only pass (encoder pretraining phase)
    EncodeOnly,
}

/// One (images, labels) batch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Input images, `(N, C, H, W)`
    pub images: Array4<f32>,
    /// Ground-truth label maps, `(N, H, W)`
    pub labels: LabelMap,
}

impl Batch {
    pub fn new(images: Array4<f32>, labels: LabelMap) -> Self {
        Self { images, labels }
    }

    /// Number of images in the batch
    pub fn len(&self) -> usize {
        self.images.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scalar loss plus the parameter gradients that produced it.
///
/// Gradient computation belongs to the collaborator: the orchestrator
/// only filters frozen names and hands the rest to the optimizer.
#[derive(Debug, Clone)]
pub struct LossOutput {
    pub loss: f32,
    pub grads: ParamMap,
}

/// A segmentation model as the trainer sees it.
///
/// Implementations own their parameters; the trainer moves weights in
/// and out through the named-parameter mapping only.
pub trait Model {
    /// Architecture tag recorded in checkpoints
    fn architecture(&self) -> &str;

    /// Run the model on a batch of images.
    ///
    /// Returns one score map per output head, principal head first.
    /// Architectures without auxiliary heads return a single element.
    fn forward(&self, images: &Array4<f32>, mode: ForwardMode) -> Vec<ScoreMap>;

    /// Snapshot of all named parameters
    fn state_dict(&self) -> ParamMap;

    /// Replace parameters by name. Keys absent from the model are ignored;
    /// reconciliation decides what reaches this point.
    fn load_state_dict(&mut self, weights: ParamMap);

    /// Names of the final classification/output-layer parameters.
    ///
    /// Fine-tuning freezes everything else; the naming convention is the
    /// architecture's own.
    fn output_parameter_names(&self) -> Vec<String>;

    /// Secondary loss-module weights, for architectures that carry one
    fn aux_state_dict(&self) -> Option<ParamMap> {
        None
    }

    /// Restore secondary loss-module weights
    fn load_aux_state_dict(&mut self, _weights: ParamMap) {}

    /// Switch between training and evaluation behavior. Most models have
    /// none and keep the default no-op.
    fn set_train(&mut self, _train: bool) {}
}

/// A loss function as the trainer sees it.
pub trait Criterion {
    /// Compute the scalar loss and parameter gradients for one batch.
    ///
    /// `outputs` holds every head the model produced for `batch.images`;
    /// multi-head criteria sum the principal and auxiliary losses
    /// (summation, not averaging). The batch is passed whole because
    /// analytic gradients generally need the inputs as well as the
    /// targets.
    fn compute(&self, model: &dyn Model, batch: &Batch, outputs: &[ScoreMap]) -> LossOutput;
}

/// A finite, restartable source of batches. One full traversal is one
/// epoch or one statistics pass.
pub trait BatchLoader {
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_>;
}

/// Per-pixel argmax over the channel axis of a score map.
pub fn argmax_classes(scores: &ScoreMap) -> LabelMap {
    let (n, c, h, w) = scores.dim();
    Array3::from_shape_fn((n, h, w), |(i, y, x)| {
        let mut best = 0usize;
        let mut best_score = scores[[i, 0, y, x]];
        for k in 1..c {
            let s = scores[[i, k, y, x]];
            if s > best_score {
                best_score = s;
                best = k;
            }
        }
        best as u32
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_argmax_picks_highest_channel() {
        let mut scores = Array4::<f32>::zeros((1, 3, 2, 2));
        scores[[0, 2, 0, 0]] = 1.0;
        scores[[0, 1, 0, 1]] = 0.5;
        scores[[0, 0, 1, 0]] = 0.1;

        let classes = argmax_classes(&scores);
        assert_eq!(classes[[0, 0, 0]], 2);
        assert_eq!(classes[[0, 0, 1]], 1);
        assert_eq!(classes[[0, 1, 0]], 0);
        // All-zero scores tie-break to channel 0
        assert_eq!(classes[[0, 1, 1]], 0);
    }

    #[test]
    fn test_batch_len() {
        let batch = Batch::new(
            Array4::zeros((2, 3, 4, 4)),
            Array3::zeros((2, 4, 4)),
        );
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
    }
}
