//! Optimizers and learning-rate schedules
//!
//! Optimizers update the named parameter map from externally computed
//! gradients and expose their state as an opaque JSON blob so the
//! checkpoint store can persist it without knowing the algorithm.

mod adam;
mod scheduler;
mod sgd;

pub use adam::Adam;
pub use scheduler::LrSchedule;
pub use sgd::Sgd;

use crate::error::Result;
use crate::model::ParamMap;

/// Trait for optimization algorithms
pub trait Optimizer {
    /// Apply one update step. Gradients are keyed by parameter name;
    /// parameters without a gradient entry are left untouched.
    fn step(&mut self, params: &mut ParamMap, grads: &ParamMap);

    /// Current learning rate
    fn lr(&self) -> f32;

    /// Set learning rate (schedules call this once per epoch)
    fn set_lr(&mut self, lr: f32);

    /// Discard accumulated state (moments, velocities, step counts),
    /// keeping the hyper-parameters. Called at phase boundaries.
    fn reset(&mut self);

    /// Snapshot internal state as an opaque blob for checkpointing
    fn state(&self) -> serde_json::Value;

    /// Restore internal state from a checkpoint blob
    fn load_state(&mut self, state: serde_json::Value) -> Result<()>;
}
