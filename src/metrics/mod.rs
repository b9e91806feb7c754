//! Evaluation metrics
//!
//! Intersection-over-union accumulated from a per-class confusion state
//! across batches. Undefined classes (never present, never predicted)
//! stay undefined; they never bias the mean toward zero.

mod iou;

pub use iou::{IouAccumulator, IouSummary};
