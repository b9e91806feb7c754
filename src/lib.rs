//! Segmentar: phased semantic-segmentation training and feature statistics
//!
//! The crate trains segmentation models in phases (optional encoder-only
//! pretraining followed by joint training, or output-layer fine-tuning),
//! resumes interrupted runs from rolling checkpoints, reconciles weight
//! sets across architecture variants, tracks per-epoch IoU from a
//! confusion matrix, estimates per-class loss weights, and computes the
//! per-class mean / pooled covariance statistics behind a
//! Mahalanobis-distance out-of-distribution scorer.
//!
//! Models, losses and data sources plug in through the [`model::Model`],
//! [`model::Criterion`] and [`model::BatchLoader`] traits; the
//! [`train::Orchestrator`] owns the epoch loop and the checkpoint
//! lifecycle.

pub mod checkpoint;
pub mod cli;
pub mod data;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod optim;
pub mod probe;
pub mod stats;
pub mod train;
pub mod weights;

pub use error::{Error, Result};
pub use model::{Batch, BatchLoader, Criterion, ForwardMode, LabelMap, Model, ParamMap, ScoreMap};
pub use train::{ArchKind, LossKind, Orchestrator, TrainConfig};
