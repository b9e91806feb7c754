//! Training configuration and the architecture/loss capability bundle
//!
//! Architecture and loss are closed variants resolved once here into
//! capabilities (schedule kind, encoder-phase support, auxiliary state)
//! instead of string tags branched on inside the loop.

use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::optim::LrSchedule;
use crate::train::TrainingPhase;

/// Supported architecture families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum ArchKind {
    Erfnet,
    #[value(name = "erfnet_isomaxplus")]
    ErfnetIsoMaxPlus,
    Bisenet,
    Enet,
}

impl ArchKind {
    pub fn name(self) -> &'static str {
        match self {
            ArchKind::Erfnet => "erfnet",
            ArchKind::ErfnetIsoMaxPlus => "erfnet_isomaxplus",
            ArchKind::Bisenet => "bisenet",
            ArchKind::Enet => "enet",
        }
    }

    /// Whether a separate encoder-pretraining phase exists
    pub fn supports_encoder_phase(self) -> bool {
        matches!(self, ArchKind::Erfnet | ArchKind::ErfnetIsoMaxPlus)
    }

    /// Whether checkpoints carry a secondary loss-module weight set
    pub fn has_aux_state(self) -> bool {
        self == ArchKind::ErfnetIsoMaxPlus
    }

    /// Learning-rate schedule for this family: polynomial decay for the
    /// iterative architectures, step decay for ENet.
    pub fn schedule(self, lr0: f32, total_epochs: usize, fine_tune: bool) -> LrSchedule {
        match self {
            ArchKind::Erfnet | ArchKind::ErfnetIsoMaxPlus | ArchKind::Bisenet => {
                LrSchedule::poly(lr0, total_epochs)
            }
            ArchKind::Enet => LrSchedule::step(lr0, if fine_tune { 7 } else { 100 }, 0.1),
        }
    }
}

/// Supported loss kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum LossKind {
    CrossEntropy,
    Focal,
    LogitNorm,
    IsoMaxPlus,
    Ohem,
}

/// Configuration for one orchestrator invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub arch: ArchKind,
    pub loss: LossKind,
    pub num_classes: usize,
    /// Class excluded from IoU accumulation (typically void)
    pub ignore_index: Option<u32>,
    pub num_epochs: usize,
    pub initial_lr: f32,
    /// Directory receiving checkpoints, logs and snapshots
    pub save_dir: PathBuf,
    /// Continue from the rolling checkpoint in `save_dir`
    pub resume: bool,
    /// Freeze everything but the output layer and start from `fine_tune_weights`
    pub fine_tune: bool,
    pub fine_tune_weights: Option<PathBuf>,
    /// Run the encoder-only phase before joint training
    pub pretrain_encoder: bool,
    /// Accumulate IoU during the train pass (slower)
    pub iou_train: bool,
    /// Accumulate IoU during the val pass
    pub iou_val: bool,
    /// Print the running loss every N batches, 0 to disable
    pub steps_loss: usize,
    /// Write a numbered model snapshot every N epochs, 0 to disable
    pub epochs_save: usize,
    /// Seed for all random state in the run
    pub seed: u64,
}

impl TrainConfig {
    pub fn new(arch: ArchKind, loss: LossKind, num_classes: usize, save_dir: impl Into<PathBuf>) -> Self {
        Self {
            arch,
            loss,
            num_classes,
            ignore_index: None,
            num_epochs: 1,
            initial_lr: 5e-4,
            save_dir: save_dir.into(),
            resume: false,
            fine_tune: false,
            fine_tune_weights: None,
            pretrain_encoder: false,
            iou_train: false,
            iou_val: true,
            steps_loss: 0,
            epochs_save: 0,
            seed: 42,
        }
    }

    #[must_use]
    pub fn with_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    #[must_use]
    pub fn with_lr(mut self, lr: f32) -> Self {
        self.initial_lr = lr;
        self
    }

    #[must_use]
    pub fn with_ignore_index(mut self, index: u32) -> Self {
        self.ignore_index = Some(index);
        self
    }

    #[must_use]
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    #[must_use]
    pub fn with_fine_tune(mut self, weights: impl Into<PathBuf>) -> Self {
        self.fine_tune = true;
        self.fine_tune_weights = Some(weights.into());
        self
    }

    #[must_use]
    pub fn with_encoder_pretraining(mut self) -> Self {
        self.pretrain_encoder = true;
        self
    }

    #[must_use]
    pub fn with_iou(mut self, train: bool, val: bool) -> Self {
        self.iou_train = train;
        self.iou_val = val;
        self
    }

    #[must_use]
    pub fn with_snapshot_every(mut self, epochs: usize) -> Self {
        self.epochs_save = epochs;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Reject incompatible combinations before any state is written.
    pub fn validate(&self) -> Result<()> {
        if self.loss == LossKind::IsoMaxPlus && self.arch != ArchKind::ErfnetIsoMaxPlus {
            return Err(Error::Config(
                "IsoMaxPlus loss requires the erfnet_isomaxplus architecture".to_string(),
            ));
        }
        if self.fine_tune && self.fine_tune_weights.is_none() {
            return Err(Error::Config(
                "fine-tuning requires an initial weight file".to_string(),
            ));
        }
        if self.fine_tune && self.pretrain_encoder {
            return Err(Error::Config(
                "fine-tuning and encoder pretraining are mutually exclusive".to_string(),
            ));
        }
        if self.num_epochs == 0 {
            return Err(Error::Config("num_epochs must be at least 1".to_string()));
        }
        if self.num_classes == 0 {
            return Err(Error::Config("num_classes must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Phase the run starts in
    pub fn starting_phase(&self) -> TrainingPhase {
        if self.fine_tune {
            TrainingPhase::FineTune
        } else if self.pretrain_encoder && self.arch.supports_encoder_phase() {
            TrainingPhase::EncoderOnly
        } else {
            TrainingPhase::DecoderOrJoint
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isomaxplus_loss_requires_matching_arch() {
        let config = TrainConfig::new(ArchKind::Erfnet, LossKind::IsoMaxPlus, 20, "/tmp/run");
        assert!(config.validate().is_err());

        let ok = TrainConfig::new(ArchKind::ErfnetIsoMaxPlus, LossKind::IsoMaxPlus, 20, "/tmp/run");
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_fine_tune_needs_weights() {
        let mut config = TrainConfig::new(ArchKind::Enet, LossKind::CrossEntropy, 20, "/tmp/run");
        config.fine_tune = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_starting_phase_resolution() {
        let base = TrainConfig::new(ArchKind::Erfnet, LossKind::CrossEntropy, 20, "/tmp/run");
        assert_eq!(base.starting_phase(), TrainingPhase::DecoderOrJoint);

        let enc = base.clone().with_encoder_pretraining();
        assert_eq!(enc.starting_phase(), TrainingPhase::EncoderOnly);

        // ENet has no encoder phase; the flag is ignored.
        let enet = TrainConfig::new(ArchKind::Enet, LossKind::CrossEntropy, 20, "/tmp/run")
            .with_encoder_pretraining();
        assert_eq!(enet.starting_phase(), TrainingPhase::DecoderOrJoint);

        let ft = base.with_fine_tune("/tmp/weights.json");
        assert_eq!(ft.starting_phase(), TrainingPhase::FineTune);
    }

    #[test]
    fn test_schedule_capability() {
        assert_eq!(
            ArchKind::Erfnet.schedule(1.0, 100, false),
            LrSchedule::poly(1.0, 100)
        );
        assert_eq!(
            ArchKind::Enet.schedule(1.0, 100, false),
            LrSchedule::step(1.0, 100, 0.1)
        );
        assert_eq!(
            ArchKind::Enet.schedule(1.0, 100, true),
            LrSchedule::step(1.0, 7, 0.1)
        );
    }
}
