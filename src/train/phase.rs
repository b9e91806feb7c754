//! Training phase state machine

use crate::model::ForwardMode;

/// Phase of a training run. Set once per orchestrator invocation and
/// immutable during it; the only data dependency between phases is the
/// encoder weights handed from `EncoderOnly` to `DecoderOrJoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    /// Encoder pretraining: encoder-only forward mode, separate artifacts
    EncoderOnly,
    /// Joint training of the full network (the usual case)
    DecoderOrJoint,
    /// Continue from pretrained weights with only the output layer trainable
    FineTune,
}

impl TrainingPhase {
    pub fn is_encoder(self) -> bool {
        self == TrainingPhase::EncoderOnly
    }

    pub fn forward_mode(self) -> ForwardMode {
        if self.is_encoder() {
            ForwardMode::EncodeOnly
        } else {
            ForwardMode::Full
        }
    }

    /// Rolling checkpoint file name (always overwritten)
    pub fn checkpoint_file(self) -> &'static str {
        if self.is_encoder() {
            "checkpoint_enc.json"
        } else {
            "checkpoint.json"
        }
    }

    /// Best checkpoint file name (overwritten only when improved)
    pub fn best_checkpoint_file(self) -> &'static str {
        if self.is_encoder() {
            "model_best_enc.json"
        } else {
            "model_best.json"
        }
    }

    /// Per-epoch TSV log file name
    pub fn log_file(self) -> &'static str {
        if self.is_encoder() {
            "automated_log_encoder.txt"
        } else {
            "automated_log.txt"
        }
    }

    /// Plain-text best-epoch marker file name
    pub fn best_marker_file(self) -> &'static str {
        if self.is_encoder() {
            "best_encoder.txt"
        } else {
            "best.txt"
        }
    }

    /// Numbered periodic snapshot file name
    pub fn snapshot_file(self, epoch: usize) -> String {
        if self.is_encoder() {
            format!("model_encoder-{epoch:03}.json")
        } else {
            format!("model-{epoch:03}.json")
        }
    }
}
