//! Training orchestration
//!
//! The orchestrator drives the phase state machine (optional encoder-only
//! pretraining, then decoder/joint training, or a fine-tune phase), owns
//! the epoch loop, invokes the optimizer and the IoU accumulator, and
//! persists rolling/best checkpoints plus the per-epoch log.

mod config;
mod log;
mod orchestrator;
mod phase;

pub use config::{ArchKind, LossKind, TrainConfig};
pub use log::{EpochRecord, TrainingLog};
pub use orchestrator::{AttachDecoder, BestMetricState, Orchestrator};
pub use phase::TrainingPhase;
