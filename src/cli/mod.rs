//! Command-line interface
//!
//! Two subcommands: `train` drives the phased training orchestrator over
//! a JSON fixture dataset, `stats` runs the two-pass mean/covariance
//! estimation with a trained checkpoint.

mod stats;
mod train;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::Result;
use crate::logging::LogLevel;
use crate::train::{ArchKind, LossKind};

/// Segmentar: semantic-segmentation training and feature statistics
#[derive(Parser, Debug, Clone)]
#[command(name = "segmentar")]
#[command(version)]
#[command(about = "Phased semantic-segmentation training, IoU evaluation and Mahalanobis feature statistics")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Train a segmentation model
    Train(TrainArgs),

    /// Compute per-class mean and pooled covariance from a trained model
    Stats(StatsArgs),
}

/// Arguments for the train command
#[derive(Parser, Debug, Clone)]
pub struct TrainArgs {
    /// Dataset directory containing train.json and val.json
    #[arg(long)]
    pub datadir: PathBuf,

    /// Output directory for checkpoints, logs and snapshots
    #[arg(long)]
    pub savedir: PathBuf,

    /// Architecture family
    #[arg(long, value_enum, default_value_t = ArchKind::Erfnet)]
    pub model: ArchKind,

    /// Loss kind
    #[arg(long, value_enum, default_value_t = LossKind::CrossEntropy)]
    pub loss: LossKind,

    /// Number of classes, including void
    #[arg(long, default_value_t = 20)]
    pub num_classes: usize,

    /// Label value excluded from IoU accumulation
    #[arg(long)]
    pub ignore_index: Option<u32>,

    /// Number of training epochs
    #[arg(long, default_value_t = 150)]
    pub num_epochs: usize,

    /// Re-batch the dataset to this many images per batch (0 keeps the
    /// dataset's own grouping)
    #[arg(long, default_value_t = 0)]
    pub batch_size: usize,

    /// Override the architecture's default learning rate
    #[arg(long)]
    pub lr: Option<f32>,

    /// Print the running loss every N batches (0 disables)
    #[arg(long, default_value_t = 50)]
    pub steps_loss: usize,

    /// Write a numbered model snapshot every N epochs (0 disables)
    #[arg(long, default_value_t = 0)]
    pub epochs_save: usize,

    /// Continue from the rolling checkpoint in savedir
    #[arg(long)]
    pub resume: bool,

    /// Fine-tune from this weight file, training only the output layer
    #[arg(long)]
    pub fine_tune: Option<PathBuf>,

    /// Run the encoder-only phase before joint training
    #[arg(long)]
    pub pretrain_encoder: bool,

    /// Accumulate IoU during the train pass (slower)
    #[arg(long)]
    pub iou_train: bool,

    /// Skip IoU during the val pass
    #[arg(long)]
    pub no_iou_val: bool,

    /// Random seed for reproducibility
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

/// Arguments for the stats command
#[derive(Parser, Debug, Clone)]
pub struct StatsArgs {
    /// Dataset directory containing train.json
    #[arg(long)]
    pub datadir: PathBuf,

    /// Directory holding the trained checkpoint; artifacts land here too
    #[arg(long)]
    pub savedir: PathBuf,

    /// Checkpoint file to load, defaulting to the best joint checkpoint
    #[arg(long)]
    pub weights: Option<PathBuf>,

    /// Number of classes, including void
    #[arg(long, default_value_t = 20)]
    pub num_classes: usize,

    /// Random seed for reproducibility
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

/// Execute a CLI command based on the parsed arguments
pub fn run_command(cli: Cli) -> Result<()> {
    let level = if cli.quiet {
        LogLevel::Quiet
    } else if cli.verbose {
        LogLevel::Verbose
    } else {
        LogLevel::Normal
    };

    match cli.command {
        Command::Train(args) => train::run_train(args, level),
        Command::Stats(args) => stats::run_stats(args, level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_train_args_parse() {
        let cli = Cli::parse_from([
            "segmentar",
            "train",
            "--datadir",
            "/data/cityscapes",
            "--savedir",
            "/runs/erfnet",
            "--model",
            "erfnet_isomaxplus",
            "--num-epochs",
            "10",
        ]);
        match cli.command {
            Command::Train(args) => {
                assert_eq!(args.model, ArchKind::ErfnetIsoMaxPlus);
                assert_eq!(args.num_epochs, 10);
                assert!(!args.resume);
            }
            _ => panic!("expected train subcommand"),
        }
    }
}
