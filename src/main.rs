//! Segmentar CLI
//!
//! # Usage
//!
//! ```bash
//! # Train with encoder pretraining
//! segmentar train --datadir data/ --savedir runs/erfnet --model erfnet --pretrain-encoder
//!
//! # Resume an interrupted run
//! segmentar train --datadir data/ --savedir runs/erfnet --resume
//!
//! # Fine-tune from pretrained weights
//! segmentar train --datadir data/ --savedir runs/ft --fine-tune runs/erfnet/model_best.json
//!
//! # Per-class mean and covariance statistics
//! segmentar stats --datadir data/ --savedir runs/erfnet
//! ```

use clap::Parser;
use segmentar::cli::{run_command, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
