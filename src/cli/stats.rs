//! Stats command implementation
//!
//! Loads a trained checkpoint, then runs the mean pass followed by the
//! covariance pass over the training split, writing both artifacts next
//! to the checkpoint.

use crate::checkpoint::{self, ReconcilePolicy};
use crate::data::JsonDataset;
use crate::error::{Error, Result};
use crate::logging::{log, warn, LogLevel};
use crate::model::Model;
use crate::probe::LinearProbe;
use crate::stats;

use super::StatsArgs;

pub fn run_stats(args: StatsArgs, level: LogLevel) -> Result<()> {
    if !args.datadir.is_dir() {
        return Err(Error::DatasetNotFound(args.datadir));
    }

    let ckpt_path = args
        .weights
        .unwrap_or_else(|| args.savedir.join("model_best.json"));
    let ckpt = checkpoint::load(&ckpt_path)?;
    log(
        level,
        LogLevel::Normal,
        &format!("loaded {} checkpoint from epoch {}", ckpt.arch, ckpt.epoch),
    );

    let mut loader = JsonDataset::load(args.datadir.join("train.json"))?;
    let in_channels = loader
        .first()
        .map(|b| b.images.dim().1)
        .ok_or_else(|| Error::Config("training dataset is empty".to_string()))?;

    let mut model = LinearProbe::new(ckpt.arch.clone(), in_channels, args.num_classes, args.seed);
    let report = checkpoint::reconcile(&model.state_dict(), &ckpt.weights, &ReconcilePolicy::default());
    for name in &report.skipped {
        warn(&format!("skipping {name}: no matching parameter in the model"));
    }
    for name in &report.mismatched {
        warn(&format!("skipping {name}: shape mismatch against the model"));
    }
    model.load_state_dict(report.applied);
    model.set_train(false);

    let means = stats::accumulate_means(&model, &mut loader, args.num_classes)?;
    let means_path = stats::means_path(&args.savedir, &ckpt.arch);
    stats::save_means(&means, &means_path)?;
    log(
        level,
        LogLevel::Normal,
        &format!("wrote class means to {}", means_path.display()),
    );

    let undefined: Vec<usize> = (0..args.num_classes)
        .filter(|&c| !means.is_defined(c))
        .collect();
    if !undefined.is_empty() {
        warn(&format!("classes with no observed pixels: {undefined:?}"));
    }

    let cov = stats::accumulate_covariance(&model, &mut loader, args.num_classes, &means)?;
    let cov_path = stats::covariance_path(&args.savedir, &ckpt.arch);
    stats::save_covariance(&cov, &cov_path)?;
    log(
        level,
        LogLevel::Normal,
        &format!("wrote pooled covariance to {}", cov_path.display()),
    );

    Ok(())
}
