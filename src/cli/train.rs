//! Train command implementation

use crate::data::JsonDataset;
use crate::error::{Error, Result};
use crate::logging::{log, LogLevel};
use crate::optim::{Adam, Optimizer, Sgd};
use crate::probe::{LinearProbe, SquaredError};
use crate::train::{ArchKind, Orchestrator, TrainConfig};
use crate::weights;

use super::TrainArgs;

/// Per-architecture default learning rates, one decade lower for
/// fine-tuning.
fn default_lr(arch: ArchKind, fine_tune: bool) -> f32 {
    match arch {
        ArchKind::Erfnet | ArchKind::ErfnetIsoMaxPlus | ArchKind::Enet => {
            if fine_tune {
                5e-5
            } else {
                5e-4
            }
        }
        ArchKind::Bisenet => {
            if fine_tune {
                2.5e-3
            } else {
                2.5e-2
            }
        }
    }
}

/// BiSeNet trains with SGD + momentum, the rest with Adam.
fn build_optimizer(arch: ArchKind, lr: f32) -> Box<dyn Optimizer> {
    match arch {
        ArchKind::Bisenet => Box::new(Sgd::new(lr, 0.9).with_weight_decay(1e-4)),
        _ => Box::new(Adam::default_betas(lr).with_weight_decay(1e-4)),
    }
}

pub fn run_train(args: TrainArgs, level: LogLevel) -> Result<()> {
    if !args.datadir.is_dir() {
        return Err(Error::DatasetNotFound(args.datadir));
    }

    let mut train_data =
        JsonDataset::load(args.datadir.join("train.json"))?.rebatched(args.batch_size)?;
    let in_channels = train_data
        .first()
        .map(|b| b.images.dim().1)
        .ok_or_else(|| Error::Config("training dataset is empty".to_string()))?;

    // Estimated before the loader is shuffled so the first training epoch
    // sees the same batch order whether or not the cache existed.
    let class_weights = weights::cached_or_estimate(
        &args.savedir,
        args.model.name(),
        &mut train_data,
        args.num_classes,
    )?;
    log(
        level,
        LogLevel::Verbose,
        &format!("class weights: {class_weights:?}"),
    );

    let mut train_loader = train_data.shuffled(args.seed);
    let mut val_loader =
        JsonDataset::load(args.datadir.join("val.json"))?.rebatched(args.batch_size)?;

    let fine_tune = args.fine_tune.is_some();
    let lr = args.lr.unwrap_or_else(|| default_lr(args.model, fine_tune));

    let mut config = TrainConfig::new(args.model, args.loss, args.num_classes, &args.savedir)
        .with_epochs(args.num_epochs)
        .with_lr(lr)
        .with_iou(args.iou_train, !args.no_iou_val)
        .with_snapshot_every(args.epochs_save)
        .with_resume(args.resume)
        .with_seed(args.seed);
    config.steps_loss = args.steps_loss;
    if let Some(index) = args.ignore_index {
        config = config.with_ignore_index(index);
    }
    if let Some(initial) = args.fine_tune {
        config = config.with_fine_tune(initial);
    }
    if args.pretrain_encoder {
        config = config.with_encoder_pretraining();
    }

    let probe = LinearProbe::new(args.model.name(), in_channels, args.num_classes, args.seed);
    let criterion = SquaredError::with_class_weights(class_weights);
    let orchestrator = Orchestrator::new(config, build_optimizer(args.model, lr))?
        .with_log_level(level);
    orchestrator.run(
        Box::new(probe),
        &criterion,
        &mut train_loader,
        &mut val_loader,
        Some(Box::new(|model| model)),
    )?;

    log(level, LogLevel::Normal, "Training complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lr_per_arch() {
        assert_eq!(default_lr(ArchKind::Erfnet, false), 5e-4);
        assert_eq!(default_lr(ArchKind::Erfnet, true), 5e-5);
        assert_eq!(default_lr(ArchKind::Bisenet, false), 2.5e-2);
    }

    #[test]
    fn test_missing_datadir_is_fatal() {
        let args = TrainArgs {
            datadir: "/no/such/dataset".into(),
            savedir: "/tmp/run".into(),
            model: ArchKind::Erfnet,
            loss: crate::train::LossKind::CrossEntropy,
            num_classes: 2,
            ignore_index: None,
            num_epochs: 1,
            batch_size: 0,
            lr: None,
            steps_loss: 0,
            epochs_save: 0,
            resume: false,
            fine_tune: None,
            pretrain_encoder: false,
            iou_train: false,
            no_iou_val: false,
            seed: 1,
        };
        assert!(matches!(
            run_train(args, LogLevel::Quiet),
            Err(Error::DatasetNotFound(_))
        ));
    }
}
