//! Epoch loop and phase orchestration

use std::collections::HashSet;
use std::fs;

use chrono::Utc;

use crate::checkpoint::{self, Checkpoint, ModelSnapshot, ReconcilePolicy};
use crate::error::{Error, Result};
use crate::logging::{log, warn, LogLevel};
use crate::metrics::IouAccumulator;
use crate::model::{argmax_classes, BatchLoader, Criterion, Model};
use crate::optim::Optimizer;
use crate::train::log::write_best_marker;
use crate::train::{EpochRecord, TrainConfig, TrainingLog, TrainingPhase};

/// Builds the joint model from a trained encoder. Supplied externally;
/// the decoder topology is not this crate's concern.
pub type AttachDecoder = Box<dyn FnOnce(Box<dyn Model>) -> Box<dyn Model>>;

/// Best-so-far metric, threaded explicitly through the run and persisted
/// in every checkpoint. Higher is always better; strict inequality is
/// required to improve, so ties keep the earlier epoch.
#[derive(Debug, Clone, Copy)]
pub struct BestMetricState {
    best: Option<f32>,
}

impl BestMetricState {
    pub fn new() -> Self {
        Self { best: None }
    }

    /// Restore from a checkpointed best value
    pub fn resume(best: f32) -> Self {
        Self { best: Some(best) }
    }

    /// Record one observation; true iff it strictly improves on the best.
    pub fn observe(&mut self, metric: f32) -> bool {
        let improved = match self.best {
            Some(best) => metric > best,
            None => true,
        };
        if improved {
            self.best = Some(metric);
        }
        improved
    }

    /// Best value seen, or negative infinity before any observation
    pub fn best(&self) -> f32 {
        self.best.unwrap_or(f32::NEG_INFINITY)
    }
}

impl Default for BestMetricState {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives a full training run: phase transitions, the per-epoch
/// train/val loop, metric tracking and checkpoint lifecycle.
pub struct Orchestrator {
    config: TrainConfig,
    optimizer: Box<dyn Optimizer>,
    policy: ReconcilePolicy,
    level: LogLevel,
}

struct PassResult {
    avg_loss: f32,
    iou: Option<f64>,
}

impl Orchestrator {
    /// Validates the configuration; fatal errors surface here, before any
    /// state is written.
    pub fn new(config: TrainConfig, optimizer: Box<dyn Optimizer>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            optimizer,
            policy: ReconcilePolicy::default(),
            level: LogLevel::Normal,
        })
    }

    #[must_use]
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Run the configured phases to completion and return the trained model.
    ///
    /// `attach_decoder` is consulted only between the encoder phase and
    /// joint training; runs without encoder pretraining never call it.
    pub fn run(
        mut self,
        mut model: Box<dyn Model>,
        criterion: &dyn Criterion,
        train_loader: &mut dyn BatchLoader,
        val_loader: &mut dyn BatchLoader,
        attach_decoder: Option<AttachDecoder>,
    ) -> Result<Box<dyn Model>> {
        if self.config.resume {
            let rolling = self
                .config
                .save_dir
                .join(self.config.starting_phase().checkpoint_file());
            if !rolling.exists() {
                return Err(Error::MissingResumeCheckpoint(rolling));
            }
        }

        fs::create_dir_all(&self.config.save_dir)?;
        fs::write(
            self.config.save_dir.join("opts.txt"),
            format!("{:#?}", self.config),
        )?;

        match self.config.starting_phase() {
            TrainingPhase::FineTune => {
                let frozen = self.prepare_fine_tune(model.as_mut())?;
                self.run_phase(
                    TrainingPhase::FineTune,
                    model.as_mut(),
                    criterion,
                    train_loader,
                    val_loader,
                    &frozen,
                )?;
            }
            TrainingPhase::EncoderOnly => {
                log(self.level, LogLevel::Normal, "========== ENCODER TRAINING ===========");
                self.run_phase(
                    TrainingPhase::EncoderOnly,
                    model.as_mut(),
                    criterion,
                    train_loader,
                    val_loader,
                    &HashSet::new(),
                )?;

                if let Some(attach) = attach_decoder {
                    model = attach(model);
                }
                log(self.level, LogLevel::Normal, "========== DECODER TRAINING ===========");
                self.run_phase(
                    TrainingPhase::DecoderOrJoint,
                    model.as_mut(),
                    criterion,
                    train_loader,
                    val_loader,
                    &HashSet::new(),
                )?;
            }
            TrainingPhase::DecoderOrJoint => {
                self.run_phase(
                    TrainingPhase::DecoderOrJoint,
                    model.as_mut(),
                    criterion,
                    train_loader,
                    val_loader,
                    &HashSet::new(),
                )?;
            }
        }

        Ok(model)
    }

    /// Load initial fine-tune weights with shape-tolerant reconciliation
    /// and return the set of frozen parameter names.
    fn prepare_fine_tune(&self, model: &mut dyn Model) -> Result<HashSet<String>> {
        let path = match self.config.fine_tune_weights.as_ref() {
            Some(path) => path,
            None => {
                return Err(Error::Config(
                    "fine-tuning requires an initial weight file".to_string(),
                ))
            }
        };
        if !path.exists() {
            return Err(Error::Config(format!(
                "fine-tune weights not found: {}",
                path.display()
            )));
        }

        let source = checkpoint::load(path)?;
        self.apply_reconciled(model, source.weights);

        let output_names: HashSet<String> = model.output_parameter_names().into_iter().collect();
        Ok(model
            .state_dict()
            .keys()
            .filter(|name| !output_names.contains(*name))
            .cloned()
            .collect())
    }

    /// Reconcile source weights into the model, warning per skip/mismatch.
    fn apply_reconciled(&self, model: &mut dyn Model, source: crate::model::ParamMap) {
        let target = model.state_dict();
        let report = checkpoint::reconcile(&target, &source, &self.policy);
        for name in &report.skipped {
            warn(&format!("skipping {name}: no matching parameter in the model"));
        }
        for name in &report.mismatched {
            warn(&format!("skipping {name}: shape mismatch against the model"));
        }
        model.load_state_dict(report.applied);
    }

    fn run_phase(
        &mut self,
        phase: TrainingPhase,
        model: &mut dyn Model,
        criterion: &dyn Criterion,
        train_loader: &mut dyn BatchLoader,
        val_loader: &mut dyn BatchLoader,
        frozen: &HashSet<String>,
    ) -> Result<()> {
        let dir = self.config.save_dir.clone();
        let rolling_path = dir.join(phase.checkpoint_file());
        let best_path = dir.join(phase.best_checkpoint_file());
        let marker_path = dir.join(phase.best_marker_file());

        let schedule =
            self.config
                .arch
                .schedule(self.config.initial_lr, self.config.num_epochs, self.config.fine_tune);

        let mut best = BestMetricState::new();
        let mut start_epoch = 1;

        // A model checkpoint is the only state that crosses a phase
        // boundary; moments and velocities start over each phase.
        self.optimizer.reset();

        // The starting phase's checkpoint was already required in run();
        // a later phase may simply not have begun yet.
        if self.config.resume && rolling_path.exists() {
            let ckpt = checkpoint::load(&rolling_path)?;
            self.apply_reconciled(model, ckpt.weights);
            if let Some(aux) = ckpt.aux_weights {
                model.load_aux_state_dict(aux);
            }
            self.optimizer.load_state(ckpt.optimizer)?;
            best = BestMetricState::resume(ckpt.best_metric);
            start_epoch = ckpt.epoch + 1;
            log(
                self.level,
                LogLevel::Normal,
                &format!("=> Loaded checkpoint, continuing from epoch {start_epoch}"),
            );
        }

        let training_log = TrainingLog::open(dir.join(phase.log_file()))?;
        let mode = phase.forward_mode();

        for epoch in start_epoch..=self.config.num_epochs {
            // Schedule advances once per epoch, before its batches run.
            let lr = schedule.lr_at(epoch);
            self.optimizer.set_lr(lr);
            log(
                self.level,
                LogLevel::Normal,
                &format!("----- TRAINING - EPOCH {epoch} ----- (lr {lr:.6})"),
            );

            model.set_train(true);
            let train = self.run_pass(
                model,
                criterion,
                train_loader,
                mode,
                self.config.iou_train,
                Some(frozen),
                epoch,
            );

            log(
                self.level,
                LogLevel::Normal,
                &format!("----- VALIDATING - EPOCH {epoch} -----"),
            );
            model.set_train(false);
            let val = self.run_pass(model, criterion, val_loader, mode, self.config.iou_val, None, epoch);

            // Higher is better in both regimes: val IoU when enabled and
            // defined, otherwise the negated val loss.
            let metric = match val.iou {
                Some(iou) if !iou.is_nan() => iou as f32,
                _ => -val.avg_loss,
            };
            let is_best = best.observe(metric);

            let ckpt = Checkpoint {
                epoch,
                arch: self.config.arch.name().to_string(),
                weights: model.state_dict(),
                aux_weights: model.aux_state_dict(),
                best_metric: best.best(),
                optimizer: self.optimizer.state(),
                saved_at: Utc::now(),
            };
            checkpoint::save(&ckpt, &rolling_path)?;
            if is_best {
                checkpoint::save(&ckpt, &best_path)?;
                match val.iou {
                    Some(iou) if !iou.is_nan() => {
                        write_best_marker(&marker_path, epoch, "Val-IoU", iou)?
                    }
                    _ => write_best_marker(&marker_path, epoch, "Val-loss", f64::from(val.avg_loss))?,
                }
                log(
                    self.level,
                    LogLevel::Normal,
                    &format!("save: {} (epoch: {epoch})", best_path.display()),
                );
            }

            if self.config.epochs_save > 0 && epoch % self.config.epochs_save == 0 {
                let snapshot = ModelSnapshot {
                    weights: model.state_dict(),
                    aux_weights: model.aux_state_dict(),
                };
                checkpoint::save_snapshot(&snapshot, dir.join(phase.snapshot_file(epoch)))?;
            }

            training_log.append(&EpochRecord {
                epoch,
                train_loss: train.avg_loss,
                val_loss: val.avg_loss,
                train_iou: train.iou,
                val_iou: val.iou,
                learning_rate: lr,
            })?;
        }

        Ok(())
    }

    /// One full traversal of a loader. With `frozen` set this is a train
    /// pass (per-batch optimizer steps); otherwise evaluation only.
    fn run_pass(
        &mut self,
        model: &mut dyn Model,
        criterion: &dyn Criterion,
        loader: &mut dyn BatchLoader,
        mode: crate::model::ForwardMode,
        accumulate_iou: bool,
        frozen: Option<&HashSet<String>>,
        epoch: usize,
    ) -> PassResult {
        let mut iou_eval = accumulate_iou
            .then(|| IouAccumulator::new(self.config.num_classes, self.config.ignore_index));
        let mut total_loss = 0.0;
        let mut num_batches = 0usize;

        for (step, batch) in loader.batches().enumerate() {
            let outputs = model.forward(&batch.images, mode);
            let mut result = criterion.compute(model, &batch, &outputs);

            if let Some(frozen) = frozen {
                if !frozen.is_empty() {
                    result.grads.retain(|name, _| !frozen.contains(name));
                }
                let mut params = model.state_dict();
                self.optimizer.step(&mut params, &result.grads);
                model.load_state_dict(params);
            }

            total_loss += result.loss;
            num_batches += 1;

            if let Some(eval) = iou_eval.as_mut() {
                eval.add_batch(&argmax_classes(&outputs[0]), &batch.labels);
            }

            if self.config.steps_loss > 0 && step % self.config.steps_loss == 0 {
                log(
                    self.level,
                    LogLevel::Verbose,
                    &step_loss_line(
                        frozen.is_some(),
                        total_loss / num_batches as f32,
                        epoch,
                        step,
                    ),
                );
            }
        }

        let avg_loss = if num_batches > 0 {
            total_loss / num_batches as f32
        } else {
            0.0
        };
        PassResult {
            avg_loss,
            iou: iou_eval.map(|eval| eval.get_iou().mean),
        }
    }
}

fn step_loss_line(is_train: bool, avg_loss: f32, epoch: usize, step: usize) -> String {
    let prefix = if is_train { "" } else { "VAL " };
    format!("{prefix}loss: {avg_loss:.4} (epoch: {epoch}, step: {step})")
}
