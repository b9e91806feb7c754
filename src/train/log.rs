//! Per-epoch training log and best-epoch marker
//!
//! The log is an append-only tab-separated file with one header line,
//! written once when the file is created. Records are never mutated;
//! resuming a run keeps the existing rows and appends from epoch K+1.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const HEADER: &str = "epoch\ttrain_loss\tval_loss\ttrain_iou\tval_iou\tlearning_rate";

/// One epoch's results. IoU fields are unset when IoU evaluation was
/// disabled for that pass.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f32,
    pub val_loss: f32,
    pub train_iou: Option<f64>,
    pub val_iou: Option<f64>,
    pub learning_rate: f32,
}

/// Append-only TSV log
pub struct TrainingLog {
    path: PathBuf,
}

impl TrainingLog {
    /// Open the log, writing the header if the file does not yet exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            fs::write(&path, format!("{HEADER}\n"))?;
        }
        Ok(Self { path })
    }

    /// Append one record
    pub fn append(&self, record: &EpochRecord) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(
            file,
            "{}\t{:.4}\t{:.4}\t{}\t{}\t{:.8}",
            record.epoch,
            record.train_loss,
            record.val_loss,
            fmt_iou(record.train_iou),
            fmt_iou(record.val_iou),
            record.learning_rate,
        )?;
        Ok(())
    }

    /// Parse every record back. Used by resume tests and inspection.
    pub fn read_records(&self) -> Result<Vec<EpochRecord>> {
        let content = fs::read_to_string(&self.path)?;
        content
            .lines()
            .skip(1)
            .filter(|l| !l.trim().is_empty())
            .map(parse_row)
            .collect()
    }
}

fn fmt_iou(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.4}"),
        None => "nan".to_string(),
    }
}

fn parse_iou(field: &str) -> Option<f64> {
    let v: f64 = field.parse().ok()?;
    if v.is_nan() {
        None
    } else {
        Some(v)
    }
}

fn parse_row(line: &str) -> Result<EpochRecord> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 6 {
        return Err(Error::Serialization(format!("malformed log row: {line}")));
    }
    let bad = |what: &str| Error::Serialization(format!("malformed {what} in log row: {line}"));
    Ok(EpochRecord {
        epoch: fields[0].parse().map_err(|_| bad("epoch"))?,
        train_loss: fields[1].parse().map_err(|_| bad("train_loss"))?,
        val_loss: fields[2].parse().map_err(|_| bad("val_loss"))?,
        train_iou: parse_iou(fields[3]),
        val_iou: parse_iou(fields[4]),
        learning_rate: fields[5].parse().map_err(|_| bad("learning_rate"))?,
    })
}

/// Rewrite the best-epoch marker. Called whenever a new best is found.
/// `label` names the metric the value belongs to ("Val-IoU" when IoU
/// evaluation is on, "Val-loss" otherwise).
pub fn write_best_marker(
    path: impl AsRef<Path>,
    epoch: usize,
    label: &str,
    value: f64,
) -> Result<()> {
    fs::write(
        path.as_ref(),
        format!("Best epoch is {epoch}, with {label}= {value:.4}"),
    )?;
    Ok(())
}
