//! JSON fixture datasets
//!
//! A dataset file is a JSON array of `(images, labels)` batch records,
//! with arrays serialized in ndarray's serde layout. Small by design;
//! this is fixture glue, not a production data pipeline.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{Array3, Array4};
use serde::{Deserialize, Serialize};

use crate::data::InMemoryLoader;
use crate::error::{Error, Result};
use crate::model::Batch;

#[derive(Serialize, Deserialize)]
struct BatchRecord {
    images: Array4<f32>,
    labels: Array3<u32>,
}

/// On-disk fixture dataset
pub struct JsonDataset;

impl JsonDataset {
    /// Load every batch from `path` into an in-memory loader
    pub fn load(path: impl AsRef<Path>) -> Result<InMemoryLoader> {
        let file = File::open(path.as_ref())?;
        let records: Vec<BatchRecord> = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Serialization(format!("dataset parse failed: {e}")))?;
        let batches = records
            .into_iter()
            .map(|r| Batch::new(r.images, r.labels))
            .collect();
        Ok(InMemoryLoader::new(batches))
    }

    /// Write batches to `path` in the fixture format
    pub fn save(path: impl AsRef<Path>, batches: &[Batch]) -> Result<()> {
        let records: Vec<BatchRecord> = batches
            .iter()
            .map(|b| BatchRecord {
                images: b.images.clone(),
                labels: b.labels.clone(),
            })
            .collect();
        let file = File::create(path.as_ref())?;
        serde_json::to_writer(BufWriter::new(file), &records)
            .map_err(|e| Error::Serialization(format!("dataset write failed: {e}")))?;
        Ok(())
    }
}
