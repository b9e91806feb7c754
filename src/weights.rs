//! Per-class loss weight estimation
//!
//! ENet-style weighting: one full pass over a labeled dataset builds a
//! per-class pixel histogram, and each class gets
//! `w_c = 1 / ln(c + count_c / total)`. Rare classes end up with larger
//! weights. The result depends only on loader traversal order, so it is
//! cached on disk and reused across runs over the same dataset.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::model::BatchLoader;

/// Default value of the `c` hyper-parameter from the ENet paper
pub const DEFAULT_C: f64 = 1.02;

/// One pass over `loader`, producing `num_classes` loss weights.
///
/// Labels at or above `num_classes` are not counted.
pub fn estimate(loader: &mut dyn BatchLoader, num_classes: usize, c: f64) -> Vec<f64> {
    let mut counts = vec![0u64; num_classes];
    let mut total = 0u64;

    for batch in loader.batches() {
        for &label in batch.labels.iter() {
            if (label as usize) < num_classes {
                counts[label as usize] += 1;
            }
            total += 1;
        }
    }

    counts
        .iter()
        .map(|&count| {
            let propensity = if total > 0 {
                count as f64 / total as f64
            } else {
                0.0
            };
            1.0 / (c + propensity).ln()
        })
        .collect()
}

/// Cache path for a given architecture under `dir`
pub fn cache_path(dir: impl AsRef<Path>, arch: &str) -> PathBuf {
    dir.as_ref().join(format!("{arch}_class_weights.json"))
}

/// Load cached weights if present, otherwise estimate and write the cache.
pub fn cached_or_estimate(
    dir: impl AsRef<Path>,
    arch: &str,
    loader: &mut dyn BatchLoader,
    num_classes: usize,
) -> Result<Vec<f64>> {
    let path = cache_path(&dir, arch);
    if path.exists() {
        let content = fs::read_to_string(&path)?;
        let weights: Vec<f64> = serde_json::from_str(&content)
            .map_err(|e| Error::Serialization(format!("class-weight cache parse failed: {e}")))?;
        if weights.len() != num_classes {
            return Err(Error::Config(format!(
                "class-weight cache {} holds {} classes, expected {num_classes}",
                path.display(),
                weights.len()
            )));
        }
        return Ok(weights);
    }

    let weights = estimate(loader, num_classes, DEFAULT_C);
    fs::create_dir_all(dir.as_ref())?;
    fs::write(&path, serde_json::to_string(&weights)?)?;
    Ok(weights)
}
