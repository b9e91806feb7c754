//! Per-class feature statistics for Mahalanobis scoring
//!
//! Two explicit passes over a labeled dataset with a frozen model: the
//! mean pass builds one mean feature vector per class, the covariance
//! pass centers each pixel's feature vector with its class mean and
//! pools the outer products into a single matrix. The caller runs the
//! passes in order; the covariance pass takes the finished means as
//! input rather than inferring them from disk.
//!
//! The feature vector of a pixel is the model's pre-softmax output
//! restricted to the first `num_classes` channels, so the feature
//! dimension equals the class count.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};

use crate::error::{Error, Result};
use crate::model::{BatchLoader, ForwardMode, Model};

/// Per-class mean feature vectors, `(num_classes, feature_dim)`.
///
/// A class with zero observed pixels keeps an all-zero row; its count
/// in `pixel_counts` is the way to tell "undefined" from "mean of zero".
#[derive(Debug, Clone)]
pub struct ClassMeans {
    pub means: Array2<f64>,
    pub pixel_counts: Vec<u64>,
}

impl ClassMeans {
    pub fn num_classes(&self) -> usize {
        self.means.nrows()
    }

    pub fn feature_dim(&self) -> usize {
        self.means.ncols()
    }

    /// Whether class `c` was observed at least once
    pub fn is_defined(&self, c: usize) -> bool {
        self.pixel_counts.get(c).copied().unwrap_or(0) > 0
    }
}

fn check_feature_dim(channels: usize, num_classes: usize) -> Result<()> {
    if channels < num_classes {
        return Err(Error::ShapeMismatch {
            expected: format!("at least {num_classes} output channels"),
            actual: format!("{channels} channels"),
        });
    }
    Ok(())
}

/// Mean pass: one full traversal of the loader.
///
/// For each class, sums the feature vectors at exactly the pixels whose
/// ground-truth label equals that class, then divides by the pixel count.
pub fn accumulate_means(
    model: &dyn Model,
    loader: &mut dyn BatchLoader,
    num_classes: usize,
) -> Result<ClassMeans> {
    let mut sums = Array2::<f64>::zeros((num_classes, num_classes));
    let mut counts = vec![0u64; num_classes];

    for batch in loader.batches() {
        let outputs = model.forward(&batch.images, ForwardMode::Full);
        let scores = &outputs[0];
        let (n, c, h, w) = scores.dim();
        check_feature_dim(c, num_classes)?;

        for i in 0..n {
            for y in 0..h {
                for x in 0..w {
                    let label = batch.labels[[i, y, x]] as usize;
                    if label >= num_classes {
                        continue;
                    }
                    counts[label] += 1;
                    for k in 0..num_classes {
                        sums[[label, k]] += f64::from(scores[[i, k, y, x]]);
                    }
                }
            }
        }
    }

    for (c, &count) in counts.iter().enumerate() {
        if count > 0 {
            let mut row = sums.row_mut(c);
            row /= count as f64;
        }
    }

    Ok(ClassMeans {
        means: sums,
        pixel_counts: counts,
    })
}

/// Covariance pass: requires the finished means from [`accumulate_means`].
///
/// Centers each pixel's feature vector by its class mean and pools the
/// outer products of all classes into one matrix, normalized by the
/// image count times the per-image pixel count. The pooled normalizer
/// deliberately counts every pixel of every image, including those whose
/// label falls outside the class range and contributed no outer product.
pub fn accumulate_covariance(
    model: &dyn Model,
    loader: &mut dyn BatchLoader,
    num_classes: usize,
    means: &ClassMeans,
) -> Result<Array2<f64>> {
    let dim = means.feature_dim();
    if means.num_classes() != num_classes {
        return Err(Error::ShapeMismatch {
            expected: format!("{num_classes} class means"),
            actual: format!("{}", means.num_classes()),
        });
    }

    let mut cov = Array2::<f64>::zeros((dim, dim));
    let mut total_pixels = 0u64;
    let mut centered = Array1::<f64>::zeros(dim);

    for batch in loader.batches() {
        let outputs = model.forward(&batch.images, ForwardMode::Full);
        let scores = &outputs[0];
        let (n, c, h, w) = scores.dim();
        check_feature_dim(c, num_classes)?;
        total_pixels += (n * h * w) as u64;

        for i in 0..n {
            for y in 0..h {
                for x in 0..w {
                    let label = batch.labels[[i, y, x]] as usize;
                    if label >= num_classes {
                        continue;
                    }
                    for k in 0..dim {
                        centered[k] = f64::from(scores[[i, k, y, x]]) - means.means[[label, k]];
                    }
                    for a in 0..dim {
                        for b in 0..dim {
                            cov[[a, b]] += centered[a] * centered[b];
                        }
                    }
                }
            }
        }
    }

    if total_pixels > 0 {
        cov /= total_pixels as f64;
    }
    Ok(cov)
}

/// Artifact file name for the mean matrix
pub fn means_path(dir: impl AsRef<Path>, arch: &str) -> PathBuf {
    dir.as_ref().join(format!("mean_{arch}.json"))
}

/// Artifact file name for the covariance matrix
pub fn covariance_path(dir: impl AsRef<Path>, arch: &str) -> PathBuf {
    dir.as_ref().join(format!("cov_{arch}.json"))
}

#[derive(serde::Serialize, serde::Deserialize)]
struct MeansArtifact {
    means: Array2<f64>,
    pixel_counts: Vec<u64>,
}

pub fn save_means(means: &ClassMeans, path: impl AsRef<Path>) -> Result<()> {
    let artifact = MeansArtifact {
        means: means.means.clone(),
        pixel_counts: means.pixel_counts.clone(),
    };
    fs::write(path.as_ref(), serde_json::to_string(&artifact)?)?;
    Ok(())
}

pub fn load_means(path: impl AsRef<Path>) -> Result<ClassMeans> {
    let artifact: MeansArtifact = serde_json::from_str(&fs::read_to_string(path.as_ref())?)?;
    Ok(ClassMeans {
        means: artifact.means,
        pixel_counts: artifact.pixel_counts,
    })
}

pub fn save_covariance(cov: &Array2<f64>, path: impl AsRef<Path>) -> Result<()> {
    fs::write(path.as_ref(), serde_json::to_string(cov)?)?;
    Ok(())
}

pub fn load_covariance(path: impl AsRef<Path>) -> Result<Array2<f64>> {
    Ok(serde_json::from_str(&fs::read_to_string(path.as_ref())?)?)
}
