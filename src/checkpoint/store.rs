//! Checkpoint file format and atomic persistence

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::ParamMap;

/// Persisted training snapshot, sufficient to resume a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last completed epoch (1-based)
    pub epoch: usize,
    /// Architecture descriptor, opaque to the store
    pub arch: String,
    /// Named-weight mapping, keys unique
    pub weights: ParamMap,
    /// Secondary loss-module weights, when the architecture carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux_weights: Option<ParamMap>,
    /// Best metric observed so far (higher is better)
    pub best_metric: f32,
    /// Opaque optimizer state
    pub optimizer: serde_json::Value,
    /// Wall-clock save time
    pub saved_at: DateTime<Utc>,
}

/// Weights-only snapshot for periodic numbered saves, independent of the
/// rolling/best checkpoint mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub weights: ParamMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux_weights: Option<ParamMap>,
}

/// Serialize `checkpoint` to `path`, replacing it atomically.
pub fn save(checkpoint: &Checkpoint, path: impl AsRef<Path>) -> Result<()> {
    write_atomic(path.as_ref(), checkpoint)
}

/// Write a weights-only snapshot to `path`.
pub fn save_snapshot(snapshot: &ModelSnapshot, path: impl AsRef<Path>) -> Result<()> {
    write_atomic(path.as_ref(), snapshot)
}

/// Load a checkpoint. Fails when the file is absent or unreadable; resume
/// policy (whether absence is fatal) is the caller's concern.
pub fn load(path: impl AsRef<Path>) -> Result<Checkpoint> {
    let content = fs::read_to_string(path.as_ref())?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Serialization(format!("checkpoint parse failed: {e}")))
}

/// Open a sibling temp file, write fully, flush, close, then rename over
/// the destination. Rename within one directory is atomic, so readers
/// see either the old or the new checkpoint, never a partial one.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_string(value)
        .map_err(|e| Error::Serialization(format!("checkpoint serialization failed: {e}")))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = Path::new(&tmp);

    {
        let mut file = File::create(tmp_path)?;
        file.write_all(data.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}
