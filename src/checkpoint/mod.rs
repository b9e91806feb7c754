//! Checkpoint serialization and weight reconciliation
//!
//! A checkpoint carries everything a resume needs: epoch index, an
//! architecture tag, the named-weight mapping, optional secondary
//! loss-module weights, the best metric so far and the optimizer's
//! opaque state blob. Serialization is serde_json with an atomic replace
//! of the destination, so an interrupted write never leaves a torn file.
//!
//! `reconcile` maps a source weight set onto a possibly different target
//! parameter set (cross-version resume, fine-tuning from a
//! differently-headed model). It is pure: partial matches are reported,
//! never raised.

mod reconcile;
mod store;

pub use reconcile::{reconcile, ReconcilePolicy, ReconcileReport};
pub use store::{load, save, save_snapshot, Checkpoint, ModelSnapshot};
