//! Dataset glue: in-memory loaders and JSON fixture datasets
//!
//! The real dataset/augmentation pipeline is an external collaborator.
//! What lives here is the minimum the CLI and the tests need: a loader
//! over batches already in memory (with seeded shuffling) and a
//! serde-backed fixture format for loading batches from disk.

mod json;
mod memory;

pub use json::JsonDataset;
pub use memory::InMemoryLoader;
