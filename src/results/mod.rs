//! Results storage module
//!
//! Provides persistent storage for finished runs.

mod storage;

pub use storage::{ResultsStorage, StoredRun};
