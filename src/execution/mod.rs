//! Execution module.
//!
//! This module evaluates pipelines into memory: tile layout, worker lanes,
//! progress reporting and memory accounting.

pub mod engine;
pub mod memory;
pub mod progress;
pub mod tiles;

pub use engine::{write_to_memory, ExecutionEngine, ExecutionOptions, ExecutionResult, ExecutionStats};
pub use memory::MemoryTracker;
pub use progress::{ProgressTracker, ProgressUpdate};
pub use tiles::TileIterator;
