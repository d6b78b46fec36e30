// # Existence Tracker Implementations
//
// This module provides implementations of the ExistenceTracker trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::{FileExistenceTracker, FileTrackerFactory};
pub use memory::{MemoryExistenceTracker, MemoryTrackerFactory};
