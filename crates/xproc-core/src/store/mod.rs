// # Declarative Store Implementations
//
// In-memory backing for the store traits plus the manifest loader that
// seeds them.

pub mod manifest;
pub mod memory;

pub use manifest::{Manifest, ManifestSecret};
pub use memory::{MemoryConfigStore, MemoryResourceStore, MemorySecretStore, MemoryUsageTracker};
