//! # Registry Adapters
//!
//! - `InMemoryRegistry` - shared in-process map
//! - `DirectoryRegistry` - one file per key in a shared directory (requires "network" feature)

mod memory;
pub use memory::InMemoryRegistry;

#[cfg(feature = "network")]
mod directory;
#[cfg(feature = "network")]
pub use directory::DirectoryRegistry;
