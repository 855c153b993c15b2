//! Storage backends

mod factory;
mod file;
mod in_memory;

pub use factory::{StorageBackend, StorageFactory};
pub use file::FileStorage;
pub use in_memory::InMemoryStorage;
