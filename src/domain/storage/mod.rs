//! Generic persistence abstraction shared by models and training sets

mod entity;
mod repository;

pub use entity::{StorageEntity, StorageKey};
pub use repository::Storage;
pub(crate) use repository::sort_entities;

#[cfg(test)]
pub use repository::mock;
