//! Storage entity traits

use std::fmt::Debug;

use serde::{Serialize, de::DeserializeOwned};

/// Types usable as storage keys
pub trait StorageKey: Clone + Debug + Send + Sync + Eq + std::hash::Hash {
    /// String form of the key, used as map key and file name
    fn as_str(&self) -> &str;
}

/// Types that can be persisted by a `Storage` backend
pub trait StorageEntity: Clone + Debug + Send + Sync + Serialize + DeserializeOwned {
    type Key: StorageKey;

    /// Name of the collection the entity lives in (directory name for file storage)
    const COLLECTION: &'static str;

    fn key(&self) -> &Self::Key;

    /// Sort key used by `Storage::list`; entities without one keep backend order
    fn sort_key(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        None
    }
}
