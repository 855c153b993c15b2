//! Storage backend selection

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::domain::DomainError;
use crate::domain::storage::{Storage, StorageEntity};

use super::file::FileStorage;
use super::in_memory::InMemoryStorage;

/// Supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Lost on restart
    #[default]
    Memory,
    /// JSON files below the data directory
    File,
}

impl StorageBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" | "inmemory" => Some(Self::Memory),
            "file" | "json" | "fs" => Some(Self::File),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct StorageFactory;

impl StorageFactory {
    pub async fn create<E>(
        backend: StorageBackend,
        data_dir: &Path,
    ) -> Result<Arc<dyn Storage<E>>, DomainError>
    where
        E: StorageEntity + 'static,
    {
        match backend {
            StorageBackend::Memory => Ok(Arc::new(InMemoryStorage::<E>::new())),
            StorageBackend::File => Ok(Arc::new(FileStorage::<E>::open(data_dir).await?)),
        }
    }
}
