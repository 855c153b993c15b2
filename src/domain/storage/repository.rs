//! Storage trait definition

use std::fmt::Debug;

use async_trait::async_trait;

use crate::domain::DomainError;

use super::entity::{StorageEntity, StorageKey};

/// CRUD operations over one entity type
#[async_trait]
pub trait Storage<E>: Send + Sync + Debug
where
    E: StorageEntity + 'static,
{
    async fn get(&self, key: &E::Key) -> Result<Option<E>, DomainError>;

    /// All entities, ordered by `StorageEntity::sort_key` when present
    async fn list(&self) -> Result<Vec<E>, DomainError>;

    /// Inserts a new entity, Conflict if the key is taken
    async fn create(&self, entity: E) -> Result<E, DomainError>;

    /// Replaces an existing entity, NotFound if absent
    async fn update(&self, entity: E) -> Result<E, DomainError>;

    /// Returns true if something was removed
    async fn delete(&self, key: &E::Key) -> Result<bool, DomainError>;

    async fn exists(&self, key: &E::Key) -> Result<bool, DomainError> {
        Ok(self.get(key).await?.is_some())
    }
}

pub(crate) fn sort_entities<E: StorageEntity>(entities: &mut [E]) {
    entities.sort_by(|a, b| {
        a.sort_key()
            .cmp(&b.sort_key())
            .then_with(|| a.key().as_str().cmp(b.key().as_str()))
    });
}
