//! In-memory storage implementation

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::DomainError;
use crate::domain::storage::{Storage, StorageEntity, StorageKey, sort_entities};

/// Thread-safe map-backed storage. Data is lost when the process exits.
#[derive(Debug)]
pub struct InMemoryStorage<E>
where
    E: StorageEntity,
{
    entities: RwLock<HashMap<String, E>>,
}

impl<E> Default for InMemoryStorage<E>
where
    E: StorageEntity,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> InMemoryStorage<E>
where
    E: StorageEntity,
{
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
        }
    }
}

fn poisoned(e: impl std::fmt::Display) -> DomainError {
    DomainError::storage(format!("Storage lock poisoned: {}", e))
}

#[async_trait]
impl<E> Storage<E> for InMemoryStorage<E>
where
    E: StorageEntity + 'static,
{
    async fn get(&self, key: &E::Key) -> Result<Option<E>, DomainError> {
        let entities = self.entities.read().map_err(poisoned)?;
        Ok(entities.get(key.as_str()).cloned())
    }

    async fn list(&self) -> Result<Vec<E>, DomainError> {
        let mut all: Vec<E> = self.entities.read().map_err(poisoned)?.values().cloned().collect();
        sort_entities(&mut all);
        Ok(all)
    }

    async fn create(&self, entity: E) -> Result<E, DomainError> {
        let key = entity.key().as_str().to_string();
        let mut entities = self.entities.write().map_err(poisoned)?;

        if entities.contains_key(&key) {
            return Err(DomainError::conflict(format!(
                "{} entry '{}' already exists",
                E::COLLECTION,
                key
            )));
        }

        entities.insert(key, entity.clone());
        Ok(entity)
    }

    async fn update(&self, entity: E) -> Result<E, DomainError> {
        let key = entity.key().as_str().to_string();
        let mut entities = self.entities.write().map_err(poisoned)?;

        if !entities.contains_key(&key) {
            return Err(DomainError::not_found(format!(
                "{} entry '{}' not found",
                E::COLLECTION,
                key
            )));
        }

        entities.insert(key, entity.clone());
        Ok(entity)
    }

    async fn delete(&self, key: &E::Key) -> Result<bool, DomainError> {
        let mut entities = self.entities.write().map_err(poisoned)?;
        Ok(entities.remove(key.as_str()).is_some())
    }

    async fn exists(&self, key: &E::Key) -> Result<bool, DomainError> {
        let entities = self.entities.read().map_err(poisoned)?;
        Ok(entities.contains_key(key.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::layer::{FlattenLayer, LayerSpec};
    use crate::domain::model::ModelRecord;
    use crate::domain::training_set::TrainingSet;

    fn model(name: &str) -> ModelRecord {
        ModelRecord::new(name, None, vec![LayerSpec::Flatten(FlattenLayer::default())])
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let storage = InMemoryStorage::<ModelRecord>::new();
        let record = storage.create(model("a")).await.unwrap();

        let fetched = storage.get(record.id()).await.unwrap().unwrap();
        assert_eq!(fetched.name(), "a");
    }

    #[tokio::test]
    async fn test_create_conflict() {
        let storage = InMemoryStorage::<ModelRecord>::new();
        let record = storage.create(model("a")).await.unwrap();

        let result = storage.create(record).await;
        assert!(matches!(result, Err(DomainError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_update_requires_existing() {
        let storage = InMemoryStorage::<TrainingSet>::new();
        let mut set = TrainingSet::new("cats", None, "u1");

        assert!(matches!(
            storage.update(set.clone()).await,
            Err(DomainError::NotFound { .. })
        ));

        storage.create(set.clone()).await.unwrap();
        set.set_selected(true);
        storage.update(set.clone()).await.unwrap();
        assert!(storage.get(&set.id).await.unwrap().unwrap().is_selected);
    }

    #[tokio::test]
    async fn test_delete_and_exists() {
        let storage = InMemoryStorage::<ModelRecord>::new();
        let record = storage.create(model("a")).await.unwrap();

        assert!(storage.exists(record.id()).await.unwrap());
        assert!(storage.delete(record.id()).await.unwrap());
        assert!(!storage.delete(record.id()).await.unwrap());
        assert!(!storage.exists(record.id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_creation() {
        let storage = InMemoryStorage::<ModelRecord>::new();
        for name in ["first", "second", "third"] {
            storage.create(model(name)).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let names: Vec<String> = storage
            .list()
            .await
            .unwrap()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }
}
