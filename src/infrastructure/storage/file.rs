//! JSON-file storage: one `<key>.json` per entity under `<data_dir>/<collection>/`

use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::domain::DomainError;
use crate::domain::storage::{Storage, StorageEntity, StorageKey, sort_entities};

#[derive(Debug)]
pub struct FileStorage<E>
where
    E: StorageEntity,
{
    dir: PathBuf,
    /// Serializes create/update/delete so existence checks stay valid
    write_lock: Mutex<()>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> FileStorage<E>
where
    E: StorageEntity,
{
    /// Opens (and creates) the collection directory below `data_dir`
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, DomainError> {
        let dir = data_dir.as_ref().join(E::COLLECTION);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            DomainError::storage(format!("Failed to create '{}': {}", dir.display(), e))
        })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
            _entity: PhantomData,
        })
    }

    /// `None` for keys that cannot be file names
    fn path_for(&self, key: &str) -> Option<PathBuf> {
        let safe = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        safe.then(|| self.dir.join(format!("{}.json", key)))
    }

    async fn read(&self, path: &Path) -> Result<Option<E>, DomainError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                DomainError::storage(format!("Corrupt entry '{}': {}", path.display(), e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DomainError::storage(format!(
                "Failed to read '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    async fn write(&self, path: &Path, entity: &E) -> Result<(), DomainError> {
        let bytes = serde_json::to_vec_pretty(entity)
            .map_err(|e| DomainError::internal(format!("Failed to serialize entity: {}", e)))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(|e| {
            DomainError::storage(format!("Failed to write '{}': {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| {
            DomainError::storage(format!("Failed to replace '{}': {}", path.display(), e))
        })
    }
}

#[async_trait]
impl<E> Storage<E> for FileStorage<E>
where
    E: StorageEntity + 'static,
{
    async fn get(&self, key: &E::Key) -> Result<Option<E>, DomainError> {
        match self.path_for(key.as_str()) {
            Some(path) => self.read(&path).await,
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<E>, DomainError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            DomainError::storage(format!("Failed to list '{}': {}", self.dir.display(), e))
        })?;

        let mut all = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DomainError::storage(format!("Failed to list entries: {}", e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(Some(entity)) => all.push(entity),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Skipping unreadable entry"),
            }
        }
        sort_entities(&mut all);
        Ok(all)
    }

    async fn create(&self, entity: E) -> Result<E, DomainError> {
        let key = entity.key().as_str();
        let path = self
            .path_for(key)
            .ok_or_else(|| DomainError::validation(format!("Invalid storage key '{}'", key)))?;

        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(DomainError::conflict(format!(
                "{} entry '{}' already exists",
                E::COLLECTION,
                key
            )));
        }
        self.write(&path, &entity).await?;
        Ok(entity)
    }

    async fn update(&self, entity: E) -> Result<E, DomainError> {
        let key = entity.key().as_str();
        let not_found = || DomainError::not_found(format!("{} entry '{}' not found", E::COLLECTION, key));
        let path = self.path_for(key).ok_or_else(not_found)?;

        let _guard = self.write_lock.lock().await;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(not_found());
        }
        self.write(&path, &entity).await?;
        Ok(entity)
    }

    async fn delete(&self, key: &E::Key) -> Result<bool, DomainError> {
        let Some(path) = self.path_for(key.as_str()) else {
            return Ok(false);
        };

        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DomainError::storage(format!(
                "Failed to delete '{}': {}",
                path.display(),
                e
            ))),
        }
    }
}
