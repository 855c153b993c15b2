//! User-owned image collections

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::domain::storage::Storage;
use crate::domain::training_set::{CreateTrainingSetRequest, TrainingImage, TrainingSet, TrainingSetId};
use crate::domain::{DomainError, FieldError};

/// Files accepted by a single upload call
pub const MAX_FILES_PER_UPLOAD: usize = 10;

/// One file taken from a multipart upload
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl ImageUpload {
    /// Declared type, or the one implied by the file name
    fn mime_type(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream")
            .map(str::to_string)
            .or_else(|| {
                self.file_name
                    .as_deref()
                    .and_then(|name| mime_guess::from_path(name).first())
                    .map(|mime| mime.essence_str().to_string())
            })
    }

    fn extension(&self, mime_type: &str) -> String {
        self.file_name
            .as_deref()
            .and_then(|name| std::path::Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .or_else(|| {
                mime_guess::get_mime_extensions_str(mime_type)
                    .and_then(|exts| exts.first())
                    .map(|ext| ext.to_string())
            })
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct TrainingSetService {
    storage: Arc<dyn Storage<TrainingSet>>,
    upload_dir: PathBuf,
    max_upload_bytes: usize,
    writers: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl TrainingSetService {
    /// Service writing uploads below `upload_dir`
    pub fn new(
        storage: Arc<dyn Storage<TrainingSet>>,
        upload_dir: impl Into<PathBuf>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            storage,
            upload_dir: upload_dir.into(),
            max_upload_bytes,
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for the other writes of the same user to finish
    async fn lock_user(&self, user_id: &str) -> Result<OwnedMutexGuard<()>, DomainError> {
        let lock = {
            let mut writers = self
                .writers
                .lock()
                .map_err(|e| DomainError::internal(format!("Writer table lock poisoned: {}", e)))?;
            writers.entry(user_id.to_string()).or_default().clone()
        };
        Ok(lock.lock_owned().await)
    }

    /// Largest accepted file, in bytes
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// New empty set owned by `user_id`
    #[instrument(skip(self, request))]
    pub async fn create(
        &self,
        user_id: &str,
        request: CreateTrainingSetRequest,
    ) -> Result<TrainingSet, DomainError> {
        request.validate()?;
        let set = self
            .storage
            .create(TrainingSet::new(request.name, request.description, user_id))
            .await?;
        info!(training_set_id = %set.id, name = %set.name, "Training set created");
        Ok(set)
    }

    /// Sets owned by `user_id`, newest first
    pub async fn list(&self, user_id: &str) -> Result<Vec<TrainingSet>, DomainError> {
        let mut sets: Vec<TrainingSet> = self
            .storage
            .list()
            .await?
            .into_iter()
            .filter(|set| set.is_owned_by(user_id))
            .collect();
        sets.reverse();
        Ok(sets)
    }

    /// Sets of other users are reported as missing
    pub async fn get(&self, id: &TrainingSetId, user_id: &str) -> Result<TrainingSet, DomainError> {
        self.storage
            .get(id)
            .await?
            .filter(|set| set.is_owned_by(user_id))
            .ok_or_else(|| DomainError::not_found(format!("Training set '{}' not found", id)))
    }

    /// Removes the set and its image files
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &TrainingSetId, user_id: &str) -> Result<(), DomainError> {
        let _writing = self.lock_user(user_id).await?;
        let set = self.get(id, user_id).await?;
        self.storage.delete(id).await?;

        for image in &set.images {
            if let Err(e) = tokio::fs::remove_file(&image.path).await {
                warn!(path = %image.path, error = %e, "Failed to remove image file");
            }
        }
        info!(images = set.images.len(), "Training set deleted");
        Ok(())
    }

    fn check_uploads(&self, files: &[ImageUpload]) -> Result<Vec<String>, DomainError> {
        if files.is_empty() {
            return Err(DomainError::invalid_fields(
                "No files uploaded",
                vec![FieldError::new("images", "at least one image is required")],
            ));
        }
        if files.len() > MAX_FILES_PER_UPLOAD {
            return Err(DomainError::invalid_fields(
                "Too many files",
                vec![FieldError::new(
                    "images",
                    format!("at most {} files per upload", MAX_FILES_PER_UPLOAD),
                )],
            ));
        }

        let mut errors = Vec::new();
        let mut mime_types = Vec::with_capacity(files.len());
        for (i, file) in files.iter().enumerate() {
            let field = format!("images[{}]", i);
            if file.bytes.len() > self.max_upload_bytes {
                errors.push(FieldError::new(
                    field.clone(),
                    format!("file exceeds {} bytes", self.max_upload_bytes),
                ));
            }
            match file.mime_type() {
                Some(mime) if mime.starts_with("image/") => mime_types.push(mime),
                _ => errors.push(FieldError::new(field, "only image files are allowed")),
            }
        }

        if errors.is_empty() {
            Ok(mime_types)
        } else {
            Err(DomainError::invalid_fields("Invalid upload", errors))
        }
    }

    /// Stores the files under the upload directory and links them to the set
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn add_images(
        &self,
        id: &TrainingSetId,
        user_id: &str,
        files: Vec<ImageUpload>,
    ) -> Result<Vec<TrainingImage>, DomainError> {
        let _writing = self.lock_user(user_id).await?;
        let mut set = self.get(id, user_id).await?;
        let mime_types = self.check_uploads(&files)?;

        tokio::fs::create_dir_all(&self.upload_dir).await.map_err(|e| {
            DomainError::storage(format!(
                "Failed to create '{}': {}",
                self.upload_dir.display(),
                e
            ))
        })?;

        let mut images = Vec::with_capacity(files.len());
        for (file, mime_type) in files.iter().zip(mime_types) {
            let filename = format!("{}{}", uuid::Uuid::new_v4(), file.extension(&mime_type));
            let path = self.upload_dir.join(&filename);
            if let Err(e) = tokio::fs::write(&path, &file.bytes).await {
                self.discard(&images).await;
                return Err(DomainError::storage(format!(
                    "Failed to write '{}': {}",
                    path.display(),
                    e
                )));
            }
            images.push(TrainingImage::new(
                file.file_name.clone().unwrap_or_else(|| filename.clone()),
                path.to_string_lossy(),
                filename,
                mime_type,
                file.bytes.len() as u64,
            ));
        }

        set.add_images(images.clone());
        if let Err(e) = self.storage.update(set).await {
            self.discard(&images).await;
            return Err(e);
        }
        info!(added = images.len(), "Images uploaded");
        Ok(images)
    }

    async fn discard(&self, images: &[TrainingImage]) {
        for image in images {
            let _ = tokio::fs::remove_file(&image.path).await;
        }
    }

    /// Images of one set, in upload order
    pub async fn list_images(
        &self,
        id: &TrainingSetId,
        user_id: &str,
    ) -> Result<Vec<TrainingImage>, DomainError> {
        Ok(self.get(id, user_id).await?.images)
    }

    /// Marks one set as the selected one and clears every other set of the user
    #[instrument(skip(self))]
    pub async fn select(&self, id: &TrainingSetId, user_id: &str) -> Result<TrainingSet, DomainError> {
        let _writing = self.lock_user(user_id).await?;
        let mut selected = self.get(id, user_id).await?;

        for mut other in self.list(user_id).await? {
            if other.id != selected.id && other.is_selected {
                other.set_selected(false);
                self.storage.update(other).await?;
            }
        }

        selected.set_selected(true);
        self.storage.update(selected).await
    }
}
