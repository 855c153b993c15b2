//! Training set entities

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::storage::{StorageEntity, StorageKey};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingSetId(String);

impl TrainingSetId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrainingSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StorageKey for TrainingSetId {
    fn as_str(&self) -> &str {
        &self.0
    }
}

/// An uploaded image stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingImage {
    pub id: String,
    /// Name of the stored file inside the upload directory
    pub filename: String,
    pub original_name: String,
    pub path: String,
    pub mime_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl TrainingImage {
    pub fn new(
        original_name: impl Into<String>,
        path: impl Into<String>,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            filename: filename.into(),
            original_name: original_name.into(),
            path: path.into(),
            mime_type: mime_type.into(),
            size,
            created_at: Utc::now(),
        }
    }
}

/// A named collection of images; one training set is one class during training
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSet {
    pub id: TrainingSetId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub user_id: String,
    pub is_selected: bool,
    pub images: Vec<TrainingImage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StorageEntity for TrainingSet {
    type Key = TrainingSetId;
    const COLLECTION: &'static str = "training_sets";

    fn key(&self) -> &Self::Key {
        &self.id
    }

    fn sort_key(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

impl TrainingSet {
    pub fn new(name: impl Into<String>, description: Option<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TrainingSetId::generate(),
            name: name.into(),
            description,
            user_id: user_id.into(),
            is_selected: false,
            images: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn add_images(&mut self, images: impl IntoIterator<Item = TrainingImage>) {
        self.images.extend(images);
        self.updated_at = Utc::now();
    }

    pub fn set_selected(&mut self, selected: bool) {
        if self.is_selected != selected {
            self.is_selected = selected;
            self.updated_at = Utc::now();
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTrainingSetRequest {
    #[validate(length(min = 1, max = 200, message = "must be between 1 and 200 characters"))]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_set_is_unselected_and_empty() {
        let set = TrainingSet::new("cats", None, "user-1");
        assert!(!set.is_selected);
        assert!(set.images.is_empty());
        assert!(set.is_owned_by("user-1"));
        assert!(!set.is_owned_by("user-2"));
    }

    #[test]
    fn test_add_images_touches_updated_at() {
        let mut set = TrainingSet::new("cats", None, "user-1");
        let before = set.updated_at;
        set.add_images(vec![TrainingImage::new("a.png", "/tmp/a.png", "a.png", "image/png", 10)]);

        assert_eq!(set.images.len(), 1);
        assert!(set.updated_at >= before);
    }

    #[test]
    fn test_serializes_camel_case() {
        let value = serde_json::to_value(TrainingSet::new("dogs", Some("d".into()), "u")).unwrap();
        assert_eq!(value["isSelected"], false);
        assert_eq!(value["userId"], "u");
    }

    #[test]
    fn test_create_request_rejects_empty_name() {
        let request = CreateTrainingSetRequest {
            name: String::new(),
            description: None,
        };
        assert!(request.validate().is_err());
    }
}
