//! Real image datasets: one training set per class

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::preprocess;
use crate::domain::storage::Storage;
use crate::domain::training::{ClassLabel, Dataset, DatasetProvider, InputShape};
use crate::domain::training_set::{TrainingSet, TrainingSetId};
use crate::domain::{DomainError, FieldError};

/// Loads uploaded images; the class index of a set is its position in the request
#[derive(Debug, Clone)]
pub struct ImageDatasetProvider {
    training_sets: Arc<dyn Storage<TrainingSet>>,
    augment: bool,
}

impl ImageDatasetProvider {
    pub fn new(training_sets: Arc<dyn Storage<TrainingSet>>, augment: bool) -> Self {
        Self {
            training_sets,
            augment,
        }
    }

    async fn fetch_all(&self, ids: &[String]) -> Result<Vec<TrainingSet>, DomainError> {
        let mut sets = Vec::with_capacity(ids.len());
        for id in ids {
            let set = self
                .training_sets
                .get(&TrainingSetId::new(id.as_str()))
                .await?
                .ok_or_else(|| DomainError::not_found(format!("Training set '{}' not found", id)))?;
            sets.push(set);
        }
        Ok(sets)
    }
}

#[async_trait]
impl DatasetProvider for ImageDatasetProvider {
    async fn resolve(&self, training_set_ids: &[String]) -> Result<Vec<ClassLabel>, DomainError> {
        let mut errors = Vec::new();
        if training_set_ids.len() < 2 {
            errors.push(FieldError::new(
                "trainingSetIds",
                "image training needs at least two training sets, one per class",
            ));
        }
        let unique: HashSet<&String> = training_set_ids.iter().collect();
        if unique.len() != training_set_ids.len() {
            errors.push(FieldError::new("trainingSetIds", "must not contain duplicates"));
        }

        let sets = self.fetch_all(training_set_ids).await?;
        for (index, set) in sets.iter().enumerate() {
            if set.images.is_empty() {
                errors.push(FieldError::new(
                    format!("trainingSetIds[{}]", index),
                    format!("training set '{}' has no images", set.name),
                ));
            }
        }

        if !errors.is_empty() {
            return Err(DomainError::invalid_fields("Invalid training data", errors));
        }

        Ok(sets
            .into_iter()
            .map(|set| ClassLabel {
                training_set_id: set.id.to_string(),
                name: set.name,
            })
            .collect())
    }

    async fn load(
        &self,
        training_set_ids: &[String],
        input: InputShape,
        _num_classes: usize,
    ) -> Result<Dataset, DomainError> {
        let InputShape::Spatial {
            height,
            width,
            channels,
        } = input
        else {
            return Err(DomainError::training(format!(
                "shape mismatch: image training needs a [height, width, channels] inputShape but the network input is {}",
                input
            )));
        };

        let sets = self.fetch_all(training_set_ids).await?;
        let files: Vec<(PathBuf, usize)> = sets
            .iter()
            .enumerate()
            .flat_map(|(class, set)| set.images.iter().map(move |image| (PathBuf::from(&image.path), class)))
            .collect();
        let num_classes = sets.len();
        let augment = self.augment;

        let dataset = tokio::task::spawn_blocking(move || -> Result<Dataset, DomainError> {
            let mut inputs = Vec::new();
            let mut labels = Vec::new();
            for (path, class) in files {
                let bytes = std::fs::read(&path).map_err(|e| {
                    DomainError::training(format!("Failed to read '{}': {}", path.display(), e))
                })?;
                match preprocess::samples_from_bytes(&bytes, height, width, channels, augment) {
                    Ok(samples) => {
                        for sample in samples {
                            inputs.extend(sample);
                            labels.push(class);
                        }
                    }
                    Err(preprocess::PreprocessError::Decode(reason)) => {
                        warn!(path = %path.display(), %reason, "Skipping undecodable image");
                    }
                    Err(e) => return Err(DomainError::training(e.to_string())),
                }
            }
            Ok(Dataset::new(inputs, input.sample_dims(), labels, num_classes))
        })
        .await
        .map_err(|e| DomainError::internal(format!("Image loading task failed: {}", e)))??;

        info!(
            samples = dataset.len(),
            classes = num_classes,
            augment,
            "Loaded image dataset"
        );
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::training_set::TrainingImage;
    use crate::infrastructure::dataset::preprocess::fixtures::png;
    use crate::infrastructure::storage::InMemoryStorage;

    struct Fixture {
        provider: ImageDatasetProvider,
        ids: Vec<String>,
        dir: PathBuf,
    }

    async fn fixture(images_per_set: &[usize], augment: bool) -> Fixture {
        let dir = std::env::temp_dir().join(format!("images-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let storage = Arc::new(InMemoryStorage::<TrainingSet>::new());
        let mut ids = Vec::new();

        for (class, count) in images_per_set.iter().enumerate() {
            let mut set = TrainingSet::new(format!("class-{}", class), None, "user");
            for n in 0..*count {
                let path = dir.join(format!("{}-{}.png", class, n));
                std::fs::write(&path, png(8, 8, [class as u8 * 200, 10, 10])).unwrap();
                set.add_images(vec![TrainingImage::new(
                    "x.png",
                    path.to_string_lossy(),
                    "x.png",
                    "image/png",
                    1,
                )]);
            }
            ids.push(set.id.to_string());
            storage.create(set).await.unwrap();
        }

        Fixture {
            provider: ImageDatasetProvider::new(storage, augment),
            ids,
            dir,
        }
    }

    #[tokio::test]
    async fn test_resolve_returns_labels_in_request_order() {
        let fixture = fixture(&[1, 1], false).await;
        let labels = fixture.provider.resolve(&fixture.ids).await.unwrap();

        assert_eq!(labels[0].name, "class-0");
        assert_eq!(labels[1].training_set_id, fixture.ids[1]);
        let _ = std::fs::remove_dir_all(fixture.dir);
    }

    #[tokio::test]
    async fn test_resolve_rejects_single_or_unknown_sets() {
        let fixture = fixture(&[1], false).await;
        let error = fixture.provider.resolve(&fixture.ids).await.unwrap_err();
        assert!(matches!(error, DomainError::Validation { .. }));

        let error = fixture
            .provider
            .resolve(&[fixture.ids[0].clone(), "missing".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(error, DomainError::NotFound { .. }));
        let _ = std::fs::remove_dir_all(fixture.dir);
    }

    #[tokio::test]
    async fn test_resolve_rejects_empty_set() {
        let fixture = fixture(&[1, 0], false).await;
        let error = fixture.provider.resolve(&fixture.ids).await.unwrap_err();
        assert_eq!(error.field_errors()[0].field, "trainingSetIds[1]");
        let _ = std::fs::remove_dir_all(fixture.dir);
    }

    #[tokio::test]
    async fn test_load_with_augmentation() {
        let fixture = fixture(&[2, 3], true).await;
        let input = InputShape::Spatial {
            height: 4,
            width: 4,
            channels: 3,
        };
        let dataset = fixture.provider.load(&fixture.ids, input, 2).await.unwrap();

        assert_eq!(dataset.len(), 10);
        assert_eq!(dataset.sample_dims, vec![3, 4, 4]);
        assert_eq!(dataset.labels.iter().filter(|l| **l == 1).count(), 6);
        assert_eq!(dataset.inputs.len(), 10 * 48);
        let _ = std::fs::remove_dir_all(fixture.dir);
    }

    #[tokio::test]
    async fn test_load_rejects_flat_input() {
        let fixture = fixture(&[1, 1], false).await;
        let error = fixture
            .provider
            .load(&fixture.ids, InputShape::Flat { width: 48 }, 2)
            .await
            .unwrap_err();

        assert!(error.to_string().contains("shape mismatch"));
        let _ = std::fs::remove_dir_all(fixture.dir);
    }
}
