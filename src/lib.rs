//! Layerforge
//!
//! HTTP service for defining, training and querying small neural networks:
//! - Layer-by-layer model definitions with validation
//! - Background training with early stopping, checkpoints and cancellation
//! - Vector and image inference against trained models
//! - User-owned image training sets

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;

use api::state::AppState;
use config::TrainingDataSource;
use domain::DomainError;
use domain::layer::LayerLimits;
use domain::model::ModelRecord;
use domain::training::DatasetProvider;
use domain::training_set::TrainingSet;
use infrastructure::dataset::{ImageDatasetProvider, PlaceholderDatasetProvider};
use infrastructure::nn::{CheckpointStore, GraphStore};
use infrastructure::services::{
    InferenceService, ModelRegistry, TrainingService, TrainingSetService, TrainingSettings,
};
use infrastructure::storage::StorageFactory;
use tracing::{info, warn};

/// Create the application state with all services initialized
pub async fn create_app_state(config: &AppConfig) -> Result<AppState, DomainError> {
    let storage = &config.storage;
    info!(backend = ?storage.backend, "Storage backend");

    let model_storage = StorageFactory::create::<ModelRecord>(storage.backend, &storage.data_dir).await?;
    let set_storage = StorageFactory::create::<TrainingSet>(storage.backend, &storage.data_dir).await?;

    let graphs = Arc::new(GraphStore::new(CheckpointStore::new(
        config.training.checkpoint_dir.clone(),
    )));
    let registry = Arc::new(
        ModelRegistry::new(model_storage, graphs).with_limits(LayerLimits::from(&config.limits)),
    );

    let interrupted = registry.recover_interrupted().await?;
    if interrupted > 0 {
        warn!(models = interrupted, "Marked interrupted training runs as failed");
    }

    let datasets: Arc<dyn DatasetProvider> = match config.training.data_source {
        TrainingDataSource::Images => Arc::new(ImageDatasetProvider::new(
            set_storage.clone(),
            config.training.augment,
        )),
        TrainingDataSource::Placeholder => Arc::new(PlaceholderDatasetProvider::new(
            config.training.placeholder_samples,
        )),
    };
    info!(source = ?config.training.data_source, "Training data source");

    let training = Arc::new(TrainingService::new(
        registry.clone(),
        datasets,
        TrainingSettings::from(&config.training),
    ));
    let inference = Arc::new(InferenceService::new(registry.clone(), set_storage.clone()));
    let training_sets = Arc::new(TrainingSetService::new(
        set_storage,
        storage.upload_dir.clone(),
        storage.max_upload_bytes,
    ));

    Ok(AppState::new(registry, training, inference, training_sets))
}
