//! Shared services handed to every handler

use std::sync::Arc;

use crate::infrastructure::services::{
    InferenceService, ModelRegistry, TrainingService, TrainingSetService,
};

#[derive(Debug, Clone)]
pub struct AppState {
    pub models: Arc<ModelRegistry>,
    pub training: Arc<TrainingService>,
    pub inference: Arc<InferenceService>,
    pub training_sets: Arc<TrainingSetService>,
}

impl AppState {
    pub fn new(
        models: Arc<ModelRegistry>,
        training: Arc<TrainingService>,
        inference: Arc<InferenceService>,
        training_sets: Arc<TrainingSetService>,
    ) -> Self {
        Self {
            models,
            training,
            inference,
            training_sets,
        }
    }
}
