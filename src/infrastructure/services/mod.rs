//! Application services

mod inference_service;
mod model_registry;
mod training_service;
mod training_set_service;

pub use inference_service::{
    ImagePredictResponse, ImagePrediction, InferenceService, PredictRequest, PredictResponse,
};
pub use model_registry::ModelRegistry;
pub use training_service::{TrainingService, TrainingSettings};
pub use training_set_service::{ImageUpload, MAX_FILES_PER_UPLOAD, TrainingSetService};
