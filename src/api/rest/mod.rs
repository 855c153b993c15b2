//! Resource endpoints mounted under `/api`

pub mod models;
pub mod training_sets;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

use super::state::AppState;
use crate::infrastructure::services::MAX_FILES_PER_UPLOAD;

/// Multipart framing allowance on top of the raw file bytes
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

pub fn create_api_router(max_upload_bytes: usize) -> Router<AppState> {
    let upload_limit = max_upload_bytes * MAX_FILES_PER_UPLOAD + MULTIPART_OVERHEAD;

    Router::new()
        // Models
        .route("/models", get(models::list_models).post(models::create_model))
        .route(
            "/models/{model_id}",
            get(models::get_model).delete(models::delete_model),
        )
        .route("/models/{model_id}/train", post(models::train_model))
        .route("/models/{model_id}/reset", post(models::reset_model))
        .route("/models/{model_id}/cancel", post(models::cancel_training))
        .route("/models/{model_id}/predict", post(models::predict))
        .route(
            "/models/{model_id}/predict-image",
            post(models::predict_image)
                .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD)),
        )
        // Training sets
        .route(
            "/training-sets",
            get(training_sets::list_training_sets).post(training_sets::create_training_set),
        )
        .route(
            "/training-sets/{set_id}",
            get(training_sets::get_training_set).delete(training_sets::delete_training_set),
        )
        .route(
            "/training-sets/{set_id}/images",
            get(training_sets::list_images)
                .post(training_sets::upload_images)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/training-sets/{set_id}/select",
            post(training_sets::select_training_set),
        )
}
