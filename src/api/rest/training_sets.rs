//! Training set endpoints, scoped to the calling user

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
};

use crate::api::middleware::UserId;
use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::training_set::{
    CreateTrainingSetRequest, TrainingImage, TrainingSet, TrainingSetId,
};
use crate::infrastructure::services::ImageUpload;

const IMAGES_FIELD: &str = "images";

/// POST /api/training-sets
pub async fn create_training_set(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<CreateTrainingSetRequest>,
) -> Result<(StatusCode, Json<TrainingSet>), ApiError> {
    let set = state.training_sets.create(&user_id, request).await?;
    Ok((StatusCode::CREATED, Json(set)))
}

/// GET /api/training-sets
pub async fn list_training_sets(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Vec<TrainingSet>>, ApiError> {
    Ok(Json(state.training_sets.list(&user_id).await?))
}

/// GET /api/training-sets/{set_id}
pub async fn get_training_set(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(set_id): Path<String>,
) -> Result<Json<TrainingSet>, ApiError> {
    Ok(Json(
        state
            .training_sets
            .get(&TrainingSetId::new(set_id), &user_id)
            .await?,
    ))
}

/// DELETE /api/training-sets/{set_id}
pub async fn delete_training_set(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(set_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .training_sets
        .delete(&TrainingSetId::new(set_id), &user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/training-sets/{set_id}/images, multipart field `images`
pub async fn upload_images(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(set_id): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Vec<TrainingImage>>), ApiError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some(IMAGES_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;
        files.push(ImageUpload {
            file_name,
            content_type,
            bytes,
        });
    }

    let images = state
        .training_sets
        .add_images(&TrainingSetId::new(set_id), &user_id, files)
        .await?;
    Ok((StatusCode::CREATED, Json(images)))
}

/// GET /api/training-sets/{set_id}/images
pub async fn list_images(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(set_id): Path<String>,
) -> Result<Json<Vec<TrainingImage>>, ApiError> {
    Ok(Json(
        state
            .training_sets
            .list_images(&TrainingSetId::new(set_id), &user_id)
            .await?,
    ))
}

/// POST /api/training-sets/{set_id}/select
pub async fn select_training_set(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(set_id): Path<String>,
) -> Result<Json<TrainingSet>, ApiError> {
    Ok(Json(
        state
            .training_sets
            .select(&TrainingSetId::new(set_id), &user_id)
            .await?,
    ))
}
