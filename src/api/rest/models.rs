//! Model endpoints: definition, training and inference

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::model::{ModelId, ModelRecord};
use crate::domain::training::{RunStatus, TrainRequest};
use crate::infrastructure::services::{ImagePredictResponse, PredictRequest, PredictResponse};

const IMAGE_FIELD: &str = "image";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub model_id: ModelId,
    pub status: &'static str,
}

/// POST /api/models
pub async fn create_model(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<ModelRecord>), ApiError> {
    let record = state.models.create(&body).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/models
pub async fn list_models(State(state): State<AppState>) -> Result<Json<Vec<ModelRecord>>, ApiError> {
    Ok(Json(state.models.list().await?))
}

/// GET /api/models/{model_id}
pub async fn get_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<Json<ModelRecord>, ApiError> {
    Ok(Json(state.models.get(&ModelId::new(model_id)).await?))
}

/// DELETE /api/models/{model_id}
pub async fn delete_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.models.delete(&ModelId::new(model_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/models/{model_id}/train
///
/// 200 with the run result, or 202 when `background` is set
pub async fn train_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    Json(request): Json<TrainRequest>,
) -> Result<Response, ApiError> {
    debug!(model_id = %model_id, epochs = request.epochs, "Train requested");
    let result = state.training.train(&ModelId::new(model_id), request).await?;
    let status = match result.status {
        RunStatus::Training => StatusCode::ACCEPTED,
        RunStatus::Completed | RunStatus::Failed => StatusCode::OK,
    };
    Ok((status, Json(result)).into_response())
}

/// POST /api/models/{model_id}/reset
pub async fn reset_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<Json<ModelRecord>, ApiError> {
    Ok(Json(state.models.reset(&ModelId::new(model_id)).await?))
}

/// POST /api/models/{model_id}/cancel
pub async fn cancel_training(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<(StatusCode, Json<CancelResponse>), ApiError> {
    let model_id = ModelId::new(model_id);
    state.training.cancel(&model_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            model_id,
            status: "cancelling",
        }),
    ))
}

/// POST /api/models/{model_id}/predict
pub async fn predict(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, ApiError> {
    Ok(Json(state.inference.predict(&ModelId::new(model_id), request).await?))
}

/// POST /api/models/{model_id}/predict-image, multipart field `image`
pub async fn predict_image(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<ImagePredictResponse>, ApiError> {
    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() == Some(IMAGE_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read image: {}", e)))?;
            image = Some(bytes);
            break;
        }
    }

    let image = image
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| ApiError::bad_request("No image provided"))?;
    Ok(Json(
        state
            .inference
            .predict_image(&ModelId::new(model_id), image)
            .await?,
    ))
}
