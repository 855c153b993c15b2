//! Error envelope returned by every endpoint

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::domain::{DomainError, FieldError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorType {
    InvalidRequestError,
    AuthenticationError,
    NotFoundError,
    ConflictError,
    InferenceError,
    ServerError,
}

impl std::fmt::Display for ApiErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRequestError => write!(f, "invalid_request_error"),
            Self::AuthenticationError => write!(f, "authentication_error"),
            Self::NotFoundError => write!(f, "not_found_error"),
            Self::ConflictError => write!(f, "conflict_error"),
            Self::InferenceError => write!(f, "inference_error"),
            Self::ServerError => write!(f, "server_error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: ApiErrorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Field-level problems of a rejected request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldErrorDetail>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldErrorDetail {
    pub field: String,
    pub message: String,
}

impl From<&FieldError> for FieldErrorDetail {
    fn from(error: &FieldError) -> Self {
        Self {
            field: error.field.clone(),
            message: error.message.clone(),
        }
    }
}

/// API error with status code
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub response: ApiErrorResponse,
}

impl ApiError {
    /// Error with an explicit status and type
    pub fn new(status: StatusCode, error_type: ApiErrorType, message: impl Into<String>) -> Self {
        Self {
            status,
            response: ApiErrorResponse {
                error: ApiErrorDetail {
                    message: message.into(),
                    error_type,
                    code: None,
                    details: None,
                },
            },
        }
    }

    /// Sets the machine-readable code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.response.error.code = Some(code.into());
        self
    }

    /// Attaches field errors under `details`
    pub fn with_details(mut self, errors: &[FieldError]) -> Self {
        if !errors.is_empty() {
            self.response.error.details = Some(errors.iter().map(FieldErrorDetail::from).collect());
        }
        self
    }

    /// 400 invalid_request_error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ApiErrorType::InvalidRequestError, message)
    }

    /// 401 authentication_error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, ApiErrorType::AuthenticationError, message)
    }

    /// 404 not_found_error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ApiErrorType::NotFoundError, message)
    }

    /// 409 conflict_error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, ApiErrorType::ConflictError, message)
    }

    /// 422 inference_error
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, ApiErrorType::InferenceError, message)
    }

    /// 500 server_error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, ApiErrorType::ServerError, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match &err {
            DomainError::NotFound { message } => Self::not_found(message).with_code("not_found"),
            DomainError::Validation { message, errors } => Self::bad_request(message)
                .with_code("validation_error")
                .with_details(errors),
            DomainError::Conflict { message } => Self::conflict(message).with_code("conflict"),
            DomainError::NotTrained { message } => {
                Self::conflict(message).with_code("model_not_trained")
            }
            DomainError::Training { message } => {
                Self::internal(message).with_code("training_failed")
            }
            DomainError::Inference { message } => {
                Self::unprocessable(message).with_code("inference_failed")
            }
            DomainError::Storage { message } => Self::internal(message).with_code("storage_error"),
            DomainError::Configuration { message } => {
                Self::internal(message).with_code("configuration_error")
            }
            DomainError::Internal { message } => Self::internal(message).with_code("internal_error"),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            self.response.error.error_type, self.response.error.message
        )
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_creation() {
        let err = ApiError::bad_request("No image provided");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.response.error.error_type, ApiErrorType::InvalidRequestError);
        assert_eq!(err.response.error.message, "No image provided");
    }

    #[test]
    fn test_domain_error_status_mapping() {
        let cases = [
            (DomainError::not_found("x"), StatusCode::NOT_FOUND),
            (DomainError::validation("x"), StatusCode::BAD_REQUEST),
            (DomainError::conflict("x"), StatusCode::CONFLICT),
            (DomainError::not_trained("x"), StatusCode::CONFLICT),
            (DomainError::training("x"), StatusCode::INTERNAL_SERVER_ERROR),
            (DomainError::inference("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::storage("x"), StatusCode::INTERNAL_SERVER_ERROR),
            (DomainError::configuration("x"), StatusCode::INTERNAL_SERVER_ERROR),
            (DomainError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (domain, status) in cases {
            assert_eq!(ApiError::from(domain).status, status);
        }
    }

    #[test]
    fn test_not_trained_code() {
        let err = ApiError::from(DomainError::not_trained("Model 'm' has not been trained"));
        assert_eq!(err.response.error.code.as_deref(), Some("model_not_trained"));
    }

    #[test]
    fn test_validation_details_serialization() {
        let err = ApiError::from(DomainError::invalid_fields(
            "Invalid model definition",
            vec![FieldError::new("layers[0].units", "must be a positive integer")],
        ));
        let json = serde_json::to_value(&err.response).unwrap();

        assert_eq!(json["error"]["type"], "invalid_request_error");
        assert_eq!(json["error"]["code"], "validation_error");
        assert_eq!(json["error"]["details"][0]["field"], "layers[0].units");
    }

    #[test]
    fn test_details_omitted_when_empty() {
        let err = ApiError::from(DomainError::conflict("busy"));
        let json = serde_json::to_value(&err.response).unwrap();
        assert!(json["error"].get("details").is_none());
    }
}
