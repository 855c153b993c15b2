//! Caller identity for user-owned resources

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};

use crate::api::types::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Opaque id of the calling user, taken from the `x-user-id` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        extract_user_id(&parts.headers).map(UserId)
    }
}

pub fn extract_user_id(headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get(USER_ID_HEADER)
        .ok_or_else(|| {
            ApiError::unauthorized(format!("Missing '{}' header", USER_ID_HEADER))
                .with_code("missing_user")
        })?
        .to_str()
        .map_err(|_| ApiError::bad_request(format!("Invalid '{}' header encoding", USER_ID_HEADER)))?
        .trim();

    if value.is_empty() {
        return Err(ApiError::unauthorized(format!("Empty '{}' header", USER_ID_HEADER))
            .with_code("missing_user"));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    #[test]
    fn test_extracts_trimmed_id() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static(" user-1 "));
        assert_eq!(extract_user_id(&headers).unwrap(), "user-1");
    }

    #[test]
    fn test_missing_or_blank_header() {
        let err = extract_user_id(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("  "));
        assert_eq!(extract_user_id(&headers).unwrap_err().status, StatusCode::UNAUTHORIZED);
    }
}
