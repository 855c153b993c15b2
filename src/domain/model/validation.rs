//! Model creation request validation

use serde_json::Value;

use crate::domain::layer::{LayerLimits, LayerSpec, validate_layers_within};
use crate::domain::{DomainError, FieldError};

/// A validated model definition
#[derive(Debug, Clone, PartialEq)]
pub struct CreateModelRequest {
    pub name: String,
    pub description: Option<String>,
    pub layers: Vec<LayerSpec>,
}

/// Checks a definition against the default layer limits
pub fn validate_create_model(body: &Value) -> Result<CreateModelRequest, DomainError> {
    validate_create_model_within(body, &LayerLimits::default())
}

/// Checks name, description and layers together and reports every problem at once
pub fn validate_create_model_within(
    body: &Value,
    limits: &LayerLimits,
) -> Result<CreateModelRequest, DomainError> {
    let mut errors = Vec::new();

    let name = match body.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => Some(name.clone()),
        Some(Value::String(_)) => {
            errors.push(FieldError::new("name", "must not be empty"));
            None
        }
        Some(_) => {
            errors.push(FieldError::new("name", "must be a string"));
            None
        }
        None => {
            errors.push(FieldError::new("name", "is required"));
            None
        }
    };

    let description = match body.get("description") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(_) => {
            errors.push(FieldError::new("description", "must be a string"));
            None
        }
    };

    let layers = match body.get("layers") {
        Some(raw) => validate_layers_within(raw, limits)
            .map_err(|e| errors.extend(e.into_inner()))
            .ok(),
        None => {
            errors.push(FieldError::new("layers", "is required"));
            None
        }
    };

    match (name, layers) {
        (Some(name), Some(layers)) if errors.is_empty() => Ok(CreateModelRequest {
            name,
            description,
            layers,
        }),
        _ => Err(DomainError::invalid_fields("Invalid model definition", errors)),
    }
}
