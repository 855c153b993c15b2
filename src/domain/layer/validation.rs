//! Layer list validation
//!
//! Works on the raw JSON so that every offending field is reported in a
//! single pass instead of stopping at the first deserialization error.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{DomainError, FieldError};

use super::entity::{Activation, LayerSpec};

/// Every problem found in a submitted layer list
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Invalid layer definition ({} error(s))", .0.len())]
pub struct LayerValidationErrors(pub Vec<FieldError>);

impl LayerValidationErrors {
    pub fn into_inner(self) -> Vec<FieldError> {
        self.0
    }
}

impl From<LayerValidationErrors> for DomainError {
    fn from(errors: LayerValidationErrors) -> Self {
        DomainError::invalid_fields("Invalid layer definition", errors.0)
    }
}

/// Upper bounds on what a layer list may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerLimits {
    /// Largest `units`, `filters`, window side or `inputShape` entry
    pub max_dimension: usize,
    /// Largest number of scalars in one input sample
    pub max_input_volume: usize,
    /// Largest trainable parameter count of the resolved network
    pub max_parameters: usize,
}

impl Default for LayerLimits {
    fn default() -> Self {
        Self {
            max_dimension: 4096,
            max_input_volume: 65_536,
            max_parameters: 10_000_000,
        }
    }
}

/// Validates a raw `layers` value against the default limits
pub fn validate_layers(value: &Value) -> Result<Vec<LayerSpec>, LayerValidationErrors> {
    validate_layers_within(value, &LayerLimits::default())
}

/// Validates a raw `layers` value and returns the typed layer list
pub fn validate_layers_within(
    value: &Value,
    limits: &LayerLimits,
) -> Result<Vec<LayerSpec>, LayerValidationErrors> {
    let mut errors = Vec::new();

    let Some(items) = value.as_array() else {
        return Err(LayerValidationErrors(vec![FieldError::new(
            "layers",
            "must be an array of layers",
        )]));
    };

    if items.is_empty() {
        errors.push(FieldError::new("layers", "must contain at least one layer"));
    }

    let mut checker = Checker {
        limits: *limits,
        errors: &mut errors,
    };
    for (index, item) in items.iter().enumerate() {
        let path = format!("layers[{}]", index);
        match item.as_object() {
            Some(fields) => checker.layer(&path, index, fields),
            None => checker.errors.push(FieldError::new(path, "must be an object")),
        }
    }

    if !errors.is_empty() {
        return Err(LayerValidationErrors(errors));
    }

    serde_json::from_value(value.clone())
        .map_err(|e| LayerValidationErrors(vec![FieldError::new("layers", e.to_string())]))
}

struct Checker<'a> {
    limits: LayerLimits,
    errors: &'a mut Vec<FieldError>,
}

impl Checker<'_> {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    fn layer(&mut self, path: &str, index: usize, fields: &Map<String, Value>) {
        if let Some(name) = fields.get("name") {
            if !name.is_string() {
                self.push(format!("{}.name", path), "must be a string");
            }
        }

        let kind = match fields.get("type") {
            Some(Value::String(kind)) if LayerSpec::KINDS.contains(&kind.as_str()) => kind.as_str(),
            Some(_) => {
                self.push(
                    format!("{}.type", path),
                    format!("must be one of: {}", LayerSpec::KINDS.join(", ")),
                );
                return;
            }
            None => {
                self.push(format!("{}.type", path), "is required");
                return;
            }
        };

        let has_activation = matches!(kind, "dense" | "conv2d");
        if has_activation {
            self.activation(path, fields.get("activation"));
        } else if fields.contains_key("activation") {
            self.push(
                format!("{}.activation", path),
                format!("is not allowed on {} layers", kind),
            );
        }

        match kind {
            "dense" => self.dimension(&format!("{}.units", path), fields.get("units")),
            "conv2d" => {
                self.dimension(&format!("{}.filters", path), fields.get("filters"));
                self.pair(&format!("{}.kernelSize", path), fields.get("kernelSize"));
            }
            "maxPooling2d" => self.pair(&format!("{}.poolSize", path), fields.get("poolSize")),
            "dropout" => self.rate(&format!("{}.rate", path), fields.get("rate")),
            _ => {}
        }

        if let Some(shape) = fields.get("inputShape") {
            let field = format!("{}.inputShape", path);
            if !has_activation {
                self.push(field, format!("is not allowed on {} layers", kind));
            } else if index > 0 {
                self.push(field, "is only allowed on the first layer");
            } else {
                let expected = (kind == "conv2d").then_some(3);
                self.shape(&field, shape, expected);
            }
        }
    }

    fn activation(&mut self, path: &str, value: Option<&Value>) {
        let field = format!("{}.activation", path);
        match value {
            None => self.push(field, "is required"),
            Some(Value::String(name)) if Activation::parse(name).is_some() => {}
            Some(_) => self.push(field, format!("must be one of: {}", Activation::ALL.join(", "))),
        }
    }

    fn within_limit(&self, value: &Value) -> bool {
        value
            .as_u64()
            .is_some_and(|n| n <= self.limits.max_dimension as u64)
    }

    fn dimension(&mut self, field: &str, value: Option<&Value>) {
        let max = self.limits.max_dimension;
        match value {
            None => self.push(field, "is required"),
            Some(v) if !is_positive_int(v) => self.push(field, "must be a positive integer"),
            Some(v) if !self.within_limit(v) => self.push(field, format!("must be at most {}", max)),
            Some(_) => {}
        }
    }

    fn pair(&mut self, field: &str, value: Option<&Value>) {
        let max = self.limits.max_dimension;
        match value {
            None => self.push(field, "is required"),
            Some(Value::Array(items)) if items.len() == 2 && items.iter().all(is_positive_int) => {
                if !items.iter().all(|v| self.within_limit(v)) {
                    self.push(field, format!("values must be at most {}", max));
                }
            }
            Some(_) => self.push(field, "must be exactly two positive integers"),
        }
    }

    fn rate(&mut self, field: &str, value: Option<&Value>) {
        match value.map(Value::as_f64) {
            None => self.push(field, "is required"),
            Some(Some(rate)) if (0.0..=1.0).contains(&rate) => {}
            Some(_) => self.push(field, "must be a number between 0 and 1"),
        }
    }

    fn shape(&mut self, field: &str, value: &Value, expected_len: Option<usize>) {
        let LayerLimits {
            max_dimension,
            max_input_volume,
            ..
        } = self.limits;
        let items = match value {
            Value::Array(items)
                if !items.is_empty()
                    && expected_len.is_none_or(|len| items.len() == len)
                    && items.iter().all(is_positive_int) =>
            {
                items
            }
            _ => {
                let message = match expected_len {
                    Some(len) => format!("must be exactly {} positive integers", len),
                    None => "must be a non-empty array of positive integers".to_string(),
                };
                self.push(field, message);
                return;
            }
        };

        if !items.iter().all(|v| self.within_limit(v)) {
            self.push(field, format!("values must be at most {}", max_dimension));
            return;
        }

        let volume = items
            .iter()
            .filter_map(Value::as_u64)
            .try_fold(1u64, u64::checked_mul);
        if volume.is_none_or(|v| v > max_input_volume as u64) {
            self.push(
                field,
                format!("must describe at most {} values per sample", max_input_volume),
            );
        }
    }
}

fn is_positive_int(value: &Value) -> bool {
    value.as_u64().is_some_and(|n| n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(result: Result<Vec<LayerSpec>, LayerValidationErrors>) -> Vec<String> {
        result
            .unwrap_err()
            .into_inner()
            .into_iter()
            .map(|e| e.field)
            .collect()
    }

    #[test]
    fn test_accepts_dense_stack() {
        let layers = validate_layers(&json!([
            {"type": "dense", "units": 64, "activation": "relu", "inputShape": [10]},
            {"type": "dense", "units": 3, "activation": "softmax"}
        ]))
        .unwrap();

        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].input_shape(), Some(vec![10]));
    }

    #[test]
    fn test_accepts_convolutional_stack() {
        let layers = validate_layers(&json!([
            {"type": "conv2d", "filters": 4, "kernelSize": [3, 3], "activation": "relu", "inputShape": [8, 8, 1]},
            {"type": "maxPooling2d", "poolSize": [2, 2]},
            {"type": "dropout", "rate": 0.25, "name": "drop"},
            {"type": "flatten"},
            {"type": "dense", "units": 2, "activation": "softmax"}
        ]))
        .unwrap();

        assert_eq!(layers.len(), 5);
        assert_eq!(layers[2].name(), Some("drop"));
    }

    #[test]
    fn test_rejects_non_array_and_empty() {
        assert_eq!(fields(validate_layers(&json!({"type": "dense"}))), vec!["layers"]);
        assert_eq!(fields(validate_layers(&json!([]))), vec!["layers"]);
    }

    #[test]
    fn test_missing_units_is_reported() {
        let result = validate_layers(&json!([{"type": "dense", "activation": "relu"}]));
        assert_eq!(fields(result), vec!["layers[0].units"]);
    }

    #[test]
    fn test_collects_every_error() {
        let result = validate_layers(&json!([
            {"type": "dense", "units": 0, "activation": "gelu"},
            {"type": "conv2d", "filters": 2.5, "kernelSize": [3], "activation": "relu"},
            {"type": "pool"},
            {"type": "dropout", "rate": 1.5},
            "flatten"
        ]));

        assert_eq!(
            fields(result),
            vec![
                "layers[0].activation",
                "layers[0].units",
                "layers[1].filters",
                "layers[1].kernelSize",
                "layers[2].type",
                "layers[3].rate",
                "layers[4]",
            ]
        );
    }

    #[test]
    fn test_dropout_bounds_are_inclusive() {
        assert!(validate_layers(&json!([{"type": "dropout", "rate": 0}])).is_ok());
        assert!(validate_layers(&json!([{"type": "dropout", "rate": 1}])).is_ok());
        assert!(validate_layers(&json!([{"type": "dropout", "rate": -0.1}])).is_err());
    }

    #[test]
    fn test_input_shape_only_on_first_layer() {
        let result = validate_layers(&json!([
            {"type": "dense", "units": 4, "activation": "relu"},
            {"type": "dense", "units": 2, "activation": "softmax", "inputShape": [4]}
        ]));
        assert_eq!(fields(result), vec!["layers[1].inputShape"]);
    }

    #[test]
    fn test_conv_input_shape_needs_three_dims() {
        let result = validate_layers(&json!([
            {"type": "conv2d", "filters": 2, "kernelSize": [2, 2], "activation": "relu", "inputShape": [8, 8]}
        ]));
        assert_eq!(fields(result), vec!["layers[0].inputShape"]);
    }

    #[test]
    fn test_activation_rejected_on_other_kinds() {
        let result = validate_layers(&json!([{"type": "flatten", "activation": "relu"}]));
        assert_eq!(fields(result), vec!["layers[0].activation"]);
    }

    #[test]
    fn test_converts_into_domain_error() {
        let errors = validate_layers(&json!([{"type": "dense"}])).unwrap_err();
        let domain: DomainError = errors.into();
        assert_eq!(domain.field_errors().len(), 2);
        assert!(matches!(domain, DomainError::Validation { .. }));
    }

    #[test]
    fn test_huge_input_shape_is_rejected() {
        let result = validate_layers(&json!([
            {"type": "conv2d", "filters": 2, "kernelSize": [2, 2], "activation": "relu",
             "inputShape": [4294967296u64, 4294967296u64, 4]},
            {"type": "flatten"},
            {"type": "dense", "units": 2, "activation": "softmax"}
        ]));
        assert_eq!(fields(result), vec!["layers[0].inputShape"]);
    }

    #[test]
    fn test_input_volume_is_capped() {
        let limits = LayerLimits {
            max_dimension: 100,
            max_input_volume: 1_000,
            max_parameters: 1_000_000,
        };
        let too_wide = validate_layers_within(
            &json!([{"type": "dense", "units": 2, "activation": "softmax", "inputShape": [1000]}]),
            &limits,
        );
        assert!(too_wide.is_err());

        let result = validate_layers_within(
            &json!([{"type": "conv2d", "filters": 2, "kernelSize": [2, 2], "activation": "relu",
                     "inputShape": [20, 20, 3]}]),
            &limits,
        )
        .unwrap_err()
        .into_inner();
        assert_eq!(result[0].field, "layers[0].inputShape");
        assert!(result[0].message.contains("1000 values"));
    }

    #[test]
    fn test_units_and_windows_are_capped() {
        let result = validate_layers(&json!([
            {"type": "conv2d", "filters": 5000, "kernelSize": [3, 9000], "activation": "relu", "inputShape": [8, 8, 1]},
            {"type": "maxPooling2d", "poolSize": [10000, 2]},
            {"type": "flatten"},
            {"type": "dense", "units": 100000, "activation": "softmax"}
        ]));
        assert_eq!(
            fields(result),
            vec![
                "layers[0].filters",
                "layers[0].kernelSize",
                "layers[1].poolSize",
                "layers[3].units",
            ]
        );
    }
}
