//! Declarative layer definitions and their validation

mod entity;
mod validation;

pub use entity::{
    Activation, Conv2dLayer, DenseLayer, DropoutLayer, FlattenLayer, LayerSpec, MaxPooling2dLayer,
};
pub use validation::{LayerLimits, LayerValidationErrors, validate_layers, validate_layers_within};
