//! Model definitions and their training lifecycle

mod entity;
mod status;
mod validation;

pub use entity::{EpochMetrics, FinalMetrics, ModelId, ModelRecord};
pub use status::{ModelStatus, ModelStatusError};
pub use validation::{CreateModelRequest, validate_create_model, validate_create_model_within};
