//! Domain layer: entities, validation rules and the seams infrastructure implements

pub mod error;
pub mod layer;
pub mod model;
pub mod storage;
pub mod training;
pub mod training_set;

pub use error::{DomainError, FieldError};
