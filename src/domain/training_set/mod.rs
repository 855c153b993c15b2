//! User-owned image collections used as labeled training data

mod entity;

pub use entity::{CreateTrainingSetRequest, TrainingImage, TrainingSet, TrainingSetId};
