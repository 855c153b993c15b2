//! Training requests, results and the dataset seam

mod dataset;
mod entity;

pub use dataset::{ClassLabel, Dataset, DatasetProvider, InputShape};
#[cfg(test)]
pub use dataset::MockDatasetProvider;
pub use entity::{EpochEvent, RunStatus, TrainRequest, TrainingResult};
