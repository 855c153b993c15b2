//! In-memory datasets and the provider seam used by training

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Per-sample input the network expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InputShape {
    /// Feature vector of the given width
    Flat { width: usize },
    /// Image laid out as `[height, width, channels]`
    Spatial {
        height: usize,
        width: usize,
        channels: usize,
    },
}

impl InputShape {
    /// Number of scalars in one sample, `None` when it does not fit in `usize`
    pub fn checked_volume(&self) -> Option<usize> {
        match *self {
            Self::Flat { width } => Some(width),
            Self::Spatial {
                height,
                width,
                channels,
            } => height.checked_mul(width)?.checked_mul(channels),
        }
    }

    /// Number of scalars in one sample, saturating at `usize::MAX`
    pub fn volume(&self) -> usize {
        self.checked_volume().unwrap_or(usize::MAX)
    }

    /// Tensor dims of one sample: `[width]` or `[channels, height, width]`
    pub fn sample_dims(&self) -> Vec<usize> {
        match *self {
            Self::Flat { width } => vec![width],
            Self::Spatial {
                height,
                width,
                channels,
            } => vec![channels, height, width],
        }
    }
}

impl fmt::Display for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat { width } => write!(f, "[{}]", width),
            Self::Spatial {
                height,
                width,
                channels,
            } => write!(f, "[{}, {}, {}]", height, width, channels),
        }
    }
}

/// Name attached to an output class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabel {
    pub training_set_id: String,
    pub name: String,
}

/// Samples and one-hot-able labels ready for the fit loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    /// Row-major samples, each `sample_dims` long in product
    pub inputs: Vec<f32>,
    pub sample_dims: Vec<usize>,
    pub labels: Vec<usize>,
    pub num_classes: usize,
}

impl Dataset {
    pub fn new(inputs: Vec<f32>, sample_dims: Vec<usize>, labels: Vec<usize>, num_classes: usize) -> Self {
        Self {
            inputs,
            sample_dims,
            labels,
            num_classes,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn sample_len(&self) -> usize {
        self.sample_dims.iter().product()
    }

    pub fn sample(&self, index: usize) -> &[f32] {
        let len = self.sample_len();
        &self.inputs[index * len..(index + 1) * len]
    }

    /// Copies the listed samples into a new dataset
    pub fn subset(&self, indices: &[usize]) -> Dataset {
        let mut inputs = Vec::with_capacity(indices.len() * self.sample_len());
        let mut labels = Vec::with_capacity(indices.len());
        for &index in indices {
            inputs.extend_from_slice(self.sample(index));
            labels.push(self.labels[index]);
        }
        Dataset::new(inputs, self.sample_dims.clone(), labels, self.num_classes)
    }

    /// Flattened one-hot targets
    pub fn one_hot(&self) -> Vec<f32> {
        let mut targets = vec![0.0; self.len() * self.num_classes];
        for (row, &label) in self.labels.iter().enumerate() {
            if label < self.num_classes {
                targets[row * self.num_classes + label] = 1.0;
            }
        }
        targets
    }
}

/// Source of training data for a run
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatasetProvider: Send + Sync {
    /// Checks the referenced training sets and returns one label per class.
    /// Runs before any model state is touched.
    async fn resolve(&self, training_set_ids: &[String]) -> Result<Vec<ClassLabel>, DomainError>;

    /// Loads samples shaped for `input` with labels in `0..num_classes`
    async fn load(
        &self,
        training_set_ids: &[String],
        input: InputShape,
        num_classes: usize,
    ) -> Result<Dataset, DomainError>;
}
