//! Random data shaped like the network, for trying out a definition
//! before any images exist

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::DomainError;
use crate::domain::training::{ClassLabel, Dataset, DatasetProvider, InputShape};

#[derive(Debug, Clone)]
pub struct PlaceholderDatasetProvider {
    samples: usize,
    seed: Option<u64>,
}

impl PlaceholderDatasetProvider {
    pub fn new(samples: usize) -> Self {
        Self {
            samples,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[async_trait]
impl DatasetProvider for PlaceholderDatasetProvider {
    /// Ids are taken at face value; nothing is looked up
    async fn resolve(&self, training_set_ids: &[String]) -> Result<Vec<ClassLabel>, DomainError> {
        Ok(training_set_ids
            .iter()
            .map(|id| ClassLabel {
                training_set_id: id.clone(),
                name: id.clone(),
            })
            .collect())
    }

    async fn load(
        &self,
        _training_set_ids: &[String],
        input: InputShape,
        num_classes: usize,
    ) -> Result<Dataset, DomainError> {
        if num_classes == 0 {
            return Err(DomainError::training("network has no output units"));
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let samples = self.samples.max(1);
        let values = input
            .checked_volume()
            .and_then(|volume| volume.checked_mul(samples))
            .ok_or_else(|| DomainError::training(format!("placeholder data for input {} is too large", input)))?;
        let inputs = (0..values)
            .map(|_| rng.gen_range(-1.0f32..1.0))
            .collect();
        let labels = (0..samples).map(|_| rng.gen_range(0..num_classes)).collect();

        Ok(Dataset::new(inputs, input.sample_dims(), labels, num_classes))
    }
}
