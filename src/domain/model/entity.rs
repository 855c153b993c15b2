//! Model record entity

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{ModelStatus, ModelStatusError};
use crate::domain::layer::LayerSpec;
use crate::domain::storage::{StorageEntity, StorageKey};

/// Server generated model identifier (UUID v4)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wraps a caller supplied id; existence is checked by the registry
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StorageKey for ModelId {
    fn as_str(&self) -> &str {
        &self.0
    }
}

/// Metrics recorded at the end of one epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochMetrics {
    pub epoch: usize,
    pub accuracy: f64,
    pub loss: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_loss: Option<f64>,
}

impl EpochMetrics {
    pub fn log_line(&self, total_epochs: usize) -> String {
        let mut line = format!(
            "Epoch {}/{}: loss={:.4}, accuracy={:.4}",
            self.epoch, total_epochs, self.loss, self.accuracy
        );
        if let (Some(val_loss), Some(val_accuracy)) = (self.val_loss, self.val_accuracy) {
            line.push_str(&format!(
                ", val_loss={:.4}, val_accuracy={:.4}",
                val_loss, val_accuracy
            ));
        }
        line
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalMetrics {
    pub accuracy: f64,
    pub loss: f64,
}

/// A declared network and the state of its last training run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    id: ModelId,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    layers: Vec<LayerSpec>,
    status: ModelStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    training_logs: Vec<String>,
    metrics: Vec<EpochMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    final_metrics: Option<FinalMetrics>,
    training_set_ids: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StorageEntity for ModelRecord {
    type Key = ModelId;
    const COLLECTION: &'static str = "models";

    fn key(&self) -> &Self::Key {
        &self.id
    }

    fn sort_key(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

impl ModelRecord {
    /// New PENDING record
    pub fn new(name: impl Into<String>, description: Option<String>, layers: Vec<LayerSpec>) -> Self {
        let now = Utc::now();
        Self {
            id: ModelId::generate(),
            name: name.into(),
            description,
            layers,
            status: ModelStatus::Pending,
            error: None,
            training_logs: Vec::new(),
            metrics: Vec::new(),
            final_metrics: None,
            training_set_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &ModelId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn layers(&self) -> &[LayerSpec] {
        &self.layers
    }

    pub fn status(&self) -> ModelStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn training_logs(&self) -> &[String] {
        &self.training_logs
    }

    pub fn metrics(&self) -> &[EpochMetrics] {
        &self.metrics
    }

    pub fn final_metrics(&self) -> Option<FinalMetrics> {
        self.final_metrics
    }

    pub fn training_set_ids(&self) -> &[String] {
        &self.training_set_ids
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn move_to(&mut self, target: ModelStatus) -> Result<(), ModelStatusError> {
        self.status = self.status.transition(target)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// PENDING -> TRAINING; clears the previous run and writes the setup line
    pub fn start_training(
        &mut self,
        training_set_ids: Vec<String>,
        setup_line: impl Into<String>,
    ) -> Result<(), ModelStatusError> {
        self.move_to(ModelStatus::Training)?;
        self.training_set_ids = training_set_ids;
        self.error = None;
        self.metrics.clear();
        self.final_metrics = None;
        self.training_logs = vec![setup_line.into()];
        Ok(())
    }

    pub fn record_epoch(&mut self, metrics: EpochMetrics, line: impl Into<String>) {
        self.metrics.push(metrics);
        self.training_logs.push(line.into());
        self.updated_at = Utc::now();
    }

    /// TRAINING -> TRAINED
    pub fn complete_training(
        &mut self,
        final_metrics: FinalMetrics,
        line: impl Into<String>,
    ) -> Result<(), ModelStatusError> {
        self.move_to(ModelStatus::Trained)?;
        self.final_metrics = Some(final_metrics);
        self.training_logs.push(line.into());
        Ok(())
    }

    /// TRAINING -> FAILED
    pub fn fail_training(&mut self, error: impl Into<String>) -> Result<(), ModelStatusError> {
        let error = error.into();
        self.move_to(ModelStatus::Failed)?;
        self.training_logs.push(format!("Training failed: {}", error));
        self.error = Some(error);
        Ok(())
    }

    /// TRAINED|FAILED -> PENDING, dropping everything the last run produced
    pub fn reset(&mut self) -> Result<(), ModelStatusError> {
        self.move_to(ModelStatus::Pending)?;
        self.error = None;
        self.training_logs.clear();
        self.metrics.clear();
        self.final_metrics = None;
        Ok(())
    }
}
