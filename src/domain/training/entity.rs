//! Training request and result types

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::model::{EpochMetrics, FinalMetrics, ModelId};

/// Body of a train call
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TrainRequest {
    #[validate(length(min = 1, message = "must contain at least one training set id"))]
    pub training_set_ids: Vec<String>,

    #[validate(range(min = 1, max = 10000, message = "must be between 1 and 10000"))]
    pub epochs: usize,

    #[validate(range(min = 1, max = 4096, message = "must be between 1 and 4096"))]
    pub batch_size: usize,

    /// Return immediately and train in the background
    #[serde(default)]
    pub background: bool,
}

impl TrainRequest {
    pub fn new(training_set_ids: Vec<String>, epochs: usize, batch_size: usize) -> Self {
        Self {
            training_set_ids,
            epochs,
            batch_size,
            background: false,
        }
    }
}

/// Progress emitted by the fit loop after every epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochEvent {
    pub metrics: EpochMetrics,
    pub total_epochs: usize,
    /// The monitored loss improved and a checkpoint was written
    pub improved: bool,
}

impl EpochEvent {
    pub fn log_line(&self) -> String {
        let line = self.metrics.log_line(self.total_epochs);
        if self.improved {
            format!("{} (checkpoint saved)", line)
        } else {
            line
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
    /// Accepted and running in the background
    Training,
}

/// Outcome of a train call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingResult {
    pub model_id: ModelId,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<FinalMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epochs_run: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_early: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrainingResult {
    pub fn completed(model_id: ModelId, metrics: FinalMetrics, epochs_run: usize, stopped_early: bool) -> Self {
        Self {
            model_id,
            status: RunStatus::Completed,
            metrics: Some(metrics),
            epochs_run: Some(epochs_run),
            stopped_early: Some(stopped_early),
            error: None,
        }
    }

    /// Failed runs still report zeroed metrics so callers can rely on the shape
    pub fn failed(model_id: ModelId, error: impl Into<String>, epochs_run: usize) -> Self {
        Self {
            model_id,
            status: RunStatus::Failed,
            metrics: Some(FinalMetrics::default()),
            epochs_run: Some(epochs_run),
            stopped_early: Some(false),
            error: Some(error.into()),
        }
    }

    pub fn accepted(model_id: ModelId) -> Self {
        Self {
            model_id,
            status: RunStatus::Training,
            metrics: None,
            epochs_run: None,
            stopped_early: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainError;
    use serde_json::json;

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: TrainRequest = serde_json::from_value(json!({
            "trainingSetIds": ["x"], "epochs": 5, "batchSize": 8
        }))
        .unwrap();

        assert_eq!(request.training_set_ids, vec!["x"]);
        assert!(!request.background);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_validation_reports_camel_case_fields() {
        let request = TrainRequest::new(vec![], 0, 5000);
        let error: DomainError = request.validate().unwrap_err().into();

        let fields: Vec<&str> = error.field_errors().iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["batchSize", "epochs", "trainingSetIds"]);
    }

    #[test]
    fn test_failed_result_shape() {
        let value = serde_json::to_value(TrainingResult::failed(ModelId::new("m"), "boom", 0)).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["metrics"]["accuracy"], 0.0);
        assert_eq!(value["error"], "boom");
    }

    #[test]
    fn test_accepted_result_is_minimal() {
        let value = serde_json::to_value(TrainingResult::accepted(ModelId::new("m"))).unwrap();
        assert_eq!(value, json!({"modelId": "m", "status": "training"}));
    }
}
