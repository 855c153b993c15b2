//! Model lifecycle state machine

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::DomainError;

/// Training status of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelStatus {
    /// Defined, never trained or reset
    #[default]
    Pending,

    /// A training run holds the model
    Training,

    /// Last run finished and produced weights
    Trained,

    /// Last run ended with an error or was cancelled
    Failed,
}

impl ModelStatus {
    pub fn can_transition_to(&self, target: ModelStatus) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Training)
                | (Self::Training, Self::Trained)
                | (Self::Training, Self::Failed)
                | (Self::Failed, Self::Pending)
                | (Self::Trained, Self::Pending)
        )
    }

    /// Validates a transition and returns the target status
    pub fn transition(self, target: ModelStatus) -> Result<ModelStatus, ModelStatusError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(ModelStatusError::InvalidTransition { from: self, to: target })
        }
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Training => write!(f, "TRAINING"),
            Self::Trained => write!(f, "TRAINED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelStatusError {
    #[error("Cannot move model from {from} to {to}")]
    InvalidTransition { from: ModelStatus, to: ModelStatus },
}

impl From<ModelStatusError> for DomainError {
    fn from(error: ModelStatusError) -> Self {
        let ModelStatusError::InvalidTransition { from, to } = error;
        let hint = match (from, to) {
            (ModelStatus::Training, _) => "model is already training",
            (ModelStatus::Trained | ModelStatus::Failed, ModelStatus::Training) => {
                "reset the model before training it again"
            }
            _ => "invalid status transition",
        };
        DomainError::conflict(format!("{}: {}", error, hint))
    }
}
