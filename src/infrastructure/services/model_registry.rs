//! Model registry: declared networks and their lifecycle

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::domain::layer::LayerLimits;
use crate::domain::model::{ModelId, ModelRecord, ModelStatus, validate_create_model_within};
use crate::domain::{DomainError, FieldError};
use crate::domain::storage::Storage;
use crate::infrastructure::nn::{GraphError, GraphStore, ModelGraph};

const INTERRUPTED: &str = "interrupted by restart";

/// Owns model records, their trained graphs and the per-model run guards
#[derive(Debug)]
pub struct ModelRegistry {
    storage: Arc<dyn Storage<ModelRecord>>,
    graphs: Arc<GraphStore>,
    limits: LayerLimits,
    guards: Mutex<HashMap<ModelId, Arc<AsyncMutex<()>>>>,
}

impl ModelRegistry {
    /// Registry with the default limits
    pub fn new(storage: Arc<dyn Storage<ModelRecord>>, graphs: Arc<GraphStore>) -> Self {
        Self {
            storage,
            graphs,
            limits: LayerLimits::default(),
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the default caps on model definitions
    pub fn with_limits(mut self, limits: LayerLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Trained graphs and checkpoints
    pub fn graphs(&self) -> &Arc<GraphStore> {
        &self.graphs
    }

    /// Caps applied to definitions and training runs
    pub fn limits(&self) -> &LayerLimits {
        &self.limits
    }

    fn guard(&self, id: &ModelId) -> Result<Arc<AsyncMutex<()>>, DomainError> {
        let mut guards = self
            .guards
            .lock()
            .map_err(|e| DomainError::internal(format!("Guard table lock poisoned: {}", e)))?;
        Ok(guards.entry(id.clone()).or_default().clone())
    }

    fn forget_guard(&self, id: &ModelId) {
        if let Ok(mut guards) = self.guards.lock() {
            guards.remove(id);
        }
    }

    /// Takes the single-flight guard of a model without waiting
    pub fn try_acquire(&self, id: &ModelId) -> Result<OwnedMutexGuard<()>, DomainError> {
        self.guard(id)?
            .try_lock_owned()
            .map_err(|_| DomainError::conflict(format!("Model '{}' is already training", id)))
    }

    /// Validates a raw definition and stores it as PENDING
    #[instrument(skip(self, body))]
    pub async fn create(&self, body: &Value) -> Result<ModelRecord, DomainError> {
        let request = validate_create_model_within(body, &self.limits)?;
        let graph = ModelGraph::build(&request.layers);
        debug!(layers = graph.len(), input_rank = ?graph.input_rank(), "Model graph built");

        // shape errors surface when training; size errors are rejected up front
        let sized = match graph.plan() {
            Ok(plan) => plan.check_limits(&self.limits),
            Err(e @ GraphError::TooLarge { .. }) => Err(e),
            Err(_) => Ok(()),
        };
        if let Err(e) = sized {
            return Err(DomainError::invalid_fields(
                "Invalid model definition",
                vec![FieldError::new("layers", e.to_string())],
            ));
        }

        let record = ModelRecord::new(request.name, request.description, request.layers);
        let record = self.storage.create(record).await?;
        info!(model_id = %record.id(), name = %record.name(), "Model created");
        Ok(record)
    }

    /// Looks up one model
    pub async fn get(&self, id: &ModelId) -> Result<ModelRecord, DomainError> {
        self.storage
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Model '{}' not found", id)))
    }

    /// All models, oldest first
    pub async fn list(&self) -> Result<Vec<ModelRecord>, DomainError> {
        self.storage.list().await
    }

    /// Writes back a record changed by a training run
    pub(crate) async fn save(&self, record: ModelRecord) -> Result<ModelRecord, DomainError> {
        self.storage.update(record).await
    }

    /// TRAINED|FAILED -> PENDING; drops the trained graph and checkpoint
    #[instrument(skip(self))]
    pub async fn reset(&self, id: &ModelId) -> Result<ModelRecord, DomainError> {
        let mut record = self.get(id).await?;
        let _guard = self.try_acquire(id)?;

        record.reset()?;
        self.graphs.remove(id)?;
        let record = self.storage.update(record).await?;
        info!(model_id = %id, "Model reset");
        Ok(record)
    }

    /// Removes the record, its trained graph and checkpoint
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &ModelId) -> Result<(), DomainError> {
        self.get(id).await?;
        let guard = self.try_acquire(id)?;

        self.graphs.remove(id)?;
        self.storage.delete(id).await?;
        drop(guard);
        self.forget_guard(id);
        info!(model_id = %id, "Model deleted");
        Ok(())
    }

    /// Marks runs left in TRAINING by a previous process as FAILED
    pub async fn recover_interrupted(&self) -> Result<usize, DomainError> {
        let mut recovered = 0;
        for mut record in self.storage.list().await? {
            if record.status() != ModelStatus::Training {
                continue;
            }
            record.fail_training(INTERRUPTED)?;
            warn!(model_id = %record.id(), "Marking interrupted training run as failed");
            self.storage.update(record).await?;
            recovered += 1;
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::FinalMetrics;
    use crate::domain::storage::mock::MockStorage;
    use crate::infrastructure::nn::CheckpointStore;
    use crate::infrastructure::storage::InMemoryStorage;
    use serde_json::json;

    fn graphs() -> Arc<GraphStore> {
        Arc::new(GraphStore::new(CheckpointStore::new(
            std::env::temp_dir().join(format!("registry-{}", uuid::Uuid::new_v4())),
        )))
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::new(Arc::new(InMemoryStorage::<ModelRecord>::new()), graphs())
    }

    fn body() -> Value {
        json!({
            "name": "classifier",
            "layers": [
                {"type": "dense", "units": 64, "activation": "relu", "inputShape": [10]},
                {"type": "dense", "units": 3, "activation": "softmax"}
            ]
        })
    }

    async fn trained(registry: &ModelRegistry) -> ModelRecord {
        let mut record = registry.create(&body()).await.unwrap();
        record.start_training(vec!["a".into()], "setup").unwrap();
        record
            .complete_training(FinalMetrics { accuracy: 0.5, loss: 1.0 }, "done")
            .unwrap();
        registry.save(record).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_stores_pending_record() {
        let registry = registry();
        let record = registry.create(&body()).await.unwrap();

        assert_eq!(record.status(), ModelStatus::Pending);
        assert_eq!(record.layers().len(), 2);
        assert_eq!(registry.get(record.id()).await.unwrap().name(), "classifier");
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_definition_without_storing() {
        let registry = registry();
        let err = registry
            .create(&json!({"name": "", "layers": [{"type": "dense", "units": 0}]}))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Validation { .. }));
        assert!(err.field_errors().len() >= 3);
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_oversized_network() {
        let registry = registry();
        let err = registry
            .create(&json!({
                "name": "wide",
                "layers": [
                    {"type": "dense", "units": 4096, "activation": "relu", "inputShape": [4096]},
                    {"type": "dense", "units": 2, "activation": "softmax"}
                ]
            }))
            .await
            .unwrap_err();

        assert_eq!(err.field_errors()[0].field, "layers");
        assert!(err.field_errors()[0].message.contains("parameter count"));
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_configured_limits_apply() {
        let registry = registry().with_limits(LayerLimits {
            max_dimension: 8,
            ..LayerLimits::default()
        });
        let err = registry.create(&body()).await.unwrap_err();
        assert_eq!(err.field_errors()[0].field, "layers[0].units");
    }

    #[tokio::test]
    async fn test_get_unknown_model() {
        let err = registry().get(&ModelId::new("missing")).await.unwrap_err();
        assert_eq!(err.to_string(), "Not found: Model 'missing' not found");
    }

    #[tokio::test]
    async fn test_reset_trained_model() {
        let registry = registry();
        let record = trained(&registry).await;

        let reset = registry.reset(record.id()).await.unwrap();
        assert_eq!(reset.status(), ModelStatus::Pending);
        assert!(reset.training_logs().is_empty());
        assert!(reset.final_metrics().is_none());
    }

    #[tokio::test]
    async fn test_reset_pending_model_is_conflict() {
        let registry = registry();
        let record = registry.create(&body()).await.unwrap();

        let err = registry.reset(record.id()).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_reset_and_delete_rejected_while_guard_held() {
        let registry = registry();
        let record = trained(&registry).await;
        let _running = registry.try_acquire(record.id()).unwrap();

        assert!(matches!(
            registry.reset(record.id()).await.unwrap_err(),
            DomainError::Conflict { .. }
        ));
        assert!(matches!(
            registry.delete(record.id()).await.unwrap_err(),
            DomainError::Conflict { .. }
        ));
        assert!(registry.get(record.id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let registry = registry();
        let record = registry.create(&body()).await.unwrap();

        registry.delete(record.id()).await.unwrap();
        assert!(matches!(
            registry.get(record.id()).await.unwrap_err(),
            DomainError::NotFound { .. }
        ));
        assert!(matches!(
            registry.delete(record.id()).await.unwrap_err(),
            DomainError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_recover_interrupted_runs() {
        let registry = registry();
        let mut record = registry.create(&body()).await.unwrap();
        record.start_training(vec!["a".into()], "setup").unwrap();
        let record = registry.save(record).await.unwrap();
        registry.create(&body()).await.unwrap();

        assert_eq!(registry.recover_interrupted().await.unwrap(), 1);
        let recovered = registry.get(record.id()).await.unwrap();
        assert_eq!(recovered.status(), ModelStatus::Failed);
        assert_eq!(recovered.error(), Some(INTERRUPTED));
    }

    #[tokio::test]
    async fn test_storage_errors_propagate() {
        let registry = ModelRegistry::new(
            Arc::new(MockStorage::<ModelRecord>::new().with_error("disk full")),
            graphs(),
        );
        let err = registry.list().await.unwrap_err();
        assert!(matches!(err, DomainError::Storage { .. }));
    }
}
