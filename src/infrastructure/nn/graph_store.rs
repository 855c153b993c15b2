//! Trained networks kept in memory, backed by checkpoints

use std::collections::HashMap;
use std::sync::Mutex;

use super::backend::{InferenceBackend, device};
use super::checkpoint::CheckpointStore;
use super::graph::NetworkPlan;
use super::network::Network;
use crate::domain::DomainError;
use crate::domain::model::ModelId;

/// A compiled inference network bound to its plan
#[derive(Debug, Clone)]
pub struct TrainedGraph {
    pub network: Network<InferenceBackend>,
    pub plan: NetworkPlan,
}

/// `ModelId -> TrainedGraph`, restored lazily from the checkpoint store
#[derive(Debug)]
pub struct GraphStore {
    graphs: Mutex<HashMap<ModelId, TrainedGraph>>,
    checkpoints: CheckpointStore,
}

impl GraphStore {
    pub fn new(checkpoints: CheckpointStore) -> Self {
        Self {
            graphs: Mutex::new(HashMap::new()),
            checkpoints,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ModelId, TrainedGraph>>, DomainError> {
        self.graphs
            .lock()
            .map_err(|e| DomainError::internal(format!("Graph store lock poisoned: {}", e)))
    }

    pub fn insert(&self, id: ModelId, graph: TrainedGraph) -> Result<(), DomainError> {
        self.lock()?.insert(id, graph);
        Ok(())
    }

    pub fn contains(&self, id: &ModelId) -> Result<bool, DomainError> {
        Ok(self.lock()?.contains_key(id))
    }

    /// In-memory graph, or the one restored from its checkpoint
    pub fn get_or_restore(&self, id: &ModelId) -> Result<Option<TrainedGraph>, DomainError> {
        if let Some(graph) = self.lock()?.get(id) {
            return Ok(Some(graph.clone()));
        }

        let Some((network, plan)) = self.checkpoints.load::<InferenceBackend>(id, &device())? else {
            return Ok(None);
        };
        let graph = TrainedGraph { network, plan };
        self.lock()?.insert(id.clone(), graph.clone());
        Ok(Some(graph))
    }

    /// Drops the in-memory graph and its checkpoint
    pub fn remove(&self, id: &ModelId) -> Result<(), DomainError> {
        self.lock()?.remove(id);
        self.checkpoints.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::layer::validate_layers;
    use crate::infrastructure::nn::graph::ModelGraph;
    use serde_json::json;

    fn trained() -> TrainedGraph {
        let plan = ModelGraph::build(
            &validate_layers(&json!([
                {"type": "dense", "units": 2, "activation": "softmax", "inputShape": [3]}
            ]))
            .unwrap(),
        )
        .plan()
        .unwrap();
        TrainedGraph {
            network: Network::init(&plan, &device()),
            plan,
        }
    }

    fn store() -> GraphStore {
        GraphStore::new(CheckpointStore::new(
            std::env::temp_dir().join(format!("graphs-{}", uuid::Uuid::new_v4())),
        ))
    }

    #[test]
    fn test_insert_and_remove() {
        let store = store();
        let id = ModelId::generate();
        store.insert(id.clone(), trained()).unwrap();

        assert!(store.contains(&id).unwrap());
        assert!(store.get_or_restore(&id).unwrap().is_some());

        store.remove(&id).unwrap();
        assert!(store.get_or_restore(&id).unwrap().is_none());
    }

    #[test]
    fn test_restores_from_checkpoint() {
        let store = store();
        let id = ModelId::generate();
        let graph = trained();
        store.checkpoints().save(&id, &graph.network, &graph.plan).unwrap();

        assert!(!store.contains(&id).unwrap());
        let restored = store.get_or_restore(&id).unwrap().unwrap();
        assert_eq!(restored.plan, graph.plan);
        assert!(store.contains(&id).unwrap());

        let _ = std::fs::remove_dir_all(store.checkpoints().dir());
    }
}
