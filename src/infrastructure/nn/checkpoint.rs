//! Best-weights checkpoints on disk
//!
//! Layout per model: `<dir>/<model_id>/best.mpk.gz` (full precision weights,
//! gzipped MessagePack) and `<dir>/<model_id>/plan.json` (op list needed to
//! rebuild the network before loading weights into it).

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder};
use burn::tensor::backend::Backend;
use tracing::{debug, info};

use super::graph::NetworkPlan;
use super::network::Network;
use crate::domain::DomainError;
use crate::domain::model::ModelId;

const WEIGHTS_FILE: &str = "best";
const PLAN_FILE: &str = "plan.json";

type CheckpointRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn model_dir(&self, id: &ModelId) -> PathBuf {
        self.dir.join(id.as_str())
    }

    pub fn exists(&self, id: &ModelId) -> bool {
        self.model_dir(id).join(PLAN_FILE).is_file()
    }

    /// Overwrites the checkpoint of `id`
    pub fn save<B: Backend>(
        &self,
        id: &ModelId,
        network: &Network<B>,
        plan: &NetworkPlan,
    ) -> Result<(), DomainError> {
        let dir = self.model_dir(id);
        fs::create_dir_all(&dir).map_err(|e| {
            DomainError::storage(format!("Failed to create '{}': {}", dir.display(), e))
        })?;

        let recorder = CheckpointRecorder::new();
        Recorder::<B>::record(&recorder, network.clone().into_record(), dir.join(WEIGHTS_FILE))
            .map_err(|e| DomainError::storage(format!("Failed to write checkpoint: {}", e)))?;

        let plan_json = serde_json::to_vec_pretty(plan)
            .map_err(|e| DomainError::internal(format!("Failed to serialize plan: {}", e)))?;
        fs::write(dir.join(PLAN_FILE), plan_json)
            .map_err(|e| DomainError::storage(format!("Failed to write plan: {}", e)))?;

        debug!(model_id = %id, "Checkpoint written");
        Ok(())
    }

    /// Rebuilds the network from its plan and loads the saved weights
    pub fn load<B: Backend>(
        &self,
        id: &ModelId,
        device: &B::Device,
    ) -> Result<Option<(Network<B>, NetworkPlan)>, DomainError> {
        if !self.exists(id) {
            return Ok(None);
        }
        let dir = self.model_dir(id);

        let raw = fs::read(dir.join(PLAN_FILE))
            .map_err(|e| DomainError::storage(format!("Failed to read plan: {}", e)))?;
        let plan: NetworkPlan = serde_json::from_slice(&raw)
            .map_err(|e| DomainError::storage(format!("Corrupt plan for '{}': {}", id, e)))?;

        let recorder = CheckpointRecorder::new();
        let record = Recorder::<B>::load(&recorder, dir.join(WEIGHTS_FILE), device)
            .map_err(|e| DomainError::storage(format!("Failed to read checkpoint: {}", e)))?;
        let network = Network::<B>::init(&plan, device).load_record(record);

        info!(model_id = %id, "Restored network from checkpoint");
        Ok(Some((network, plan)))
    }

    pub fn remove(&self, id: &ModelId) -> Result<(), DomainError> {
        let dir = self.model_dir(id);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| {
                DomainError::storage(format!("Failed to remove '{}': {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}
