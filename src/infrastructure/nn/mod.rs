//! Network construction, training and persistence on burn

mod backend;
mod checkpoint;
mod graph;
mod graph_store;
mod network;
mod trainer;

pub use backend::{InferenceBackend, TrainingBackend, device};
pub use checkpoint::CheckpointStore;
pub use graph::{GraphError, ModelGraph, NetworkPlan, PlanStep};
pub use graph_store::{GraphStore, TrainedGraph};
pub use network::Network;
pub use trainer::{CheckpointSelector, FitConfig, FitOutcome, Selection, Trainer, TrainingError};
