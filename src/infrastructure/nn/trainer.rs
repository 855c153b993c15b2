//! Fit loop: mini-batch Adam with validation, checkpointing and early stopping

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor, TensorData};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use super::checkpoint::CheckpointStore;
use super::graph::NetworkPlan;
use super::network::Network;
use crate::domain::model::{EpochMetrics, ModelId};
use crate::domain::training::{Dataset, EpochEvent};

const EPSILON: f64 = 1e-7;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainingError {
    #[error("Training dataset is empty")]
    EmptyDataset,

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Loss became non-finite at epoch {epoch}")]
    NonFiniteLoss { epoch: usize },

    #[error("Checkpoint failed: {0}")]
    Checkpoint(String),

    #[error("Training cancelled after {epochs_run} epochs")]
    Cancelled { epochs_run: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub patience: usize,
    pub validation_split: f64,
    /// Fixed shuffling seed; random when `None`
    pub seed: Option<u64>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            learning_rate: 1e-3,
            patience: 10,
            validation_split: 0.2,
            seed: None,
        }
    }
}

/// Result of a completed fit, with the best weights restored
#[derive(Debug)]
pub struct FitOutcome<B: Backend> {
    pub network: Network<B>,
    pub best: EpochMetrics,
    pub epochs_run: usize,
    pub stopped_early: bool,
}

/// What the selector decided after one epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Improved,
    Waiting,
    Stop,
}

/// Tracks the monitored loss and decides when to snapshot or stop
#[derive(Debug, Clone)]
pub struct CheckpointSelector {
    patience: usize,
    best_loss: f64,
    best_epoch: Option<usize>,
    stale_epochs: usize,
}

impl CheckpointSelector {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best_loss: f64::INFINITY,
            best_epoch: None,
            stale_epochs: 0,
        }
    }

    pub fn observe(&mut self, epoch: usize, monitored_loss: f64) -> Selection {
        if monitored_loss < self.best_loss {
            self.best_loss = monitored_loss;
            self.best_epoch = Some(epoch);
            self.stale_epochs = 0;
            return Selection::Improved;
        }

        self.stale_epochs += 1;
        if self.patience > 0 && self.stale_epochs >= self.patience {
            Selection::Stop
        } else {
            Selection::Waiting
        }
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

/// Runs one training job on the calling thread
pub struct Trainer<'a> {
    config: FitConfig,
    plan: &'a NetworkPlan,
    events: Option<mpsc::UnboundedSender<EpochEvent>>,
    cancel: Option<watch::Receiver<bool>>,
    checkpoint: Option<(&'a CheckpointStore, &'a ModelId)>,
}

impl<'a> Trainer<'a> {
    pub fn new(config: FitConfig, plan: &'a NetworkPlan) -> Self {
        Self {
            config,
            plan,
            events: None,
            cancel: None,
            checkpoint: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<EpochEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_checkpoints(mut self, store: &'a CheckpointStore, id: &'a ModelId) -> Self {
        self.checkpoint = Some((store, id));
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn check_dataset(&self, dataset: &Dataset) -> Result<(), TrainingError> {
        if dataset.is_empty() {
            return Err(TrainingError::EmptyDataset);
        }
        let expected = self.plan.input.volume();
        if dataset.sample_len() != expected || dataset.inputs.len() != dataset.len() * expected {
            return Err(TrainingError::ShapeMismatch(format!(
                "network expects samples of shape {} ({} values) but the dataset provides {:?}",
                self.plan.input,
                expected,
                dataset.sample_dims
            )));
        }
        if dataset.num_classes != self.plan.output_width {
            return Err(TrainingError::ShapeMismatch(format!(
                "network outputs {} classes but the dataset has {}",
                self.plan.output_width, dataset.num_classes
            )));
        }
        Ok(())
    }

    pub fn fit<B: AutodiffBackend>(
        &self,
        dataset: &Dataset,
        device: &B::Device,
    ) -> Result<FitOutcome<B::InnerBackend>, TrainingError> {
        self.check_dataset(dataset)?;

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (train, validation) = split(dataset, self.config.validation_split, &mut rng);
        info!(
            train_samples = train.len(),
            validation_samples = validation.len(),
            epochs = self.config.epochs,
            batch_size = self.config.batch_size,
            "Starting fit"
        );

        let batch_size = self.config.batch_size.max(1);
        let mut model = Network::<B>::init(self.plan, device);
        let mut optim = AdamConfig::new().init();
        let mut selector = CheckpointSelector::new(self.config.patience);
        let mut best: Option<(Network<B::InnerBackend>, EpochMetrics)> = None;
        let mut epochs_run = 0;
        let mut stopped_early = false;
        let mut order: Vec<usize> = (0..train.len()).collect();

        for epoch in 1..=self.config.epochs {
            if self.is_cancelled() {
                return Err(TrainingError::Cancelled { epochs_run });
            }

            order.shuffle(&mut rng);
            let mut loss_sum = 0.0;
            let mut correct = 0;
            for chunk in order.chunks(batch_size) {
                let batch = train.subset(chunk);
                let (inputs, targets) = to_tensors::<B>(&batch, device);
                let output = model.forward(self.plan, inputs);
                correct += count_correct(output.clone(), targets.clone());

                let loss = cross_entropy(output, targets);
                let loss_value = loss.clone().into_scalar().elem::<f64>();
                if !loss_value.is_finite() {
                    return Err(TrainingError::NonFiniteLoss { epoch });
                }
                loss_sum += loss_value * chunk.len() as f64;

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optim.step(self.config.learning_rate, model, grads);
            }
            epochs_run = epoch;

            let mut metrics = EpochMetrics {
                epoch,
                accuracy: correct as f64 / train.len() as f64,
                loss: loss_sum / train.len() as f64,
                val_accuracy: None,
                val_loss: None,
            };

            let snapshot = model.valid();
            if !validation.is_empty() {
                let (val_loss, val_accuracy) =
                    evaluate(&snapshot, self.plan, &validation, batch_size, device);
                if !val_loss.is_finite() {
                    return Err(TrainingError::NonFiniteLoss { epoch });
                }
                metrics.val_loss = Some(val_loss);
                metrics.val_accuracy = Some(val_accuracy);
            }

            let monitored = metrics.val_loss.unwrap_or(metrics.loss);
            let selection = selector.observe(epoch, monitored);
            let improved = selection == Selection::Improved;
            if improved {
                if let Some((store, id)) = self.checkpoint {
                    store
                        .save(id, &snapshot, self.plan)
                        .map_err(|e| TrainingError::Checkpoint(e.to_string()))?;
                }
                best = Some((snapshot, metrics));
            }

            debug!(epoch, loss = metrics.loss, accuracy = metrics.accuracy, improved, "Epoch finished");
            if let Some(events) = &self.events {
                // receiver gone means nobody is listening any more
                let _ = events.send(EpochEvent {
                    metrics,
                    total_epochs: self.config.epochs,
                    improved,
                });
            }

            if selection == Selection::Stop {
                info!(epoch, best_epoch = ?selector.best_epoch(), "Early stopping");
                stopped_early = true;
                break;
            }
        }

        let (network, best) = best.ok_or(TrainingError::EmptyDataset)?;
        Ok(FitOutcome {
            network,
            best,
            epochs_run,
            stopped_early,
        })
    }
}

/// Shuffles sample indices and carves the validation share off the end.
/// At least one sample always stays in the training split.
fn split(dataset: &Dataset, validation_split: f64, rng: &mut StdRng) -> (Dataset, Dataset) {
    let mut indices: Vec<usize> = (0..dataset.len()).collect();
    indices.shuffle(rng);

    let fraction = validation_split.clamp(0.0, 1.0);
    let validation_len = ((dataset.len() as f64 * fraction).floor() as usize).min(dataset.len() - 1);
    let (train, validation) = indices.split_at(dataset.len() - validation_len);
    (dataset.subset(train), dataset.subset(validation))
}

fn to_tensors<B: Backend>(batch: &Dataset, device: &B::Device) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let rows = batch.len();
    let inputs = Tensor::from_data(
        TensorData::new(batch.inputs.clone(), [rows, batch.sample_len()]),
        device,
    );
    let targets = Tensor::from_data(TensorData::new(batch.one_hot(), [rows, batch.num_classes]), device);
    (inputs, targets)
}

/// Categorical cross-entropy over output probabilities
fn cross_entropy<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let total = output.clone().sum_dim(1).clamp_min(EPSILON);
    let probs = (output / total).clamp(EPSILON, 1.0 - EPSILON);
    (targets * probs.log()).sum_dim(1).mean().neg()
}

fn count_correct<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 2>) -> usize {
    let hits = output
        .argmax(1)
        .equal(targets.argmax(1))
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>();
    hits.max(0) as usize
}

fn evaluate<B: Backend>(
    network: &Network<B>,
    plan: &NetworkPlan,
    dataset: &Dataset,
    batch_size: usize,
    device: &B::Device,
) -> (f64, f64) {
    let indices: Vec<usize> = (0..dataset.len()).collect();
    let mut loss_sum = 0.0;
    let mut correct = 0;
    for chunk in indices.chunks(batch_size) {
        let (inputs, targets) = to_tensors::<B>(&dataset.subset(chunk), device);
        let output = network.forward(plan, inputs);
        correct += count_correct(output.clone(), targets.clone());
        loss_sum += cross_entropy(output, targets).into_scalar().elem::<f64>() * chunk.len() as f64;
    }
    let n = dataset.len() as f64;
    (loss_sum / n, correct as f64 / n)
}
