//! Training orchestration: one run per model, progress streamed into the record

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{OwnedMutexGuard, mpsc, watch};
use tracing::{error, info, instrument, warn};
use validator::Validate;

use super::model_registry::ModelRegistry;
use crate::config::TrainingConfig;
use crate::domain::model::{FinalMetrics, ModelId, ModelRecord, ModelStatus};
use crate::domain::training::{DatasetProvider, EpochEvent, TrainRequest, TrainingResult};
use crate::domain::{DomainError, FieldError};
use crate::infrastructure::nn::{
    FitConfig, FitOutcome, InferenceBackend, ModelGraph, NetworkPlan, TrainedGraph, Trainer,
    TrainingBackend, TrainingError, device,
};
use crate::infrastructure::observability::record_training_run;

/// Hyper-parameters the caller does not choose
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSettings {
    pub learning_rate: f64,
    pub patience: usize,
    pub validation_split: f64,
    pub max_epochs: usize,
    /// Fixed shuffling seed, for reproducible runs
    pub seed: Option<u64>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self::from(&TrainingConfig::default())
    }
}

impl From<&TrainingConfig> for TrainingSettings {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            learning_rate: config.learning_rate,
            patience: config.patience,
            validation_split: config.validation_split,
            max_epochs: config.max_epochs,
            seed: None,
        }
    }
}

/// Why a run ended without a trained network
struct RunFailure {
    message: String,
    cancelled: bool,
}

impl RunFailure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cancelled: false,
        }
    }
}

impl From<TrainingError> for RunFailure {
    fn from(error: TrainingError) -> Self {
        Self {
            cancelled: matches!(error, TrainingError::Cancelled { .. }),
            message: error.to_string(),
        }
    }
}

pub struct TrainingService {
    registry: Arc<ModelRegistry>,
    datasets: Arc<dyn DatasetProvider>,
    settings: TrainingSettings,
    runs: Mutex<HashMap<ModelId, watch::Sender<bool>>>,
}

impl fmt::Debug for TrainingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainingService")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TrainingService {
    /// Service training models of `registry` on data from `datasets`
    pub fn new(
        registry: Arc<ModelRegistry>,
        datasets: Arc<dyn DatasetProvider>,
        settings: TrainingSettings,
    ) -> Self {
        Self {
            registry,
            datasets,
            settings,
            runs: Mutex::new(HashMap::new()),
        }
    }

    fn runs(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ModelId, watch::Sender<bool>>>, DomainError> {
        self.runs
            .lock()
            .map_err(|e| DomainError::internal(format!("Run table lock poisoned: {}", e)))
    }

    fn check_request(&self, request: &TrainRequest) -> Result<(), DomainError> {
        request.validate()?;
        if request.epochs > self.settings.max_epochs {
            return Err(DomainError::invalid_fields(
                "Invalid request",
                vec![FieldError::new(
                    "epochs",
                    format!("must be at most {}", self.settings.max_epochs),
                )],
            ));
        }
        Ok(())
    }

    /// Validates, moves the model to TRAINING and runs the fit.
    ///
    /// Request and lookup problems come back as errors before anything is
    /// written. Once the record is TRAINING every failure is captured on the
    /// record and reported in the returned result instead.
    #[instrument(skip(self, request), fields(model_id = %id, epochs = request.epochs))]
    pub async fn train(
        self: &Arc<Self>,
        id: &ModelId,
        request: TrainRequest,
    ) -> Result<TrainingResult, DomainError> {
        self.check_request(&request)?;
        self.registry.get(id).await?;

        let guard = self.registry.try_acquire(id)?;
        let mut record = self.registry.get(id).await?;
        let labels = self.datasets.resolve(&request.training_set_ids).await?;

        let setup = format!(
            "Training started: {} epochs, batch size {}, training sets [{}]",
            request.epochs,
            request.batch_size,
            request.training_set_ids.join(", ")
        );
        record.start_training(request.training_set_ids.clone(), setup)?;
        let record = self.registry.save(record).await?;
        info!(classes = labels.len(), batch_size = request.batch_size, "Training started");

        let (cancel_tx, cancel_rx) = watch::channel(false);
        match self.runs() {
            Ok(mut runs) => {
                runs.insert(id.clone(), cancel_tx);
            }
            Err(e) => warn!(error = %e, "Run will not be cancellable"),
        }

        // dropping this future leaves the spawned run to finish on its own
        let background = request.background;
        let service = Arc::clone(self);
        let run = tokio::spawn(async move { service.run(record, request, cancel_rx, guard).await });

        if background {
            return Ok(TrainingResult::accepted(id.clone()));
        }
        match run.await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(error = %e, "Training task aborted");
                Ok(TrainingResult::failed(
                    id.clone(),
                    format!("Training task aborted: {}", e),
                    0,
                ))
            }
        }
    }

    /// Asks the active run of a model to stop after the current epoch
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &ModelId) -> Result<(), DomainError> {
        self.registry.get(id).await?;
        match self.runs()?.get(id) {
            Some(cancel) => {
                cancel.send_replace(true);
                info!("Cancellation requested");
                Ok(())
            }
            None => Err(DomainError::conflict(format!("Model '{}' is not training", id))),
        }
    }

    async fn run(
        self: Arc<Self>,
        record: ModelRecord,
        request: TrainRequest,
        cancel: watch::Receiver<bool>,
        guard: OwnedMutexGuard<()>,
    ) -> TrainingResult {
        let started = Instant::now();
        let id = record.id().clone();

        let service = Arc::clone(&self);
        let fitting = tokio::spawn(async move { service.fit(&record, &request, cancel).await });
        let (outcome, epochs_appended) = match fitting.await {
            Ok(fitted) => fitted,
            Err(e) => (
                Err(RunFailure::new(format!("Training task panicked: {}", e))),
                0,
            ),
        };
        let label = match &outcome {
            Ok(_) => "completed",
            Err(failure) if failure.cancelled => "cancelled",
            Err(_) => "failed",
        };
        let result = self.finish(&id, outcome, epochs_appended).await;

        if let Ok(mut runs) = self.runs() {
            runs.remove(&id);
        }
        drop(guard);

        record_training_run(label, result.epochs_run.unwrap_or(0), started.elapsed());
        result
    }

    /// Plans, loads and fits; returns the outcome and how many epochs were logged
    async fn fit(
        &self,
        record: &ModelRecord,
        request: &TrainRequest,
        cancel: watch::Receiver<bool>,
    ) -> (Result<(FitOutcome<InferenceBackend>, NetworkPlan), RunFailure>, usize) {
        let plan = match ModelGraph::build(record.layers())
            .plan()
            .and_then(|plan| plan.check_limits(self.registry.limits()).map(|_| plan))
        {
            Ok(plan) => plan,
            Err(e) => return (Err(RunFailure::new(e.to_string())), 0),
        };
        let dataset = match self
            .datasets
            .load(&request.training_set_ids, plan.input, plan.output_width)
            .await
        {
            Ok(dataset) => dataset,
            Err(e) => return (Err(RunFailure::new(e.message())), 0),
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let appender = tokio::spawn(append_epochs(
            Arc::clone(&self.registry),
            record.id().clone(),
            events_rx,
        ));

        let config = FitConfig {
            epochs: request.epochs,
            batch_size: request.batch_size,
            learning_rate: self.settings.learning_rate,
            patience: self.settings.patience,
            validation_split: self.settings.validation_split,
            seed: self.settings.seed,
        };
        let checkpoints = self.registry.graphs().checkpoints().clone();
        let id = record.id().clone();
        let fit_plan = plan.clone();
        let fitted = tokio::task::spawn_blocking(move || {
            Trainer::new(config, &fit_plan)
                .with_events(events_tx)
                .with_cancellation(cancel)
                .with_checkpoints(&checkpoints, &id)
                .fit::<TrainingBackend>(&dataset, &device())
        })
        .await;

        // the sender is gone once the blocking task ends, so this drains and returns
        let appended = appender.await.unwrap_or_else(|e| {
            warn!(error = %e, "Epoch appender stopped unexpectedly");
            0
        });

        let outcome = match fitted {
            Ok(Ok(outcome)) => Ok((outcome, plan)),
            Ok(Err(e)) => Err(RunFailure::from(e)),
            Err(e) => Err(RunFailure::new(format!("Training task panicked: {}", e))),
        };
        (outcome, appended)
    }

    /// Moves the record out of TRAINING whatever happens
    async fn finish(
        &self,
        id: &ModelId,
        outcome: Result<(FitOutcome<InferenceBackend>, NetworkPlan), RunFailure>,
        epochs_appended: usize,
    ) -> TrainingResult {
        match self.record_outcome(id, outcome, epochs_appended).await {
            Ok(result) => result,
            Err(e) => {
                error!(model_id = %id, error = %e, "Failed to record training outcome");
                self.mark_failed(id, e.message()).await;
                TrainingResult::failed(id.clone(), e.message(), epochs_appended)
            }
        }
    }

    async fn mark_failed(&self, id: &ModelId, message: &str) {
        if let Err(e) = self.registry.graphs().remove(id) {
            warn!(model_id = %id, error = %e, "Failed to discard trained graph");
        }
        let marked = async {
            let mut record = self.registry.get(id).await?;
            if record.status() == ModelStatus::Training {
                record.fail_training(message)?;
                self.registry.save(record).await?;
            }
            Ok::<_, DomainError>(())
        };
        if let Err(e) = marked.await {
            error!(model_id = %id, error = %e, "Model could not be moved out of TRAINING");
        }
    }

    async fn record_outcome(
        &self,
        id: &ModelId,
        outcome: Result<(FitOutcome<InferenceBackend>, NetworkPlan), RunFailure>,
        epochs_appended: usize,
    ) -> Result<TrainingResult, DomainError> {
        let mut record = self.registry.get(id).await?;
        match outcome {
            Ok((fit, plan)) => {
                let metrics = FinalMetrics {
                    accuracy: fit.best.accuracy,
                    loss: fit.best.loss,
                };
                let line = format!(
                    "Training completed after {} epochs{}: best epoch {}, loss={:.4}, accuracy={:.4}",
                    fit.epochs_run,
                    if fit.stopped_early { " (stopped early)" } else { "" },
                    fit.best.epoch,
                    metrics.loss,
                    metrics.accuracy
                );
                self.registry.graphs().insert(
                    id.clone(),
                    TrainedGraph {
                        network: fit.network,
                        plan,
                    },
                )?;
                record.complete_training(metrics, line)?;
                self.registry.save(record).await?;
                info!(
                    model_id = %id,
                    epochs_run = fit.epochs_run,
                    stopped_early = fit.stopped_early,
                    accuracy = metrics.accuracy,
                    loss = metrics.loss,
                    "Training completed"
                );
                Ok(TrainingResult::completed(
                    id.clone(),
                    metrics,
                    fit.epochs_run,
                    fit.stopped_early,
                ))
            }
            Err(failure) => {
                if let Err(e) = self.registry.graphs().remove(id) {
                    warn!(model_id = %id, error = %e, "Failed to discard partial checkpoint");
                }
                record.fail_training(failure.message.clone())?;
                self.registry.save(record).await?;
                if failure.cancelled {
                    info!(model_id = %id, epochs_run = epochs_appended, "Training cancelled");
                } else {
                    warn!(model_id = %id, error = %failure.message, "Training failed");
                }
                Ok(TrainingResult::failed(id.clone(), failure.message, epochs_appended))
            }
        }
    }
}

/// Writes one metrics entry and log line per epoch, in arrival order
async fn append_epochs(
    registry: Arc<ModelRegistry>,
    id: ModelId,
    mut events: mpsc::UnboundedReceiver<EpochEvent>,
) -> usize {
    let mut appended = 0;
    while let Some(event) = events.recv().await {
        appended += 1;
        let mut record = match registry.get(&id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(model_id = %id, error = %e, "Dropping epoch event");
                continue;
            }
        };
        record.record_epoch(event.metrics, event.log_line());
        if let Err(e) = registry.save(record).await {
            warn!(model_id = %id, epoch = event.metrics.epoch, error = %e, "Failed to persist epoch");
        }
    }
    appended
}
