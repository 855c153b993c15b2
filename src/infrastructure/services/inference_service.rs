//! Forward passes on trained networks

use std::sync::Arc;

use burn::tensor::{Tensor, TensorData};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::model_registry::ModelRegistry;
use crate::domain::model::{ModelId, ModelRecord, ModelStatus};
use crate::domain::storage::Storage;
use crate::domain::training::InputShape;
use crate::domain::training_set::{TrainingSet, TrainingSetId};
use crate::domain::{DomainError, FieldError};
use crate::infrastructure::dataset::preprocess;
use crate::infrastructure::nn::{InferenceBackend, TrainedGraph, device};
use crate::infrastructure::observability::record_inference;

const UNKNOWN_CLASS: &str = "unknown";

#[derive(Debug, Clone, Deserialize)]
pub struct PredictRequest {
    pub data: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictResponse {
    pub predictions: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePrediction {
    pub class: usize,
    /// Name of the training set behind the class
    pub training_set: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImagePredictResponse {
    pub prediction: ImagePrediction,
    pub probabilities: Vec<f32>,
}

#[derive(Debug)]
pub struct InferenceService {
    registry: Arc<ModelRegistry>,
    training_sets: Arc<dyn Storage<TrainingSet>>,
}

impl InferenceService {
    /// Resolves image classes through `training_sets`
    pub fn new(registry: Arc<ModelRegistry>, training_sets: Arc<dyn Storage<TrainingSet>>) -> Self {
        Self {
            registry,
            training_sets,
        }
    }

    async fn trained_graph(&self, id: &ModelId) -> Result<(ModelRecord, TrainedGraph), DomainError> {
        let record = self.registry.get(id).await?;
        let not_trained = || DomainError::not_trained(format!("Model '{}' has not been trained", id));
        if record.status() != ModelStatus::Trained {
            return Err(not_trained());
        }

        let graphs = Arc::clone(self.registry.graphs());
        let key = id.clone();
        let graph = tokio::task::spawn_blocking(move || graphs.get_or_restore(&key))
            .await
            .map_err(|e| DomainError::internal(format!("Checkpoint restore panicked: {}", e)))??;
        graph.map(|graph| (record, graph)).ok_or_else(not_trained)
    }

    /// Class probabilities for each row of `data`
    #[instrument(skip(self, request), fields(rows = request.data.len()))]
    pub async fn predict(
        &self,
        id: &ModelId,
        request: PredictRequest,
    ) -> Result<PredictResponse, DomainError> {
        let result = self.predict_rows(id, request.data).await;
        record_inference("vector", result.is_ok());
        result.map(|predictions| PredictResponse { predictions })
    }

    async fn predict_rows(&self, id: &ModelId, data: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>, DomainError> {
        let width = check_rows(&data)?;
        let (_, graph) = self.trained_graph(id).await?;

        let expected = graph.plan.input.volume();
        if width != expected {
            return Err(DomainError::invalid_fields(
                "Invalid input",
                vec![FieldError::new(
                    "data",
                    format!(
                        "rows must have {} values for input shape {}, got {}",
                        expected, graph.plan.input, width
                    ),
                )],
            ));
        }

        let rows = data.len();
        let values: Vec<f32> = data.into_iter().flatten().collect();
        let probabilities = run_forward(graph, values, rows).await?;
        let classes = probabilities.len() / rows;
        Ok(probabilities.chunks(classes.max(1)).map(<[f32]>::to_vec).collect())
    }

    /// Classifies one uploaded image
    #[instrument(skip(self, image), fields(bytes = image.len()))]
    pub async fn predict_image(
        &self,
        id: &ModelId,
        image: Bytes,
    ) -> Result<ImagePredictResponse, DomainError> {
        let result = self.classify(id, image).await;
        record_inference("image", result.is_ok());
        result
    }

    async fn classify(&self, id: &ModelId, image: Bytes) -> Result<ImagePredictResponse, DomainError> {
        let (record, graph) = self.trained_graph(id).await?;
        let InputShape::Spatial {
            height,
            width,
            channels,
        } = graph.plan.input
        else {
            return Err(DomainError::inference(format!(
                "Model '{}' takes input {}, not an image",
                id, graph.plan.input
            )));
        };

        let sample = tokio::task::spawn_blocking(move || {
            let decoded = preprocess::decode(&image)?;
            preprocess::to_chw(&decoded, height, width, channels)
        })
        .await
        .map_err(|e| DomainError::internal(format!("Image preprocessing panicked: {}", e)))?
        .map_err(|e| DomainError::inference(e.to_string()))?;

        let probabilities = run_forward(graph, sample, 1).await?;
        let (class, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        let training_set = self.class_name(&record, class).await?;
        debug!(class, confidence, training_set = %training_set, "Image classified");
        Ok(ImagePredictResponse {
            prediction: ImagePrediction {
                class,
                training_set,
                confidence,
            },
            probabilities,
        })
    }

    async fn class_name(&self, record: &ModelRecord, class: usize) -> Result<String, DomainError> {
        let Some(id) = record.training_set_ids().get(class) else {
            return Ok(UNKNOWN_CLASS.to_string());
        };
        Ok(self
            .training_sets
            .get(&TrainingSetId::new(id.clone()))
            .await?
            .map(|set| set.name)
            .unwrap_or_else(|| UNKNOWN_CLASS.to_string()))
    }
}

/// Width shared by every row
fn check_rows(data: &[Vec<f32>]) -> Result<usize, DomainError> {
    let invalid = |message: String| {
        DomainError::invalid_fields("Invalid input", vec![FieldError::new("data", message)])
    };
    let Some(first) = data.first() else {
        return Err(invalid("must contain at least one row".to_string()));
    };
    if first.is_empty() {
        return Err(invalid("rows must not be empty".to_string()));
    }
    if let Some(row) = data.iter().position(|row| row.len() != first.len()) {
        return Err(invalid(format!(
            "row {} has {} values but row 0 has {}",
            row,
            data[row].len(),
            first.len()
        )));
    }
    Ok(first.len())
}

async fn run_forward(graph: TrainedGraph, values: Vec<f32>, rows: usize) -> Result<Vec<f32>, DomainError> {
    tokio::task::spawn_blocking(move || {
        let width = values.len() / rows;
        let input = Tensor::<InferenceBackend, 2>::from_data(TensorData::new(values, [rows, width]), &device());
        graph
            .network
            .forward(&graph.plan, input)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| DomainError::inference(format!("Failed to read network output: {:?}", e)))
    })
    .await
    .map_err(|e| DomainError::internal(format!("Forward pass panicked: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::layer::validate_layers;
    use crate::domain::model::FinalMetrics;
    use crate::infrastructure::dataset::preprocess::fixtures::png;
    use crate::infrastructure::nn::{CheckpointStore, GraphStore, ModelGraph, Network};
    use crate::infrastructure::storage::InMemoryStorage;
    use serde_json::{Value, json};

    struct Fixture {
        service: InferenceService,
        registry: Arc<ModelRegistry>,
        training_sets: Arc<InMemoryStorage<TrainingSet>>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ModelRegistry::new(
            Arc::new(InMemoryStorage::<ModelRecord>::new()),
            Arc::new(GraphStore::new(CheckpointStore::new(
                std::env::temp_dir().join(format!("inference-{}", uuid::Uuid::new_v4())),
            ))),
        ));
        let training_sets = Arc::new(InMemoryStorage::<TrainingSet>::new());
        let service = InferenceService::new(Arc::clone(&registry), training_sets.clone());
        Fixture {
            service,
            registry,
            training_sets,
        }
    }

    fn dense() -> Value {
        json!([
            {"type": "dense", "units": 8, "activation": "relu", "inputShape": [4]},
            {"type": "dense", "units": 3, "activation": "softmax"}
        ])
    }

    fn conv() -> Value {
        json!([
            {"type": "conv2d", "filters": 2, "kernelSize": [3, 3], "activation": "relu", "inputShape": [6, 6, 3]},
            {"type": "maxPooling2d", "poolSize": [2, 2]},
            {"type": "flatten"},
            {"type": "dense", "units": 2, "activation": "softmax"}
        ])
    }

    /// Creates a model and marks it TRAINED with freshly initialized weights
    async fn trained(fixture: &Fixture, layers: Value, training_set_ids: Vec<String>) -> ModelId {
        let mut record = fixture
            .registry
            .create(&json!({"name": "net", "layers": layers.clone()}))
            .await
            .unwrap();
        let plan = ModelGraph::build(&validate_layers(&layers).unwrap()).plan().unwrap();
        fixture
            .registry
            .graphs()
            .insert(
                record.id().clone(),
                TrainedGraph {
                    network: Network::init(&plan, &device()),
                    plan,
                },
            )
            .unwrap();
        record.start_training(training_set_ids, "setup").unwrap();
        record.complete_training(FinalMetrics::default(), "done").unwrap();
        fixture.registry.save(record).await.unwrap().id().clone()
    }

    #[tokio::test]
    async fn test_predict_returns_probabilities_per_row() {
        let fixture = fixture();
        let id = trained(&fixture, dense(), vec!["x".into()]).await;

        let response = fixture
            .service
            .predict(&id, PredictRequest { data: vec![vec![0.1, 0.2, 0.3, 0.4], vec![1.0; 4]] })
            .await
            .unwrap();

        assert_eq!(response.predictions.len(), 2);
        for row in &response.predictions {
            assert_eq!(row.len(), 3);
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        }
    }

    #[tokio::test]
    async fn test_predict_rejects_bad_rows() {
        let fixture = fixture();
        let id = trained(&fixture, dense(), vec!["x".into()]).await;

        for data in [vec![], vec![vec![1.0; 4], vec![1.0; 3]], vec![vec![1.0; 5]]] {
            let err = fixture.service.predict(&id, PredictRequest { data }).await.unwrap_err();
            assert!(matches!(err, DomainError::Validation { .. }));
            assert_eq!(err.field_errors()[0].field, "data");
        }
    }

    #[tokio::test]
    async fn test_predict_unknown_or_untrained_model() {
        let fixture = fixture();
        let request = || PredictRequest { data: vec![vec![1.0; 4]] };

        let err = fixture.service.predict(&ModelId::new("nope"), request()).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));

        let pending = fixture
            .registry
            .create(&json!({"name": "net", "layers": dense()}))
            .await
            .unwrap();
        let err = fixture.service.predict(pending.id(), request()).await.unwrap_err();
        assert!(matches!(err, DomainError::NotTrained { .. }));
        assert_eq!(err.message(), format!("Model '{}' has not been trained", pending.id()));
    }

    #[tokio::test]
    async fn test_trained_record_without_graph_is_not_trained() {
        let fixture = fixture();
        let id = trained(&fixture, dense(), vec!["x".into()]).await;
        fixture.registry.graphs().remove(&id).unwrap();

        let err = fixture
            .service
            .predict(&id, PredictRequest { data: vec![vec![1.0; 4]] })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotTrained { .. }));
    }

    #[tokio::test]
    async fn test_predict_image_names_the_class() {
        let fixture = fixture();
        let cats = fixture
            .training_sets
            .create(TrainingSet::new("cats", None, "u1"))
            .await
            .unwrap();
        let dogs = fixture
            .training_sets
            .create(TrainingSet::new("dogs", None, "u1"))
            .await
            .unwrap();
        let id = trained(
            &fixture,
            conv(),
            vec![cats.id.as_str().to_string(), dogs.id.as_str().to_string()],
        )
        .await;

        let response = fixture
            .service
            .predict_image(&id, Bytes::from(png(12, 12, [200, 10, 10])))
            .await
            .unwrap();

        assert_eq!(response.probabilities.len(), 2);
        assert!(response.prediction.class < 2);
        let expected = if response.prediction.class == 0 { "cats" } else { "dogs" };
        assert_eq!(response.prediction.training_set, expected);
        assert_eq!(
            response.prediction.confidence,
            response.probabilities[response.prediction.class]
        );
    }

    #[tokio::test]
    async fn test_predict_image_with_unknown_training_set() {
        let fixture = fixture();
        let id = trained(&fixture, conv(), vec!["deleted-a".into(), "deleted-b".into()]).await;

        let response = fixture
            .service
            .predict_image(&id, Bytes::from(png(6, 6, [0, 0, 0])))
            .await
            .unwrap();
        assert_eq!(response.prediction.training_set, UNKNOWN_CLASS);
    }

    #[tokio::test]
    async fn test_predict_image_errors() {
        let fixture = fixture();
        let flat = trained(&fixture, dense(), vec!["x".into()]).await;
        let err = fixture
            .service
            .predict_image(&flat, Bytes::from(png(4, 4, [0, 0, 0])))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Inference { .. }));

        let spatial = trained(&fixture, conv(), vec!["a".into(), "b".into()]).await;
        let err = fixture
            .service
            .predict_image(&spatial, Bytes::from_static(b"not an image"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Inference { .. }));
    }
}
