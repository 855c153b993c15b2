//! Sequential graph construction and shape inference

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::layer::{Activation, LayerLimits, LayerSpec};
use crate::domain::training::InputShape;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("Model has no layers")]
    Empty,

    #[error(
        "shape mismatch: the first layer declares no inputShape, so the network input rank cannot be resolved"
    )]
    UnresolvedInput,

    #[error("shape mismatch: inputShape of rank {rank} is not supported (use [features] or [height, width, channels])")]
    UnsupportedInputRank { rank: usize },

    #[error(
        "shape mismatch at layer {index} (dense): expected a flat input but got {shape}; insert a flatten layer before it"
    )]
    DenseNeedsFlatInput { index: usize, shape: String },

    #[error("shape mismatch at layer {index} ({kind}): expected a [height, width, channels] input but got {shape}")]
    NeedsSpatialInput {
        index: usize,
        kind: &'static str,
        shape: String,
    },

    #[error("shape mismatch at layer {index} ({kind}): window {window:?} does not fit input {shape}")]
    WindowTooLarge {
        index: usize,
        kind: &'static str,
        window: [usize; 2],
        shape: String,
    },

    #[error("shape mismatch: the last layer must produce a flat class vector but produces {shape}")]
    OutputNotFlat { shape: String },

    #[error("network too large: {what} exceeds {limit}")]
    TooLarge { what: &'static str, limit: usize },
}

/// One op of a shape-resolved network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PlanStep {
    /// `slot` indexes the network's dense parameters
    Dense {
        slot: usize,
        inputs: usize,
        units: usize,
        activation: Activation,
    },
    /// `slot` indexes the network's conv parameters
    Conv2d {
        slot: usize,
        in_channels: usize,
        filters: usize,
        kernel: [usize; 2],
        activation: Activation,
    },
    MaxPool2d { pool: [usize; 2] },
    Flatten,
    Dropout { rate: f64 },
}

/// Shape-inferred op list from which parameters are allocated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPlan {
    pub input: InputShape,
    pub steps: Vec<PlanStep>,
    pub output_width: usize,
}

impl NetworkPlan {
    pub fn is_spatial_input(&self) -> bool {
        matches!(self.input, InputShape::Spatial { .. })
    }

    /// Weights plus biases of every dense and conv op, `None` on overflow
    pub fn parameter_count(&self) -> Option<usize> {
        self.steps.iter().try_fold(0usize, |total, step| {
            let params = match *step {
                PlanStep::Dense { inputs, units, .. } => inputs.checked_mul(units)?.checked_add(units)?,
                PlanStep::Conv2d {
                    in_channels,
                    filters,
                    kernel,
                    ..
                } => in_channels
                    .checked_mul(filters)?
                    .checked_mul(kernel[0])?
                    .checked_mul(kernel[1])?
                    .checked_add(filters)?,
                _ => 0,
            };
            total.checked_add(params)
        })
    }

    /// Rejects plans whose input or parameter count exceed `limits`
    pub fn check_limits(&self, limits: &LayerLimits) -> Result<(), GraphError> {
        if self
            .input
            .checked_volume()
            .is_none_or(|volume| volume > limits.max_input_volume)
        {
            return Err(GraphError::TooLarge {
                what: "input volume",
                limit: limits.max_input_volume,
            });
        }
        if self
            .parameter_count()
            .is_none_or(|count| count > limits.max_parameters)
        {
            return Err(GraphError::TooLarge {
                what: "parameter count",
                limit: limits.max_parameters,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum GraphOp {
    Dense { units: usize, activation: Activation },
    Conv2d { filters: usize, kernel: [usize; 2], activation: Activation },
    MaxPool2d { pool: [usize; 2] },
    Flatten,
    Dropout { rate: f64 },
}

impl GraphOp {
    fn kind(&self) -> &'static str {
        match self {
            Self::Dense { .. } => "dense",
            Self::Conv2d { .. } => "conv2d",
            Self::MaxPool2d { .. } => "maxPooling2d",
            Self::Flatten => "flatten",
            Self::Dropout { .. } => "dropout",
        }
    }
}

/// Ordered ops plus the declared input shape of a layer list
#[derive(Debug, Clone, PartialEq)]
pub struct ModelGraph {
    ops: Vec<GraphOp>,
    input_shape: Option<Vec<usize>>,
}

impl ModelGraph {
    pub fn build(layers: &[LayerSpec]) -> Self {
        let ops = layers
            .iter()
            .map(|layer| match layer {
                LayerSpec::Dense(l) => GraphOp::Dense {
                    units: l.units,
                    activation: l.activation,
                },
                LayerSpec::Conv2d(l) => GraphOp::Conv2d {
                    filters: l.filters,
                    kernel: l.kernel_size,
                    activation: l.activation,
                },
                LayerSpec::MaxPooling2d(l) => GraphOp::MaxPool2d { pool: l.pool_size },
                LayerSpec::Flatten(_) => GraphOp::Flatten,
                LayerSpec::Dropout(l) => GraphOp::Dropout { rate: l.rate },
            })
            .collect();

        Self {
            ops,
            input_shape: layers.first().and_then(LayerSpec::input_shape),
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Rank of the declared input, `None` when the first layer declares none
    pub fn input_rank(&self) -> Option<usize> {
        self.input_shape.as_ref().map(Vec::len)
    }

    pub fn plan(&self) -> Result<NetworkPlan, GraphError> {
        if self.ops.is_empty() {
            return Err(GraphError::Empty);
        }

        let declared = self.input_shape.as_ref().ok_or(GraphError::UnresolvedInput)?;
        let input = match declared.as_slice() {
            [width] => InputShape::Flat { width: *width },
            [height, width, channels] => InputShape::Spatial {
                height: *height,
                width: *width,
                channels: *channels,
            },
            other => return Err(GraphError::UnsupportedInputRank { rank: other.len() }),
        };

        let mut shape = input;
        let mut steps = Vec::with_capacity(self.ops.len());
        let (mut dense_slots, mut conv_slots) = (0, 0);

        for (index, op) in self.ops.iter().enumerate() {
            match (op, shape) {
                (GraphOp::Dense { units, activation }, InputShape::Flat { width }) => {
                    steps.push(PlanStep::Dense {
                        slot: dense_slots,
                        inputs: width,
                        units: *units,
                        activation: *activation,
                    });
                    dense_slots += 1;
                    shape = InputShape::Flat { width: *units };
                }
                (GraphOp::Dense { .. }, spatial) => {
                    return Err(GraphError::DenseNeedsFlatInput {
                        index,
                        shape: spatial.to_string(),
                    });
                }
                (
                    GraphOp::Conv2d {
                        filters,
                        kernel,
                        activation,
                    },
                    InputShape::Spatial {
                        height,
                        width,
                        channels,
                    },
                ) => {
                    if kernel[0] > height || kernel[1] > width {
                        return Err(GraphError::WindowTooLarge {
                            index,
                            kind: op.kind(),
                            window: *kernel,
                            shape: shape.to_string(),
                        });
                    }
                    steps.push(PlanStep::Conv2d {
                        slot: conv_slots,
                        in_channels: channels,
                        filters: *filters,
                        kernel: *kernel,
                        activation: *activation,
                    });
                    conv_slots += 1;
                    shape = InputShape::Spatial {
                        height: height - kernel[0] + 1,
                        width: width - kernel[1] + 1,
                        channels: *filters,
                    };
                }
                (
                    GraphOp::MaxPool2d { pool },
                    InputShape::Spatial {
                        height,
                        width,
                        channels,
                    },
                ) => {
                    if pool[0] > height || pool[1] > width {
                        return Err(GraphError::WindowTooLarge {
                            index,
                            kind: op.kind(),
                            window: *pool,
                            shape: shape.to_string(),
                        });
                    }
                    steps.push(PlanStep::MaxPool2d { pool: *pool });
                    shape = InputShape::Spatial {
                        height: height / pool[0],
                        width: width / pool[1],
                        channels,
                    };
                }
                (GraphOp::Conv2d { .. } | GraphOp::MaxPool2d { .. }, flat) => {
                    return Err(GraphError::NeedsSpatialInput {
                        index,
                        kind: op.kind(),
                        shape: flat.to_string(),
                    });
                }
                (GraphOp::Flatten, current) => {
                    steps.push(PlanStep::Flatten);
                    let width = current.checked_volume().ok_or(GraphError::TooLarge {
                        what: "flattened width",
                        limit: usize::MAX,
                    })?;
                    shape = InputShape::Flat { width };
                }
                (GraphOp::Dropout { rate }, _) => steps.push(PlanStep::Dropout { rate: *rate }),
            }
        }

        match shape {
            InputShape::Flat { width } => Ok(NetworkPlan {
                input,
                steps,
                output_width: width,
            }),
            spatial => Err(GraphError::OutputNotFlat {
                shape: spatial.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::layer::validate_layers;
    use serde_json::json;

    fn graph(layers: serde_json::Value) -> ModelGraph {
        ModelGraph::build(&validate_layers(&layers).unwrap())
    }

    #[test]
    fn test_dense_plan() {
        let graph = graph(json!([
            {"type": "dense", "units": 64, "activation": "relu", "inputShape": [10]},
            {"type": "dropout", "rate": 0.2},
            {"type": "dense", "units": 3, "activation": "softmax"}
        ]));
        assert_eq!(graph.input_rank(), Some(1));

        let plan = graph.plan().unwrap();
        assert_eq!(plan.input, InputShape::Flat { width: 10 });
        assert_eq!(plan.output_width, 3);
        assert_eq!(
            plan.steps[2],
            PlanStep::Dense {
                slot: 1,
                inputs: 64,
                units: 3,
                activation: Activation::Softmax
            }
        );
    }

    #[test]
    fn test_convolutional_plan() {
        let plan = graph(json!([
            {"type": "conv2d", "filters": 4, "kernelSize": [3, 3], "activation": "relu", "inputShape": [28, 28, 1]},
            {"type": "maxPooling2d", "poolSize": [2, 2]},
            {"type": "flatten"},
            {"type": "dense", "units": 2, "activation": "softmax"}
        ]))
        .plan()
        .unwrap();

        assert!(plan.is_spatial_input());
        // 28 - 3 + 1 = 26, pooled to 13
        assert_eq!(
            plan.steps[3],
            PlanStep::Dense {
                slot: 0,
                inputs: 13 * 13 * 4,
                units: 2,
                activation: Activation::Softmax
            }
        );
    }

    #[test]
    fn test_missing_input_shape_builds_but_fails_to_plan() {
        let graph = graph(json!([{"type": "dense", "units": 2, "activation": "softmax"}]));
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.input_rank(), None);

        let error = graph.plan().unwrap_err();
        assert_eq!(error, GraphError::UnresolvedInput);
        assert!(error.to_string().starts_with("shape mismatch"));
    }

    #[test]
    fn test_dense_on_spatial_input_suggests_flatten() {
        let error = graph(json!([
            {"type": "conv2d", "filters": 2, "kernelSize": [2, 2], "activation": "relu", "inputShape": [4, 4, 1]},
            {"type": "dense", "units": 2, "activation": "softmax"}
        ]))
        .plan()
        .unwrap_err();

        assert!(matches!(error, GraphError::DenseNeedsFlatInput { index: 1, .. }));
        assert!(error.to_string().contains("flatten"));
    }

    #[test]
    fn test_conv_on_flat_input_fails() {
        let error = graph(json!([
            {"type": "dense", "units": 4, "activation": "relu", "inputShape": [8]},
            {"type": "conv2d", "filters": 2, "kernelSize": [2, 2], "activation": "relu"}
        ]))
        .plan()
        .unwrap_err();

        assert!(matches!(error, GraphError::NeedsSpatialInput { index: 1, .. }));
    }

    #[test]
    fn test_oversized_pool_window_fails() {
        let error = graph(json!([
            {"type": "conv2d", "filters": 2, "kernelSize": [3, 3], "activation": "relu", "inputShape": [4, 4, 1]},
            {"type": "maxPooling2d", "poolSize": [3, 3]},
            {"type": "flatten"},
            {"type": "dense", "units": 2, "activation": "softmax"}
        ]))
        .plan()
        .unwrap_err();

        assert!(matches!(error, GraphError::WindowTooLarge { index: 1, .. }));
    }

    #[test]
    fn test_spatial_output_is_rejected() {
        let error = graph(json!([
            {"type": "conv2d", "filters": 2, "kernelSize": [2, 2], "activation": "softmax", "inputShape": [4, 4, 1]}
        ]))
        .plan()
        .unwrap_err();

        assert!(matches!(error, GraphError::OutputNotFlat { .. }));
    }

    #[test]
    fn test_plan_round_trips_through_json() {
        let plan = graph(json!([
            {"type": "dense", "units": 3, "activation": "softmax", "inputShape": [5]}
        ]))
        .plan()
        .unwrap();

        let restored: NetworkPlan = serde_json::from_str(&serde_json::to_string(&plan).unwrap()).unwrap();
        assert_eq!(restored, plan);
    }

    fn unchecked_graph(layers: serde_json::Value) -> ModelGraph {
        ModelGraph::build(&serde_json::from_value::<Vec<LayerSpec>>(layers).unwrap())
    }

    #[test]
    fn test_flatten_overflow_is_an_error() {
        let error = unchecked_graph(json!([
            {"type": "conv2d", "filters": 4, "kernelSize": [1, 1], "activation": "relu",
             "inputShape": [4294967296u64, 4294967296u64, 4]},
            {"type": "flatten"},
            {"type": "dense", "units": 2, "activation": "softmax"}
        ]))
        .plan()
        .unwrap_err();

        assert!(matches!(error, GraphError::TooLarge { what: "flattened width", .. }));
    }

    #[test]
    fn test_parameter_count() {
        let plan = graph(json!([
            {"type": "conv2d", "filters": 2, "kernelSize": [3, 3], "activation": "relu", "inputShape": [5, 5, 1]},
            {"type": "flatten"},
            {"type": "dense", "units": 3, "activation": "softmax"}
        ]))
        .plan()
        .unwrap();

        // conv: 1*2*3*3 + 2, dense: 18*3 + 3
        assert_eq!(plan.parameter_count(), Some(20 + 57));
    }

    #[test]
    fn test_check_limits() {
        let plan = unchecked_graph(json!([
            {"type": "dense", "units": 4096, "activation": "relu", "inputShape": [4096]},
            {"type": "dense", "units": 2, "activation": "softmax"}
        ]))
        .plan()
        .unwrap();

        let error = plan.check_limits(&LayerLimits::default()).unwrap_err();
        assert!(matches!(error, GraphError::TooLarge { what: "parameter count", .. }));

        let roomy = LayerLimits {
            max_parameters: usize::MAX,
            ..LayerLimits::default()
        };
        assert!(plan.check_limits(&roomy).is_ok());
    }
}
