//! Parameterised network built from a `NetworkPlan`

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::MaxPool2dConfig;
use burn::nn::{DropoutConfig, Linear, LinearConfig};
use burn::tensor::activation::{relu, sigmoid, softmax, tanh};
use burn::tensor::{Tensor, backend::Backend};

use super::graph::{NetworkPlan, PlanStep};
use crate::domain::layer::Activation;
use crate::domain::training::InputShape;

/// Trainable parameters of a sequential network.
///
/// The op order lives in the plan; `dense` and `conv` hold the parameters
/// addressed by each step's slot.
#[derive(Module, Debug)]
pub struct Network<B: Backend> {
    dense: Vec<Linear<B>>,
    conv: Vec<Conv2d<B>>,
}

enum Activations<B: Backend> {
    Flat(Tensor<B, 2>),
    Spatial(Tensor<B, 4>),
}

impl<B: Backend> Activations<B> {
    fn into_flat(self) -> Tensor<B, 2> {
        match self {
            Self::Flat(x) => x,
            Self::Spatial(x) => x.flatten(1, 3),
        }
    }

    fn into_spatial(self) -> Tensor<B, 4> {
        match self {
            Self::Spatial(x) => x,
            Self::Flat(x) => {
                let [batch, width] = x.dims();
                x.reshape([batch, 1, 1, width])
            }
        }
    }
}

fn activate<B: Backend, const D: usize>(x: Tensor<B, D>, activation: Activation) -> Tensor<B, D> {
    match activation {
        Activation::Relu => relu(x),
        Activation::Sigmoid => sigmoid(x),
        // class/channel axis
        Activation::Softmax => softmax(x, 1),
        Activation::Tanh => tanh(x),
    }
}

impl<B: Backend> Network<B> {
    pub fn init(plan: &NetworkPlan, device: &B::Device) -> Self {
        let mut dense = Vec::new();
        let mut conv = Vec::new();

        for step in &plan.steps {
            match step {
                PlanStep::Dense { inputs, units, .. } => {
                    dense.push(LinearConfig::new(*inputs, *units).init(device));
                }
                PlanStep::Conv2d {
                    in_channels,
                    filters,
                    kernel,
                    ..
                } => {
                    conv.push(Conv2dConfig::new([*in_channels, *filters], *kernel).init(device));
                }
                _ => {}
            }
        }

        Self { dense, conv }
    }

    /// Runs the plan over a `[batch, volume]` input (NCHW order for images)
    /// and returns `[batch, output_width]`
    pub fn forward(&self, plan: &NetworkPlan, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = match plan.input {
            InputShape::Flat { .. } => Activations::Flat(input),
            InputShape::Spatial {
                height,
                width,
                channels,
            } => {
                let [batch, _] = input.dims();
                Activations::Spatial(input.reshape([batch, channels, height, width]))
            }
        };

        for step in &plan.steps {
            x = match step {
                PlanStep::Dense {
                    slot, activation, ..
                } => {
                    let out = self.dense[*slot].forward(x.into_flat());
                    Activations::Flat(activate(out, *activation))
                }
                PlanStep::Conv2d {
                    slot, activation, ..
                } => {
                    let out = self.conv[*slot].forward(x.into_spatial());
                    Activations::Spatial(activate(out, *activation))
                }
                PlanStep::MaxPool2d { pool } => {
                    let pool = MaxPool2dConfig::new(*pool).with_strides(*pool).init();
                    Activations::Spatial(pool.forward(x.into_spatial()))
                }
                PlanStep::Flatten => Activations::Flat(x.into_flat()),
                PlanStep::Dropout { rate } => match x {
                    Activations::Flat(t) => Activations::Flat(dropout(t, *rate)),
                    Activations::Spatial(t) => Activations::Spatial(dropout(t, *rate)),
                },
            };
        }

        x.into_flat()
    }
}

/// Inverted dropout; only active on autodiff backends
fn dropout<B: Backend, const D: usize>(x: Tensor<B, D>, rate: f64) -> Tensor<B, D> {
    if !B::ad_enabled() || rate <= 0.0 {
        return x;
    }
    if rate >= 1.0 {
        return x.zeros_like();
    }
    DropoutConfig::new(rate).init().forward(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::layer::validate_layers;
    use crate::infrastructure::nn::backend::{InferenceBackend, TrainingBackend, device};
    use crate::infrastructure::nn::graph::ModelGraph;
    use burn::tensor::TensorData;
    use serde_json::json;

    fn plan(layers: serde_json::Value) -> NetworkPlan {
        ModelGraph::build(&validate_layers(&layers).unwrap()).plan().unwrap()
    }

    #[test]
    fn test_dense_forward_shape_and_softmax() {
        let plan = plan(json!([
            {"type": "dense", "units": 8, "activation": "relu", "inputShape": [4]},
            {"type": "dropout", "rate": 0.5},
            {"type": "dense", "units": 3, "activation": "softmax"}
        ]));
        let device = device();
        let network = Network::<InferenceBackend>::init(&plan, &device);
        let input = Tensor::<InferenceBackend, 2>::from_data(
            TensorData::new(vec![0.1f32; 8], [2, 4]),
            &device,
        );

        let output = network.forward(&plan, input);
        assert_eq!(output.dims(), [2, 3]);

        let values = output.into_data().to_vec::<f32>().unwrap();
        let first_row: f32 = values[..3].iter().sum();
        assert!((first_row - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_conv_forward_shape() {
        let plan = plan(json!([
            {"type": "conv2d", "filters": 2, "kernelSize": [3, 3], "activation": "relu", "inputShape": [6, 6, 3]},
            {"type": "maxPooling2d", "poolSize": [2, 2]},
            {"type": "flatten"},
            {"type": "dense", "units": 2, "activation": "sigmoid"}
        ]));
        let device = device();
        let network = Network::<InferenceBackend>::init(&plan, &device);
        let input = Tensor::<InferenceBackend, 2>::zeros([3, 6 * 6 * 3], &device);

        assert_eq!(network.forward(&plan, input).dims(), [3, 2]);
    }

    #[test]
    fn test_full_dropout_zeroes_only_while_training() {
        let device = device();
        let x = Tensor::<TrainingBackend, 2>::ones([2, 2], &device);
        let zeroed: f32 = dropout(x, 1.0).sum().into_scalar();
        assert_eq!(zeroed, 0.0);

        let y = Tensor::<InferenceBackend, 2>::ones([2, 2], &device);
        let kept: f32 = dropout(y, 1.0).sum().into_scalar();
        assert_eq!(kept, 4.0);
    }
}
