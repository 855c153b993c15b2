//! Layer specification types

use serde::{Deserialize, Serialize};

/// Activation functions available on dense and conv2d layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
    Softmax,
    Tanh,
}

impl Activation {
    pub const ALL: [&'static str; 4] = ["relu", "sigmoid", "softmax", "tanh"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "relu" => Some(Self::Relu),
            "sigmoid" => Some(Self::Sigmoid),
            "softmax" => Some(Self::Softmax),
            "tanh" => Some(Self::Tanh),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relu => "relu",
            Self::Sigmoid => "sigmoid",
            Self::Softmax => "softmax",
            Self::Tanh => "tanh",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenseLayer {
    pub units: usize,
    pub activation: Activation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_shape: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conv2dLayer {
    pub filters: usize,
    pub kernel_size: [usize; 2],
    pub activation: Activation,
    /// `[height, width, channels]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_shape: Option<[usize; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaxPooling2dLayer {
    pub pool_size: [usize; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlattenLayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropoutLayer {
    pub rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One declarative step of a sequential network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LayerSpec {
    Dense(DenseLayer),
    Conv2d(Conv2dLayer),
    MaxPooling2d(MaxPooling2dLayer),
    Flatten(FlattenLayer),
    Dropout(DropoutLayer),
}

impl LayerSpec {
    pub const KINDS: [&'static str; 5] = ["dense", "conv2d", "maxPooling2d", "flatten", "dropout"];

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dense(_) => "dense",
            Self::Conv2d(_) => "conv2d",
            Self::MaxPooling2d(_) => "maxPooling2d",
            Self::Flatten(_) => "flatten",
            Self::Dropout(_) => "dropout",
        }
    }

    /// Declared input shape, if this layer carries one
    pub fn input_shape(&self) -> Option<Vec<usize>> {
        match self {
            Self::Dense(layer) => layer.input_shape.clone(),
            Self::Conv2d(layer) => layer.input_shape.map(|shape| shape.to_vec()),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Dense(layer) => layer.name.as_deref(),
            Self::Conv2d(layer) => layer.name.as_deref(),
            Self::MaxPooling2d(layer) => layer.name.as_deref(),
            Self::Flatten(layer) => layer.name.as_deref(),
            Self::Dropout(layer) => layer.name.as_deref(),
        }
    }
}
