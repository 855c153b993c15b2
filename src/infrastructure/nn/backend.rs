//! Tensor backends

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};

/// CPU backend used for forward passes
pub type InferenceBackend = NdArray<f32>;

/// Autodiff wrapper used by the fit loop
pub type TrainingBackend = Autodiff<InferenceBackend>;

pub fn device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}
