//! Infrastructure layer - storage, neural networks and services

pub mod dataset;
pub mod logging;
pub mod nn;
pub mod observability;
pub mod services;
pub mod storage;
