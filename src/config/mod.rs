//! Application configuration

mod app_config;

pub use app_config::{
    AppConfig, LimitsConfig, LogFormat, LoggingConfig, MetricsConfig, ServerConfig, StorageConfig,
    TrainingConfig, TrainingDataSource,
};
