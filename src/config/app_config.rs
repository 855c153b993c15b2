use std::path::PathBuf;

use serde::Deserialize;

use crate::domain::layer::LayerLimits;
use crate::infrastructure::storage::StorageBackend;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub storage: StorageConfig,
    pub training: TrainingConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root for file-backed records
    pub data_dir: PathBuf,
    /// Where uploaded training images are written
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

/// Where training data comes from
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrainingDataSource {
    /// Uploaded images, one training set per class
    #[default]
    Images,
    /// Random features and labels shaped like the network
    Placeholder,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub data_source: TrainingDataSource,
    pub learning_rate: f64,
    /// Epochs without improvement before stopping
    pub patience: usize,
    pub validation_split: f64,
    pub placeholder_samples: usize,
    /// Add horizontally flipped copies of every image
    pub augment: bool,
    pub checkpoint_dir: PathBuf,
    /// Upper bound applied to requested epochs
    pub max_epochs: usize,
}

/// Caps on model definitions
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_dimension: usize,
    pub max_input_volume: usize,
    pub max_parameters: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = LayerLimits::default();
        Self {
            max_dimension: limits.max_dimension,
            max_input_volume: limits.max_input_volume,
            max_parameters: limits.max_parameters,
        }
    }
}

impl From<&LimitsConfig> for LayerLimits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            max_dimension: config.max_dimension,
            max_input_volume: config.max_input_volume,
            max_parameters: config.max_parameters,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: PathBuf::from("data"),
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: 5 * 1024 * 1024,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_source: TrainingDataSource::default(),
            learning_rate: 1e-3,
            patience: 10,
            validation_split: 0.2,
            placeholder_samples: 1000,
            augment: true,
            checkpoint_dir: PathBuf::from("checkpoints"),
            max_epochs: 10_000,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
