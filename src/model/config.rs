//! Application configuration.
//!
//! Compute device, artifact locations and training/inference constants, saved
//! and loaded as JSON.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ClassifierError, Result};
use crate::model::model_storage::ArtifactPaths;

/// Compute device family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceType {
    /// WGPU (GPU) backend
    Wgpu,
    /// NdArray (CPU) backend
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Wgpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// Where data and artifacts live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Uploaded images, already normalized in place
    pub upload_dir: PathBuf,
    /// SQLite record store
    pub database_path: PathBuf,
    /// Published artifacts
    pub models_dir: PathBuf,
    /// Model bundle file name inside `models_dir`
    pub model_file: String,
    /// Label vocabulary file name inside `models_dir`
    pub labels_file: String,
    /// Pretrained feature extractor record
    pub backbone_weights: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("data/uploads"),
            database_path: PathBuf::from("data/database.db"),
            models_dir: PathBuf::from("models"),
            model_file: "model.tar.gz".to_string(),
            labels_file: "labels.json".to_string(),
            backbone_weights: PathBuf::from("models/backbone.mpk"),
        }
    }
}

impl PathSettings {
    pub fn model_path(&self) -> PathBuf {
        self.models_dir.join(&self.model_file)
    }

    pub fn labels_path(&self) -> PathBuf {
        self.models_dir.join(&self.labels_file)
    }

    pub fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths {
            model_path: self.model_path(),
            labels_path: self.labels_path(),
        }
    }
}

/// Training settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// Number of epochs
    pub num_epochs: usize,
    /// Batch size
    pub batch_size: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Seed for the split and the per-epoch shuffle
    pub seed: u64,
    /// Share of samples held out for validation
    pub validation_fraction: f64,
    /// Dropout before the classification layer
    pub dropout: f64,
    /// Minimum number of usable samples
    pub min_samples: usize,
    /// Minimum number of distinct labels
    pub min_classes: usize,
    /// Decode threads per batch; 0 uses every available core
    #[serde(default)]
    pub num_workers: usize,
    /// Output channels of each feature extractor block; must match the
    /// pretrained backbone record
    #[serde(default = "default_backbone_channels")]
    pub backbone_channels: Vec<usize>,
}

fn default_backbone_channels() -> Vec<usize> {
    vec![32, 64, 128, 256]
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 5,
            batch_size: 16,
            learning_rate: 1e-3,
            seed: 1337,
            validation_fraction: 0.2,
            dropout: 0.2,
            min_samples: 10,
            min_classes: 2,
            num_workers: 0,
            backbone_channels: default_backbone_channels(),
        }
    }
}

/// Inference settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// Top-1 confidence below this reports "unknown"
    pub unknown_threshold: f32,
    /// Length of the ranked list in a prediction
    pub top_k: usize,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            unknown_threshold: 0.60,
            top_k: 3,
        }
    }
}

/// Ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// Accepted file extensions, lowercase with leading dot
    pub accepted_extensions: Vec<String>,
    /// JPEG quality used when rewriting normalized files
    pub jpeg_quality: u8,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            accepted_extensions: [".jpg", ".jpeg", ".png", ".webp", ".tif", ".tiff"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            jpeg_quality: 90,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Compute device
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub inference: InferenceSettings,
    #[serde(default)]
    pub ingest: IngestSettings,
}

impl AppConfig {
    /// Default location of the config file
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// Load the config at `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ClassifierError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| ClassifierError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load `path`, falling back to defaults when it is missing or unreadable
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("{}; using default config", e);
                    Self::default()
                }
            }
        } else {
            tracing::info!("No config at {}; using default config", path.display());
            Self::default()
        }
    }

    /// Save the config to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).map_err(|e| ClassifierError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        fs::write(path, content).map_err(|e| ClassifierError::io(path, e))?;
        Ok(())
    }

    /// Log the effective settings
    pub fn log_summary(&self) {
        tracing::info!("Device: {}", self.device_type);
        tracing::info!(
            "Artifacts: model={} labels={} backbone={}",
            self.paths.model_path().display(),
            self.paths.labels_path().display(),
            self.paths.backbone_weights.display()
        );
        tracing::info!(
            "Training: epochs={} batch={} lr={} seed={} val_fraction={}",
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate,
            self.training.seed,
            self.training.validation_fraction
        );
        tracing::info!(
            "Inference: unknown_threshold={} top_k={}",
            self.inference.unknown_threshold,
            self.inference.top_k
        );
    }
}
