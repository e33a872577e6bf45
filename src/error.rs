//! Error taxonomy shared by the normalizer, training pipeline and artifact loaders.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the classifier core.
///
/// The `Display` text of each variant is the reason string handed back to
/// callers, so keep it short and free of internal detail.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Model bundle absent at load time.
    #[error("No trained model found at {0}")]
    MissingModel(PathBuf),

    /// Label vocabulary absent at load time.
    #[error("No label vocabulary found at {0}")]
    MissingLabels(PathBuf),

    /// Label file is not a flat JSON list of strings.
    #[error("Label file {path} must be a JSON list of strings: {reason}")]
    InvalidLabelsFormat { path: PathBuf, reason: String },

    /// Label file and model bundle were not produced by the same training run.
    #[error("Label file {labels} does not match model bundle {model} (expected digest {expected}, found {found})")]
    ArtifactMismatch {
        model: PathBuf,
        labels: PathBuf,
        expected: String,
        found: String,
    },

    /// Not enough curated samples to start a training run.
    #[error("Need at least {required} labeled samples to train, found {found}")]
    InsufficientData { found: usize, required: usize },

    /// Not enough distinct labels to start a training run.
    #[error("Need at least {required} distinct labels to train, found {found}")]
    InsufficientClasses { found: usize, required: usize },

    /// File extension outside the accepted set.
    #[error("Unsupported file type {extension:?}; accepted extensions: {accepted}")]
    UnsupportedFileType { extension: String, accepted: String },

    /// Image could not be opened or decoded.
    #[error("Failed to decode image {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    /// Normalized image could not be written back.
    #[error("Failed to encode image {path}: {reason}")]
    Encode { path: PathBuf, reason: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Record store query failed.
    #[error("Record store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Model bundle is unreadable or incomplete.
    #[error("Invalid model bundle {path}: {reason}")]
    Bundle { path: PathBuf, reason: String },

    /// Pretrained feature extractor weights are not available.
    #[error("Pretrained backbone weights not found at {0}")]
    MissingBackbone(PathBuf),

    /// Model construction, weight loading or tensor readback failed.
    #[error("Model error: {0}")]
    Model(String),

    /// A training run is already in flight.
    #[error("A training run is already in progress")]
    TrainingInProgress,

    #[error("Invalid configuration {path}: {reason}")]
    Config { path: PathBuf, reason: String },
}

impl ClassifierError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn encode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Encode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn bundle(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Bundle {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = ClassifierError> = std::result::Result<T, E>;
