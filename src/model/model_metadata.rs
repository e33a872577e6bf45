//! Metadata stored alongside the weights in a model bundle.
//!
//! The bundle is a tar.gz holding:
//! - metadata.json: this struct
//! - model.bin: the classifier record

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dataset::LabelVocabulary;
use crate::imaging::IMAGE_SIZE;

/// Bumped whenever the bundle layout changes incompatibly.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Shape of the classifier, enough to rebuild it before loading weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArchitecture {
    /// Output channels of each feature extractor block
    pub backbone_channels: Vec<usize>,
    /// Number of output classes
    pub num_classes: usize,
    /// Dropout rate before the classification layer
    pub dropout: f64,
}

/// Model metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub format_version: u32,

    pub architecture: ModelArchitecture,

    /// Class names in model output order
    pub labels: Vec<String>,

    /// Digest of `labels`; a labels.json that hashes differently belongs to
    /// another run
    pub labels_digest: String,

    /// Model input resolution (square)
    pub image_size: u32,

    /// Final-epoch metrics: loss, accuracy, val_loss, val_accuracy
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,

    /// Samples the run was trained on (train + validation)
    pub sample_count: usize,

    pub num_epochs: usize,

    /// Training time (RFC 3339)
    pub trained_at: String,
}

impl ArtifactMetadata {
    pub fn new(
        architecture: ModelArchitecture,
        vocabulary: &LabelVocabulary,
        metrics: BTreeMap<String, f64>,
        sample_count: usize,
        num_epochs: usize,
    ) -> Self {
        Self {
            format_version: BUNDLE_FORMAT_VERSION,
            architecture,
            labels: vocabulary.labels().to_vec(),
            labels_digest: vocabulary.digest(),
            image_size: IMAGE_SIZE,
            metrics,
            sample_count,
            num_epochs,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn vocabulary(&self) -> LabelVocabulary {
        LabelVocabulary::from_ordered(self.labels.clone())
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json_string(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
