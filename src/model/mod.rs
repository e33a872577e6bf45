pub mod config;
pub mod model_metadata;
pub mod model_storage;

pub use config::{
    AppConfig, DeviceType, InferenceSettings, IngestSettings, PathSettings, TrainingSettings,
};
pub use model_metadata::{ArtifactMetadata, ModelArchitecture, BUNDLE_FORMAT_VERSION};
pub use model_storage::{
    load_artifact, load_bundle, load_labels, log_metadata_info, publish_artifact, save_labels,
    ArtifactPaths,
};
