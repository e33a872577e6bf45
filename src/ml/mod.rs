pub mod backbone;
pub mod inference;
pub mod ml_model;
pub mod training;

pub use backbone::{FeatureExtractor, FeatureExtractorConfig};
pub use inference::InferenceEngine;
pub use ml_model::{images_to_tensor, ClassifierConfig, SpecimenClassifier};
pub use training::{
    encode_weights, fit, train_and_publish, train_from_store, EpochMetrics, ImageBatch,
    ImageBatcher, TrainingSummary,
};
