//! Microscopy image classifier.
//!
//! Images are normalized to 8-bit RGB on the way in, curated labels are read
//! from a SQLite record store, and a classification head is fine-tuned on a
//! frozen pretrained feature extractor. Each training run publishes a model
//! bundle and a label vocabulary that inference loads back together.

#![recursion_limit = "256"]

pub mod dataset;
pub mod error;
pub mod imaging;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod scoring;
pub mod store;

#[cfg(feature = "ml")]
pub mod ml;
#[cfg(feature = "ml")]
pub mod state;

pub use error::{ClassifierError, Result};
pub use model::{AppConfig, DeviceType};
pub use scoring::{ClassifyOutcome, PredictionResult, ScoredLabel};

#[cfg(feature = "ml")]
pub use ml::{InferenceEngine, TrainingSummary};
#[cfg(feature = "ml")]
pub use state::{AppState, TrainingStatus};
