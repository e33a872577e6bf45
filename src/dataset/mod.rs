//! Training data: label vocabulary, reproducible split and batch pipelines.

pub mod pipeline;
pub mod split;
pub mod vocabulary;

pub use pipeline::{
    build_split, DatasetSplit, EpochBatches, LoadedBatch, PipelineItem, SamplePipeline,
};
pub use split::Split;
pub use vocabulary::LabelVocabulary;
