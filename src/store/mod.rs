pub mod records;
pub mod samples;

pub use records::{ImageRecord, NewImageRecord, RecordStatus, RecordStore, SqliteRecordStore};
pub use samples::{ensure_trainable, fetch_labeled_samples, LabeledSample, MIN_CLASSES, MIN_SAMPLES};
