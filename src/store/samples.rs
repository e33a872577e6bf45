//! Curated training samples drawn from the record store.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};
use crate::store::records::RecordStore;

/// Fewest samples a training run accepts.
pub const MIN_SAMPLES: usize = 10;
/// Fewest distinct labels a training run accepts.
pub const MIN_CLASSES: usize = 2;

/// A human-labeled image that exists on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub image_path: PathBuf,
    pub human_label: String,
}

impl LabeledSample {
    pub fn new(image_path: impl Into<PathBuf>, human_label: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            human_label: human_label.into(),
        }
    }
}

/// Labeled records whose label is non-empty and whose file still exists.
///
/// Missing files are skipped, not reported as errors: a deleted upload only
/// shrinks the training set.
pub fn fetch_labeled_samples(store: &dyn RecordStore) -> Result<Vec<LabeledSample>> {
    let records = store.labeled_records()?;
    let total = records.len();

    let mut samples = Vec::with_capacity(total);
    for record in records {
        let label = match record.human_label.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => continue,
        };
        if record.file_path.is_empty() {
            continue;
        }
        let path = Path::new(&record.file_path);
        if !path.exists() {
            tracing::debug!("Skipping record {}: {} is missing", record.id, path.display());
            continue;
        }
        samples.push(LabeledSample::new(path, label));
    }

    tracing::info!("{} of {} labeled records usable for training", samples.len(), total);
    Ok(samples)
}

/// Reject sample sets too small to train on.
pub fn ensure_trainable(
    samples: &[LabeledSample],
    min_samples: usize,
    min_classes: usize,
) -> Result<()> {
    if samples.len() < min_samples {
        return Err(ClassifierError::InsufficientData {
            found: samples.len(),
            required: min_samples,
        });
    }
    let classes: BTreeSet<&str> = samples.iter().map(|s| s.human_label.trim()).collect();
    if classes.len() < min_classes {
        return Err(ClassifierError::InsufficientClasses {
            found: classes.len(),
            required: min_classes,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::records::{NewImageRecord, RecordStatus, SqliteRecordStore};

    fn samples(labels: &[&str]) -> Vec<LabeledSample> {
        labels
            .iter()
            .enumerate()
            .map(|(i, label)| LabeledSample::new(format!("/img/{i}.png"), *label))
            .collect()
    }

    #[test]
    fn test_nine_samples_is_insufficient_data() {
        let set = samples(&["a", "b", "a", "b", "a", "b", "a", "b", "a"]);
        let err = ensure_trainable(&set, MIN_SAMPLES, MIN_CLASSES).unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::InsufficientData {
                found: 9,
                required: 10
            }
        ));
    }

    #[test]
    fn test_ten_samples_one_label_is_insufficient_classes() {
        let set = samples(&["a"; 10]);
        let err = ensure_trainable(&set, MIN_SAMPLES, MIN_CLASSES).unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::InsufficientClasses {
                found: 1,
                required: 2
            }
        ));
    }

    #[test]
    fn test_ten_samples_two_labels_is_trainable() {
        let set = samples(&["a", "a", "a", "a", "a", "b", "b", "b", "b", "b"]);
        assert!(ensure_trainable(&set, MIN_SAMPLES, MIN_CLASSES).is_ok());
    }

    #[test]
    fn test_fetch_skips_missing_files_and_blank_labels() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.png");
        std::fs::write(&present, b"x").unwrap();
        let blank = dir.path().join("blank.png");
        std::fs::write(&blank, b"x").unwrap();

        let store = SqliteRecordStore::open_in_memory().unwrap();
        for (path, label) in [
            (present.clone(), "  cocci "),
            (dir.path().join("gone.png"), "cocci"),
            (blank, "   "),
        ] {
            store
                .insert(&NewImageRecord {
                    file_path: path.to_string_lossy().to_string(),
                    original_name: None,
                    status: RecordStatus::Labeled,
                    human_label: Some(label.to_string()),
                })
                .unwrap();
        }

        let fetched = fetch_labeled_samples(&store).unwrap();
        assert_eq!(fetched, vec![LabeledSample::new(present, "cocci")]);
    }
}
