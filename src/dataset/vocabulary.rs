//! Label vocabulary: the class-index ↔ label-name mapping of one trained model.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::store::LabeledSample;

/// Ordered label list. Position `i` is the name of model output `i`.
///
/// Every constructor trims its entries, so the list written to `labels.json`
/// is exactly the list read back from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelVocabulary(Vec<String>);

impl LabelVocabulary {
    /// Sorted set of the distinct (trimmed) labels in `samples`.
    pub fn from_samples(samples: &[LabeledSample]) -> Self {
        let unique: BTreeSet<&str> = samples.iter().map(|s| s.human_label.trim()).collect();
        Self(unique.into_iter().map(str::to_string).collect())
    }

    /// Wrap an already ordered list, e.g. one read back from disk. The order
    /// is kept as given.
    pub fn from_ordered(labels: Vec<String>) -> Self {
        Self(labels.iter().map(|label| label.trim().to_string()).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        let label = label.trim();
        self.0.iter().position(|l| l == label)
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }

    /// SHA-256 (hex) of the compact JSON encoding. Links a label file to the
    /// model bundle it was published with.
    pub fn digest(&self) -> String {
        // Serializing a list of strings cannot fail.
        let bytes = serde_json::to_vec(&self.0).unwrap_or_default();
        format!("{:x}", Sha256::digest(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_samples_is_sorted_and_unique() {
        let samples: Vec<LabeledSample> = ["staph", "bacillus", "staph", "ecoli", "bacillus"]
            .iter()
            .enumerate()
            .map(|(i, l)| LabeledSample::new(format!("/{i}.png"), *l))
            .collect();

        let vocab = LabelVocabulary::from_samples(&samples);
        assert_eq!(vocab.labels(), ["bacillus", "ecoli", "staph"]);
        assert_eq!(vocab.index_of("ecoli"), Some(1));
        assert_eq!(vocab.get(2), Some("staph"));
        assert_eq!(vocab.get(3), None);
    }

    #[test]
    fn test_sorting_is_bytewise() {
        let samples = vec![
            LabeledSample::new("/1.png", "beta"),
            LabeledSample::new("/2.png", "Alpha"),
            LabeledSample::new("/3.png", "alpha"),
        ];
        let vocab = LabelVocabulary::from_samples(&samples);
        assert_eq!(vocab.labels(), ["Alpha", "alpha", "beta"]);
    }

    #[test]
    fn test_labels_are_trimmed_on_construction() {
        let samples = vec![
            LabeledSample::new("/1.png", " alpha"),
            LabeledSample::new("/2.png", "alpha"),
            LabeledSample::new("/3.png", "beta \n"),
        ];
        let vocab = LabelVocabulary::from_samples(&samples);
        assert_eq!(vocab.labels(), ["alpha", "beta"]);
        assert_eq!(vocab.index_of(" beta"), Some(1));

        let ordered = LabelVocabulary::from_ordered(vec![" alpha".into(), "beta ".into()]);
        assert_eq!(ordered, vocab);
        assert_eq!(ordered.digest(), vocab.digest());
    }

    #[test]
    fn test_digest_depends_on_order() {
        let ab = LabelVocabulary::from_ordered(vec!["a".into(), "b".into()]);
        let ba = LabelVocabulary::from_ordered(vec!["b".into(), "a".into()]);
        assert_eq!(ab.digest(), ab.clone().digest());
        assert_ne!(ab.digest(), ba.digest());
        assert_eq!(ab.digest().len(), 64);
    }

    #[test]
    fn test_serializes_as_plain_list() {
        let vocab = LabelVocabulary::from_ordered(vec!["Bacteroides fragilis".into()]);
        assert_eq!(
            serde_json::to_string(&vocab).unwrap(),
            r#"["Bacteroides fragilis"]"#
        );
    }
}
