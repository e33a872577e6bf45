//! Turning a probability distribution into a prediction.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::dataset::LabelVocabulary;
use crate::error::{ClassifierError, Result};

/// Reported label when the top-1 confidence is under the threshold.
pub const UNKNOWN_LABEL: &str = "unknown";
/// Default confidence threshold.
pub const UNKNOWN_THRESHOLD: f32 = 0.60;
/// Default length of the ranked list.
pub const TOP_K: usize = 3;

const NOT_READY: &str = "not ready";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredLabel {
    pub label: String,
    pub confidence: f32,
}

/// Prediction for one image.
///
/// `confidence` and `top` always describe the model's real top classes; only
/// `label` is replaced by [`UNKNOWN_LABEL`] for low-confidence predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub label: String,
    pub confidence: f32,
    pub top: Vec<ScoredLabel>,
}

/// Result of a classify call. `NotReady` serializes as
/// `{"error": "not ready"}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifyOutcome {
    Ready(PredictionResult),
    NotReady,
}

impl ClassifyOutcome {
    pub fn prediction(&self) -> Option<&PredictionResult> {
        match self {
            Self::Ready(prediction) => Some(prediction),
            Self::NotReady => None,
        }
    }
}

impl Serialize for ClassifyOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Ready(prediction) => prediction.serialize(serializer),
            Self::NotReady => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", NOT_READY)?;
                map.end()
            }
        }
    }
}

/// Class indices by descending probability. Equal probabilities keep
/// ascending index order.
pub fn rank(probabilities: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    // Stable sort: ties stay in index order.
    order.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));
    order
}

/// Score one probability vector against the model's vocabulary.
pub fn score(
    probabilities: &[f32],
    labels: &LabelVocabulary,
    threshold: f32,
    top_k: usize,
) -> Result<PredictionResult> {
    if probabilities.is_empty() || probabilities.len() != labels.len() {
        return Err(ClassifierError::Model(format!(
            "model produced {} probabilities for {} labels",
            probabilities.len(),
            labels.len()
        )));
    }

    let order = rank(probabilities);
    let scored = |index: usize| ScoredLabel {
        label: labels.get(index).unwrap_or(UNKNOWN_LABEL).to_string(),
        confidence: probabilities[index],
    };

    let best = scored(order[0]);
    let top = order.iter().take(top_k).map(|&i| scored(i)).collect();

    let label = if best.confidence < threshold {
        UNKNOWN_LABEL.to_string()
    } else {
        best.label
    };

    Ok(PredictionResult {
        label,
        confidence: best.confidence,
        top,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(labels: &[&str]) -> LabelVocabulary {
        LabelVocabulary::from_ordered(labels.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_confident_prediction() {
        let labels = vocab(&["A", "B", "C"]);
        let result = score(&[0.7, 0.2, 0.1], &labels, UNKNOWN_THRESHOLD, TOP_K).unwrap();
        assert_eq!(result.label, "A");
        assert_eq!(result.confidence, 0.7);
        let top: Vec<&str> = result.top.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(top, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_low_confidence_is_unknown() {
        let labels = vocab(&["A", "B", "C"]);
        let result = score(&[0.5, 0.3, 0.2], &labels, UNKNOWN_THRESHOLD, TOP_K).unwrap();
        assert_eq!(result.label, "unknown");
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.top[0], ScoredLabel { label: "A".into(), confidence: 0.5 });
        assert_eq!(result.top.len(), 3);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let result = score(&[0.6, 0.4], &vocab(&["A", "B"]), 0.6, TOP_K).unwrap();
        assert_eq!(result.label, "A");
    }

    #[test]
    fn test_uniform_distribution_is_unknown() {
        for k in 2..=10 {
            let probs = vec![1.0 / k as f32; k];
            let labels: Vec<String> = (0..k).map(|i| format!("c{i}")).collect();
            let labels = LabelVocabulary::from_ordered(labels);
            let result = score(&probs, &labels, UNKNOWN_THRESHOLD, TOP_K).unwrap();
            assert_eq!(result.label, "unknown", "k = {k}");
            assert_eq!(result.top.len(), k.min(3));
        }
    }

    #[test]
    fn test_ties_prefer_lower_index() {
        let result = score(&[0.1, 0.45, 0.45], &vocab(&["A", "B", "C"]), 0.4, TOP_K).unwrap();
        assert_eq!(result.label, "B");
        let top: Vec<&str> = result.top.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(top, vec!["B", "C", "A"]);
    }

    #[test]
    fn test_top_list_is_truncated() {
        let labels = vocab(&["A", "B", "C", "D"]);
        let result = score(&[0.1, 0.2, 0.3, 0.4], &labels, UNKNOWN_THRESHOLD, TOP_K).unwrap();
        let top: Vec<&str> = result.top.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(top, vec!["D", "C", "B"]);
    }

    #[test]
    fn test_length_mismatch_is_an_error() {
        assert!(matches!(
            score(&[0.5, 0.5], &vocab(&["A", "B", "C"]), UNKNOWN_THRESHOLD, TOP_K),
            Err(ClassifierError::Model(_))
        ));
    }

    #[test]
    fn test_outcome_serialization() {
        let not_ready = serde_json::to_value(ClassifyOutcome::NotReady).unwrap();
        assert_eq!(not_ready, serde_json::json!({ "error": "not ready" }));

        let ready = ClassifyOutcome::Ready(PredictionResult {
            label: "A".into(),
            confidence: 0.75,
            top: vec![ScoredLabel { label: "A".into(), confidence: 0.75 }],
        });
        let value = serde_json::to_value(&ready).unwrap();
        assert_eq!(value["label"], "A");
        assert_eq!(value["top"][0]["confidence"], 0.75);
    }
}
