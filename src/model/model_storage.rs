//! Model bundle and label vocabulary persistence.
//!
//! Layout of a bundle (tar.gz):
//! - metadata.json - architecture, labels, digest, metrics
//! - model.bin     - classifier weights
//!
//! `labels.json` sits next to the bundle as a plain JSON list so other tools
//! can read the class order without unpacking anything.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

use crate::dataset::LabelVocabulary;
use crate::error::{ClassifierError, Result};
use crate::imaging::container::replace_file;
use crate::model::model_metadata::ArtifactMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// Where a published artifact lives.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ArtifactPaths {
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
}

/// Build the tar.gz bytes for a bundle.
pub fn encode_bundle(metadata: &ArtifactMetadata, model_binary: &[u8]) -> std::io::Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json = metadata
        .to_json_string()
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    tar_builder.into_inner()?.finish()
}

fn append_entry<W: std::io::Write>(
    builder: &mut Builder<W>,
    name: &str,
    data: &[u8],
) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, data)
}

/// Read metadata and weights from a bundle.
pub fn load_bundle(path: &Path) -> Result<(ArtifactMetadata, Vec<u8>)> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ClassifierError::MissingModel(path.to_path_buf()))
        }
        Err(e) => return Err(ClassifierError::io(path, e)),
    };

    let mut archive = Archive::new(GzDecoder::new(file));
    let mut metadata = None;
    let mut model_binary = None;

    let entries = archive.entries().map_err(|e| ClassifierError::bundle(path, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| ClassifierError::bundle(path, e))?;
        let name = entry
            .path()
            .map_err(|e| ClassifierError::bundle(path, e))?
            .to_string_lossy()
            .into_owned();

        match name.as_str() {
            METADATA_ENTRY => {
                let mut json = String::new();
                entry
                    .read_to_string(&mut json)
                    .map_err(|e| ClassifierError::bundle(path, e))?;
                metadata = Some(
                    ArtifactMetadata::from_json_string(&json)
                        .map_err(|e| ClassifierError::bundle(path, e))?,
                );
            }
            MODEL_ENTRY => {
                let mut buffer = Vec::new();
                entry
                    .read_to_end(&mut buffer)
                    .map_err(|e| ClassifierError::bundle(path, e))?;
                model_binary = Some(buffer);
            }
            _ => {}
        }
    }

    match (metadata, model_binary) {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(ClassifierError::bundle(path, "metadata.json not found in bundle")),
        (_, None) => Err(ClassifierError::bundle(path, "model.bin not found in bundle")),
    }
}

/// Read a label vocabulary, keeping its order.
pub fn load_labels(path: &Path) -> Result<LabelVocabulary> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ClassifierError::MissingLabels(path.to_path_buf()))
        }
        Err(e) => return Err(ClassifierError::io(path, e)),
    };

    let invalid = |reason: String| ClassifierError::InvalidLabelsFormat {
        path: path.to_path_buf(),
        reason,
    };
    let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?;
    let entries = value
        .as_array()
        .ok_or_else(|| invalid("top-level value is not a list".to_string()))?;

    let labels = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            entry
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(format!("entry {i} is not a string")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(LabelVocabulary::from_ordered(labels))
}

/// Write `labels.json`: pretty-printed, UTF-8, class-index order.
pub fn save_labels(path: &Path, vocabulary: &LabelVocabulary) -> Result<()> {
    let json =
        serde_json::to_string_pretty(vocabulary).map_err(|e| ClassifierError::encode(path, e))?;
    replace_file(path, json.as_bytes())
}

/// Publish a trained model: bundle first, then labels.
///
/// Metadata whose digest disagrees with its own labels is refused before
/// anything is written.
///
/// Each file is written to a temporary sibling and renamed into place, so a
/// reader sees either the old or the new file, never a partial one. A failure
/// before the first rename leaves the previous artifact untouched.
pub fn publish_artifact(
    paths: &ArtifactPaths,
    metadata: &ArtifactMetadata,
    model_binary: &[u8],
) -> Result<ArtifactPaths> {
    let vocabulary = metadata.vocabulary();
    let digest = vocabulary.digest();
    if digest != metadata.labels_digest {
        return Err(ClassifierError::ArtifactMismatch {
            model: paths.model_path.clone(),
            labels: paths.labels_path.clone(),
            expected: metadata.labels_digest.clone(),
            found: digest,
        });
    }

    for dir in [paths.model_path.parent(), paths.labels_path.parent()]
        .into_iter()
        .flatten()
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(dir).map_err(|e| ClassifierError::io(dir, e))?;
    }

    let bundle = encode_bundle(metadata, model_binary)
        .map_err(|e| ClassifierError::bundle(&paths.model_path, e))?;

    replace_file(&paths.model_path, &bundle)?;
    save_labels(&paths.labels_path, &vocabulary)?;

    tracing::info!(
        "Published model {} ({} classes) and labels {}",
        paths.model_path.display(),
        vocabulary.len(),
        paths.labels_path.display()
    );
    Ok(paths.clone())
}

/// Load a bundle and its labels, rejecting a pair from different runs.
pub fn load_artifact(
    paths: &ArtifactPaths,
) -> Result<(ArtifactMetadata, Vec<u8>, LabelVocabulary)> {
    let (metadata, model_binary) = load_bundle(&paths.model_path)?;
    let labels = load_labels(&paths.labels_path)?;

    let found = labels.digest();
    if found != metadata.labels_digest {
        return Err(ClassifierError::ArtifactMismatch {
            model: paths.model_path.clone(),
            labels: paths.labels_path.clone(),
            expected: metadata.labels_digest.clone(),
            found,
        });
    }
    Ok((metadata, model_binary, labels))
}

/// Log a summary of a bundle's metadata.
pub fn log_metadata_info(metadata: &ArtifactMetadata) {
    tracing::info!(
        "Model: {} classes [{}], input {}x{}, {} samples, {} epochs, trained at {}",
        metadata.labels.len(),
        metadata.labels.join(", "),
        metadata.image_size,
        metadata.image_size,
        metadata.sample_count,
        metadata.num_epochs,
        metadata.trained_at
    );
    for (name, value) in &metadata.metrics {
        tracing::info!("  {}: {:.4}", name, value);
    }
}
