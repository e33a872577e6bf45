//! Model inference

use std::path::Path;

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::{Wgpu, WgpuDevice};

use crate::dataset::LabelVocabulary;
use crate::error::{ClassifierError, Result};
use crate::imaging::{load_normalized, NormalizedImage};
use crate::ml::ml_model::{images_to_tensor, ClassifierConfig, SpecimenClassifier};
use crate::model::{
    load_artifact, log_metadata_info, ArtifactMetadata, ArtifactPaths, DeviceType,
    InferenceSettings,
};
use crate::scoring::{score, PredictionResult};

/// A classifier with its weights on one device.
#[derive(Clone)]
struct LoadedModel<B: Backend> {
    model: SpecimenClassifier<B>,
    device: B::Device,
}

impl<B: Backend> LoadedModel<B> {
    fn load(metadata: &ArtifactMetadata, model_binary: Vec<u8>, device: B::Device) -> Result<Self> {
        let config = ClassifierConfig::from_architecture(&metadata.architecture);
        let record = BinBytesRecorder::<FullPrecisionSettings>::default()
            .load(model_binary, &device)
            .map_err(|e| ClassifierError::Model(format!("failed to load weights: {:?}", e)))?;
        let model = config.init::<B>(&device).load_record(record);
        Ok(Self { model, device })
    }

    /// One probability row per image.
    fn probabilities(&self, images: &[NormalizedImage]) -> Result<Vec<Vec<f32>>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let input = images_to_tensor::<B>(images, &self.device);
        let output = self.model.forward_probabilities(input);
        let [_, num_classes] = output.dims();
        let flat = output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ClassifierError::Model(format!("failed to read probabilities: {:?}", e)))?;
        Ok(flat.chunks(num_classes.max(1)).map(<[f32]>::to_vec).collect())
    }
}

#[derive(Clone)]
enum EngineBackend {
    Wgpu(LoadedModel<Wgpu>),
    Cpu(LoadedModel<NdArray>),
}

/// Inference engine: a trained model and the labels it was published with.
///
/// Cheap enough to clone per request; the clone shares nothing mutable.
#[derive(Clone)]
pub struct InferenceEngine {
    backend: EngineBackend,
    labels: LabelVocabulary,
    metadata: ArtifactMetadata,
}

impl InferenceEngine {
    /// Load the model bundle and labels, verifying that they belong together.
    pub fn load(model_path: &Path, labels_path: &Path, device_type: DeviceType) -> Result<Self> {
        let paths = ArtifactPaths {
            model_path: model_path.to_path_buf(),
            labels_path: labels_path.to_path_buf(),
        };
        let (metadata, model_binary, labels) = load_artifact(&paths)?;

        if metadata.architecture.num_classes != labels.len() {
            return Err(ClassifierError::bundle(
                model_path,
                format!(
                    "model has {} outputs but {} labels",
                    metadata.architecture.num_classes,
                    labels.len()
                ),
            ));
        }

        let backend = match device_type {
            DeviceType::Wgpu => EngineBackend::Wgpu(LoadedModel::load(
                &metadata,
                model_binary,
                WgpuDevice::default(),
            )?),
            DeviceType::Cpu => EngineBackend::Cpu(LoadedModel::load(
                &metadata,
                model_binary,
                NdArrayDevice::Cpu,
            )?),
        };

        log_metadata_info(&metadata);
        tracing::info!("Inference engine ready on {}", device_type);
        Ok(Self {
            backend,
            labels,
            metadata,
        })
    }

    pub fn labels(&self) -> &LabelVocabulary {
        &self.labels
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    /// Class probabilities for already normalized images.
    pub fn probabilities(&self, images: &[NormalizedImage]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EngineBackend::Wgpu(model) => model.probabilities(images),
            EngineBackend::Cpu(model) => model.probabilities(images),
        }
    }

    /// Classify a single stored image.
    pub fn classify_image(
        &self,
        image_path: &Path,
        settings: &InferenceSettings,
    ) -> Result<PredictionResult> {
        let image = load_normalized(image_path)?;
        let probabilities = self
            .probabilities(std::slice::from_ref(&image))?
            .pop()
            .ok_or_else(|| ClassifierError::Model("model returned no output".to_string()))?;
        score(&probabilities, &self.labels, settings.unknown_threshold, settings.top_k)
    }
}
