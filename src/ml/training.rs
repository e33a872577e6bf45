//! Fine-tuning the classification head on curated samples.

use std::collections::BTreeMap;
use std::path::PathBuf;

use burn::{
    data::dataloader::batcher::Batcher,
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::{Wgpu, WgpuDevice};
use serde::{Deserialize, Serialize};

use crate::dataset::{build_split, DatasetSplit, LoadedBatch, SamplePipeline};
use crate::error::{ClassifierError, Result};
use crate::imaging::NormalizedImage;
use crate::ml::backbone::FeatureExtractor;
use crate::ml::ml_model::{images_to_tensor, ClassifierConfig, SpecimenClassifier};
use crate::model::{publish_artifact, AppConfig, ArtifactMetadata, DeviceType};
use crate::store::{ensure_trainable, fetch_labeled_samples, LabeledSample, RecordStore};

/// Builds device tensors from decoded images.
#[derive(Clone)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Tensors for a batch produced by a [`SamplePipeline`].
    pub fn batch_loaded(&self, loaded: LoadedBatch) -> ImageBatch<B> {
        let items = loaded.images.into_iter().zip(loaded.labels).collect();
        self.batch(items, &self.device)
    }
}

impl<B: Backend> Batcher<B, (NormalizedImage, usize), ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<(NormalizedImage, usize)>, device: &B::Device) -> ImageBatch<B> {
        let (images, labels): (Vec<NormalizedImage>, Vec<usize>) = items.into_iter().unzip();
        let targets: Vec<i64> = labels.iter().map(|&label| label as i64).collect();

        ImageBatch {
            images: images_to_tensor(&images, device),
            targets: Tensor::<B, 1, Int>::from_ints(targets.as_slice(), device),
        }
    }
}

/// Batch data
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// Mean loss and accuracy of the last epoch, on both halves of the split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

impl EpochMetrics {
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("loss".to_string(), self.loss),
            ("accuracy".to_string(), self.accuracy),
            ("val_loss".to_string(), self.val_loss),
            ("val_accuracy".to_string(), self.val_accuracy),
        ])
    }
}

/// Result of a completed training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub sample_count: usize,
    pub classes: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
}

#[derive(Default)]
struct RunningMean {
    loss_sum: f64,
    correct: usize,
    seen: usize,
}

impl RunningMean {
    fn add(&mut self, batch_loss: f64, correct: usize, batch_len: usize) {
        self.loss_sum += batch_loss * batch_len as f64;
        self.correct += correct;
        self.seen += batch_len;
    }

    fn loss(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.loss_sum / self.seen as f64
        }
    }

    fn accuracy(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.correct as f64 / self.seen as f64
        }
    }
}

fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let predicted = logits.argmax(1).flatten::<1>(0, 1);
    let correct = predicted.equal(targets).int().sum().into_scalar().elem::<i64>();
    correct.max(0) as usize
}

fn evaluate<B: Backend>(
    model: &SpecimenClassifier<B>,
    pipeline: &mut SamplePipeline,
    device: &B::Device,
) -> Result<RunningMean> {
    let batcher = ImageBatcher::<B>::new(device.clone());
    let mut running = RunningMean::default();
    for loaded in pipeline.epoch() {
        let loaded = loaded?;
        let batch_len = loaded.len();
        let batch = batcher.batch_loaded(loaded);
        let output = model.forward_classification(batch.images, batch.targets);
        let loss = output.loss.into_scalar().elem::<f64>();
        running.add(loss, count_correct(output.output, output.targets), batch_len);
    }
    Ok(running)
}

/// Fit `model` on the training pipeline for `num_epochs`, validating after
/// each epoch. Returns the trained model and the last epoch's metrics.
///
/// Any batch that fails to decode aborts the run.
pub fn fit<B: AutodiffBackend>(
    mut model: SpecimenClassifier<B>,
    train: &mut SamplePipeline,
    validation: &mut SamplePipeline,
    num_epochs: usize,
    learning_rate: f64,
    device: &B::Device,
) -> Result<(SpecimenClassifier<B>, EpochMetrics)> {
    let mut optim = AdamConfig::new().init::<B, SpecimenClassifier<B>>();
    let batcher = ImageBatcher::<B>::new(device.clone());
    let mut metrics = EpochMetrics {
        loss: 0.0,
        accuracy: 0.0,
        val_loss: 0.0,
        val_accuracy: 0.0,
    };

    for epoch in 1..=num_epochs {
        let mut running = RunningMean::default();
        for loaded in train.epoch() {
            let loaded = loaded?;
            let batch_len = loaded.len();
            let batch = batcher.batch_loaded(loaded);

            let output = model.forward_classification(batch.images, batch.targets);
            let loss = output.loss.clone().into_scalar().elem::<f64>();
            running.add(loss, count_correct(output.output, output.targets), batch_len);

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(learning_rate, model, grads);
        }

        let valid = evaluate(&model.valid(), validation, device)?;
        metrics = EpochMetrics {
            loss: running.loss(),
            accuracy: running.accuracy(),
            val_loss: valid.loss(),
            val_accuracy: valid.accuracy(),
        };
        tracing::info!(
            "Epoch {}/{}: loss={:.4} accuracy={:.4} val_loss={:.4} val_accuracy={:.4}",
            epoch,
            num_epochs,
            metrics.loss,
            metrics.accuracy,
            metrics.val_loss,
            metrics.val_accuracy
        );
    }

    Ok((model, metrics))
}

/// Serialize a model's weights for the bundle.
pub fn encode_weights<B: Backend>(model: SpecimenClassifier<B>) -> Result<Vec<u8>> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.into_record(), ())
        .map_err(|e| ClassifierError::Model(format!("failed to serialize weights: {:?}", e)))
}

fn train_with_backend<B: AutodiffBackend>(
    config: &AppConfig,
    classifier: &ClassifierConfig,
    dataset: &mut DatasetSplit,
    device: &B::Device,
) -> Result<(Vec<u8>, EpochMetrics)> {
    let backbone = FeatureExtractor::<B>::load_pretrained(
        &classifier.backbone(),
        &config.paths.backbone_weights,
        device,
    )?;
    let model = classifier.init_with_backbone(backbone, device);

    let (model, metrics) = fit(
        model,
        &mut dataset.train,
        &mut dataset.validation,
        config.training.num_epochs,
        config.training.learning_rate,
        device,
    )?;
    Ok((encode_weights(model.valid())?, metrics))
}

/// Train on an already fetched sample set and publish the artifact.
///
/// Nothing is written unless every epoch completes.
pub fn train_and_publish(config: &AppConfig, samples: &[LabeledSample]) -> Result<TrainingSummary> {
    let settings = &config.training;
    ensure_trainable(samples, settings.min_samples, settings.min_classes)?;

    let mut dataset = build_split(samples, settings);
    let classifier = ClassifierConfig::new(dataset.vocabulary.len())
        .with_dropout(settings.dropout)
        .with_backbone_channels(settings.backbone_channels.clone());

    tracing::info!(
        "Training on {} ({} epochs, batch {}, lr {})",
        config.device_type,
        settings.num_epochs,
        settings.batch_size,
        settings.learning_rate
    );

    let (weights, metrics) = match config.device_type {
        DeviceType::Wgpu => train_with_backend::<Autodiff<Wgpu>>(
            config,
            &classifier,
            &mut dataset,
            &WgpuDevice::default(),
        )?,
        DeviceType::Cpu => train_with_backend::<Autodiff<NdArray>>(
            config,
            &classifier,
            &mut dataset,
            &NdArrayDevice::Cpu,
        )?,
    };

    let metadata = ArtifactMetadata::new(
        classifier.architecture(),
        &dataset.vocabulary,
        metrics.to_map(),
        samples.len(),
        settings.num_epochs,
    );
    let paths = publish_artifact(&config.paths.artifact_paths(), &metadata, &weights)?;

    Ok(TrainingSummary {
        sample_count: samples.len(),
        classes: dataset.vocabulary.into_inner(),
        metrics: metadata.metrics,
        model_path: paths.model_path,
        labels_path: paths.labels_path,
    })
}

/// Full training run: read curated samples from `store`, fit, publish.
pub fn train_from_store(config: &AppConfig, store: &dyn RecordStore) -> Result<TrainingSummary> {
    let samples = fetch_labeled_samples(store)?;
    train_and_publish(config, &samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::PipelineItem;
    use crate::imaging::{normalize_for_model, SourceImage, IMAGE_SIZE};
    use crate::ml::FeatureExtractorConfig;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    type TestBackend = NdArray<f32>;

    fn image(value: u8) -> NormalizedImage {
        normalize_for_model(SourceImage::Rgb8(RgbImage::from_pixel(
            IMAGE_SIZE,
            IMAGE_SIZE,
            Rgb([value; 3]),
        )))
    }

    #[test]
    fn test_batcher_shapes() {
        let batcher = ImageBatcher::<TestBackend>::new(NdArrayDevice::Cpu);
        let batch = batcher.batch_loaded(LoadedBatch {
            images: vec![image(0), image(255), image(128)],
            labels: vec![2, 0, 1],
        });

        assert_eq!(batch.images.dims(), [3, 3, 224, 224]);
        assert_eq!(batch.targets.into_data().to_vec::<i64>().unwrap(), vec![2, 0, 1]);
    }

    #[test]
    fn test_count_correct() {
        let device = NdArrayDevice::Cpu;
        let logits =
            Tensor::<TestBackend, 2>::from_floats([[0.9, 0.1], [0.2, 0.8], [0.6, 0.4]], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 1, 1], &device);
        assert_eq!(count_correct(logits, targets), 2);
    }

    #[test]
    fn test_running_mean_weights_by_batch() {
        let mut running = RunningMean::default();
        running.add(1.0, 4, 4);
        running.add(4.0, 0, 2);
        assert!((running.loss() - 2.0).abs() < 1e-9);
        assert!((running.accuracy() - 4.0 / 6.0).abs() < 1e-9);
        assert_eq!(RunningMean::default().loss(), 0.0);
    }

    #[test]
    fn test_insufficient_data_is_rejected_before_training() {
        let samples: Vec<LabeledSample> = (0..9)
            .map(|i| {
                let label = if i % 2 == 0 { "a" } else { "b" };
                LabeledSample::new(format!("/img/{i}.png"), label)
            })
            .collect();
        let err = train_and_publish(&AppConfig::default(), &samples).unwrap_err();
        assert!(matches!(err, ClassifierError::InsufficientData { found: 9, .. }));
    }

    #[test]
    fn test_missing_backbone_aborts_without_publishing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.device_type = DeviceType::Cpu;
        config.paths.models_dir = dir.path().join("models");
        config.paths.backbone_weights = dir.path().join("absent.mpk");

        let samples: Vec<LabeledSample> = (0..10)
            .map(|i| LabeledSample::new(format!("/img/{i}.png"), if i < 5 { "a" } else { "b" }))
            .collect();
        let err = train_and_publish(&config, &samples).unwrap_err();
        assert!(matches!(err, ClassifierError::MissingBackbone(_)));
        assert!(!config.paths.model_path().exists());
        assert!(!config.paths.labels_path().exists());
    }

    fn write_items(dir: &Path, count: usize) -> Vec<PipelineItem> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("{i}.png"));
                let color = if i % 2 == 0 { Rgb([220, 30, 30]) } else { Rgb([30, 30, 220]) };
                RgbImage::from_pixel(16, 16, color).save(&path).unwrap();
                PipelineItem { path, label: i % 2 }
            })
            .collect()
    }

    fn values<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_fit_leaves_backbone_weights_unchanged() {
        type TrainBackend = Autodiff<TestBackend>;
        let device = NdArrayDevice::Cpu;
        let dir = tempfile::tempdir().unwrap();
        let items = write_items(dir.path(), 6);
        let mut train = SamplePipeline::shuffled(items.clone(), 2, 7);
        let mut validation = SamplePipeline::ordered(items, 2);

        let extractor = FeatureExtractorConfig::new()
            .with_channels(vec![4])
            .init::<TrainBackend>(&device)
            .no_grad();
        let model = ClassifierConfig::new(2)
            .with_backbone_channels(vec![4])
            .init_with_backbone(extractor, &device);

        let input = images_to_tensor::<TestBackend>(&[image(40), image(200)], &device);
        let before = model.valid();
        let features_before = values(before.backbone().forward(input.clone()));
        let logits_before = values(before.forward(input.clone()));

        let (trained, metrics) = fit(model, &mut train, &mut validation, 3, 0.1, &device).unwrap();
        assert!(metrics.loss.is_finite());

        let after = trained.valid();
        assert_eq!(values(after.backbone().forward(input.clone())), features_before);
        assert_ne!(values(after.forward(input)), logits_before);
    }

    #[test]
    fn test_fit_stops_at_undecodable_image() {
        type TrainBackend = Autodiff<TestBackend>;
        let device = NdArrayDevice::Cpu;
        let dir = tempfile::tempdir().unwrap();
        let mut items = write_items(dir.path(), 4);
        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"not an image").unwrap();
        items.push(PipelineItem { path: broken, label: 0 });

        let mut train = SamplePipeline::ordered(items.clone(), 2);
        let mut validation = SamplePipeline::ordered(items, 2);
        let model = ClassifierConfig::new(2)
            .with_backbone_channels(vec![4])
            .init::<TrainBackend>(&device);

        let err = fit(model, &mut train, &mut validation, 1, 1e-3, &device).unwrap_err();
        assert!(matches!(err, ClassifierError::Decode { .. }));
    }
}
