//! Lazy batched loading of training and validation samples.
//!
//! Nothing is decoded until a batch is requested. Each batch is decoded and
//! normalized in parallel on scoped threads, then handed to the trainer.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::dataset::split::Split;
use crate::dataset::vocabulary::LabelVocabulary;
use crate::error::Result;
use crate::imaging::{load_normalized, NormalizedImage};
use crate::model::config::TrainingSettings;
use crate::store::LabeledSample;

/// One sample: image path and class index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineItem {
    pub path: PathBuf,
    pub label: usize,
}

/// A decoded batch. `images[i]` has class `labels[i]`.
#[derive(Debug)]
pub struct LoadedBatch {
    pub images: Vec<NormalizedImage>,
    pub labels: Vec<usize>,
}

impl LoadedBatch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Fixed-size batches over a list of items.
///
/// A shuffling pipeline draws a new item order from its generator at the
/// start of every pass; the generator is seeded once, so the sequence of
/// orders is reproducible across runs.
pub struct SamplePipeline {
    items: Vec<PipelineItem>,
    batch_size: usize,
    num_workers: usize,
    shuffle: Option<StdRng>,
}

impl SamplePipeline {
    /// Pipeline that reshuffles every pass.
    pub fn shuffled(items: Vec<PipelineItem>, batch_size: usize, seed: u64) -> Self {
        Self {
            items,
            batch_size: batch_size.max(1),
            num_workers: 0,
            shuffle: Some(StdRng::seed_from_u64(seed)),
        }
    }

    /// Pipeline that yields items in the order given.
    pub fn ordered(items: Vec<PipelineItem>, batch_size: usize) -> Self {
        Self {
            items,
            batch_size: batch_size.max(1),
            num_workers: 0,
            shuffle: None,
        }
    }

    /// Decode threads per batch; 0 uses every available core.
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn items(&self) -> &[PipelineItem] {
        &self.items
    }

    /// Batches per pass; the last one may be short.
    pub fn num_batches(&self) -> usize {
        self.items.len().div_ceil(self.batch_size)
    }

    /// Start a pass over the items.
    pub fn epoch(&mut self) -> EpochBatches<'_> {
        let mut order: Vec<usize> = (0..self.items.len()).collect();
        if let Some(rng) = self.shuffle.as_mut() {
            order.shuffle(rng);
        }
        EpochBatches {
            items: &self.items,
            order,
            cursor: 0,
            batch_size: self.batch_size,
            num_workers: resolve_workers(self.num_workers),
        }
    }
}

/// One pass over a [`SamplePipeline`]. Yields an error and stops on the
/// first image that fails to decode.
pub struct EpochBatches<'a> {
    items: &'a [PipelineItem],
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    num_workers: usize,
}

impl EpochBatches<'_> {
    /// Item order of this pass.
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

impl Iterator for EpochBatches<'_> {
    type Item = Result<LoadedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch: Vec<&PipelineItem> = self.order[self.cursor..end]
            .iter()
            .map(|&i| &self.items[i])
            .collect();

        let loaded = load_batch(&batch, self.num_workers);
        // A failed batch ends the pass.
        self.cursor = if loaded.is_ok() { end } else { self.order.len() };
        Some(loaded)
    }
}

fn resolve_workers(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Decode `items` on up to `num_workers` scoped threads, keeping item order.
fn load_batch(items: &[&PipelineItem], num_workers: usize) -> Result<LoadedBatch> {
    let labels = items.iter().map(|item| item.label).collect();
    if items.is_empty() {
        return Ok(LoadedBatch {
            images: Vec::new(),
            labels,
        });
    }

    let workers = num_workers.clamp(1, items.len());
    let chunk_size = items.len().div_ceil(workers);

    let decoded: Vec<Result<NormalizedImage>> = std::thread::scope(|scope| {
        let handles: Vec<_> = items
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|item| load_normalized(&item.path))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    });

    let images = decoded.into_iter().collect::<Result<Vec<_>>>()?;
    Ok(LoadedBatch { images, labels })
}

/// Everything a training run needs from its sample set.
pub struct DatasetSplit {
    pub vocabulary: LabelVocabulary,
    pub split: Split,
    pub train: SamplePipeline,
    pub validation: SamplePipeline,
}

/// Derive the vocabulary, split the samples and wrap both halves in
/// pipelines. Samples must already have passed `ensure_trainable`.
pub fn build_split(samples: &[LabeledSample], settings: &TrainingSettings) -> DatasetSplit {
    let vocabulary = LabelVocabulary::from_samples(samples);
    let items: Vec<PipelineItem> = samples
        .iter()
        .map(|sample| PipelineItem {
            path: sample.image_path.clone(),
            // Every sample label is in the vocabulary built from the same set.
            label: vocabulary.index_of(&sample.human_label).unwrap_or_default(),
        })
        .collect();

    let split = Split::new(items.len(), settings.seed, settings.validation_fraction);
    let pick = |indices: &[usize]| -> Vec<PipelineItem> {
        indices.iter().map(|&i| items[i].clone()).collect()
    };

    let train = SamplePipeline::shuffled(pick(&split.train), settings.batch_size, settings.seed)
        .with_workers(settings.num_workers);
    let validation = SamplePipeline::ordered(pick(&split.validation), settings.batch_size)
        .with_workers(settings.num_workers);

    tracing::info!(
        "Dataset: {} classes, {} training / {} validation samples",
        vocabulary.len(),
        train.len(),
        validation.len()
    );

    DatasetSplit {
        vocabulary,
        split,
        train,
        validation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClassifierError;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    fn write_image(dir: &Path, name: &str, value: u8, size: u32) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(size, size, Rgb([value, value, value]))
            .save(&path)
            .unwrap();
        path
    }

    fn items(n: usize) -> Vec<PipelineItem> {
        (0..n)
            .map(|i| PipelineItem {
                path: PathBuf::from(format!("/img/{i}.png")),
                label: i % 3,
            })
            .collect()
    }

    #[test]
    fn test_batch_count_rounds_up() {
        assert_eq!(SamplePipeline::ordered(items(33), 16).num_batches(), 3);
        assert_eq!(SamplePipeline::ordered(items(32), 16).num_batches(), 2);
        assert_eq!(SamplePipeline::ordered(items(0), 16).num_batches(), 0);
    }

    #[test]
    fn test_ordered_pipeline_keeps_order() {
        let mut pipeline = SamplePipeline::ordered(items(5), 2);
        let first = pipeline.epoch().order().to_vec();
        let second = pipeline.epoch().order().to_vec();
        assert_eq!(first, vec![0, 1, 2, 3, 4]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_shuffled_pipeline_reshuffles_each_pass_reproducibly() {
        let mut a = SamplePipeline::shuffled(items(64), 16, 1337);
        let mut b = SamplePipeline::shuffled(items(64), 16, 1337);

        let a1 = a.epoch().order().to_vec();
        let a2 = a.epoch().order().to_vec();
        assert_ne!(a1, a2);

        assert_eq!(a1, b.epoch().order().to_vec());
        assert_eq!(a2, b.epoch().order().to_vec());

        let mut sorted = a1.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn test_batches_decode_lazily_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let items: Vec<PipelineItem> = (0..5u8)
            .map(|i| PipelineItem {
                path: write_image(dir.path(), &format!("{i}.png"), i * 40, 32),
                label: usize::from(i % 2),
            })
            .collect();

        let mut pipeline = SamplePipeline::ordered(items, 2).with_workers(2);
        let batches: Vec<LoadedBatch> = pipeline.epoch().collect::<Result<_>>().unwrap();

        assert_eq!(batches.iter().map(LoadedBatch::len).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert_eq!(batches[0].labels, vec![0, 1]);
        assert_eq!(batches[2].labels, vec![0]);

        let first = batches[0].images[0].as_rgb();
        assert_eq!(first.dimensions(), (224, 224));
        assert_eq!(batches[1].images[1].as_rgb().get_pixel(0, 0), &Rgb([120, 120, 120]));
    }

    #[test]
    fn test_decode_failure_ends_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_image(dir.path(), "good.png", 10, 8);
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"not an image").unwrap();

        let items = vec![
            PipelineItem { path: good.clone(), label: 0 },
            PipelineItem { path: bad.clone(), label: 1 },
            PipelineItem { path: good, label: 0 },
        ];
        let mut pipeline = SamplePipeline::ordered(items, 1);
        let results: Vec<Result<LoadedBatch>> = pipeline.epoch().collect();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(ClassifierError::Decode { path, .. }) => assert_eq!(path, &bad),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_build_split_maps_labels_to_vocabulary() {
        let samples: Vec<LabeledSample> = (0..12)
            .map(|i| {
                let label = if i % 2 == 0 { "rods" } else { "cocci" };
                LabeledSample::new(format!("/img/{i}.png"), label)
            })
            .collect();
        let settings = TrainingSettings::default();

        let split = build_split(&samples, &settings);
        assert_eq!(split.vocabulary.labels(), ["cocci", "rods"]);
        assert_eq!(split.validation.len(), 2);
        assert_eq!(split.train.len(), 10);

        for (item, &index) in split.validation.items().iter().zip(&split.split.validation) {
            assert_eq!(item.path, samples[index].image_path);
            let expected = split.vocabulary.index_of(&samples[index].human_label).unwrap();
            assert_eq!(item.label, expected);
        }
    }
}
