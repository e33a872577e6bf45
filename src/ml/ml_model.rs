//! Classification model
//!
//! A frozen pretrained feature extractor followed by a small trainable head.

use burn::{
    config::Config,
    module::Module,
    nn::{
        loss::CrossEntropyLossConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};

use crate::imaging::{NormalizedImage, IMAGE_SIZE};
use crate::ml::backbone::{FeatureExtractor, FeatureExtractorConfig};
use crate::model::ModelArchitecture;

/// ImageNet channel means, on the 0-1 scale
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations, on the 0-1 scale
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Model configuration
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    /// Number of output classes
    pub num_classes: usize,
    /// Dropout rate before the classification layer
    #[config(default = 0.2)]
    pub dropout: f64,
    /// Output channels of each feature extractor block
    #[config(default = "vec![32, 64, 128, 256]")]
    pub backbone_channels: Vec<usize>,
}

impl ClassifierConfig {
    pub fn from_architecture(architecture: &ModelArchitecture) -> Self {
        Self::new(architecture.num_classes)
            .with_dropout(architecture.dropout)
            .with_backbone_channels(architecture.backbone_channels.clone())
    }

    pub fn architecture(&self) -> ModelArchitecture {
        ModelArchitecture {
            backbone_channels: self.backbone_channels.clone(),
            num_classes: self.num_classes,
            dropout: self.dropout,
        }
    }

    pub fn backbone(&self) -> FeatureExtractorConfig {
        FeatureExtractorConfig::new().with_channels(self.backbone_channels.clone())
    }

    /// Fresh model; the caller loads a record into it.
    pub fn init<B: Backend>(&self, device: &B::Device) -> SpecimenClassifier<B> {
        self.init_with_backbone(self.backbone().init(device), device)
    }

    /// Model around an already loaded (and frozen) feature extractor.
    pub fn init_with_backbone<B: Backend>(
        &self,
        backbone: FeatureExtractor<B>,
        device: &B::Device,
    ) -> SpecimenClassifier<B> {
        let features = self.backbone().out_channels();
        tracing::debug!(
            "Classifier: backbone {:?} -> GAP -> dropout({}) -> linear {} -> {}",
            self.backbone_channels,
            self.dropout,
            features,
            self.num_classes
        );

        SpecimenClassifier {
            backbone,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            head: LinearConfig::new(features, self.num_classes).init(device),
        }
    }
}

/// Image classifier
///
/// # Architecture
/// - ImageNet mean/std normalization of 0-255 input
/// - Feature extractor (frozen, gradients stop at its output)
/// - Global average pooling
/// - Dropout
/// - Linear: features -> num_classes
/// - Softmax (probabilities only)
#[derive(Module, Debug)]
pub struct SpecimenClassifier<B: Backend> {
    backbone: FeatureExtractor<B>,
    pool: AdaptiveAvgPool2d,
    dropout: Dropout,
    head: Linear<B>,
}

impl<B: Backend> SpecimenClassifier<B> {
    pub fn backbone(&self) -> &FeatureExtractor<B> {
        &self.backbone
    }

    /// Forward pass
    ///
    /// # Arguments
    /// - `images`: raw 0-255 batch `[batch_size, 3, 224, 224]`
    ///
    /// # Returns
    /// - Class logits `[batch_size, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let device = images.device();
        let mean = Tensor::<B, 1>::from_floats(IMAGENET_MEAN, &device).reshape([1, 3, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(IMAGENET_STD, &device).reshape([1, 3, 1, 1]);
        let x = images.div_scalar(255.0).sub(mean).div(std);

        let features = self.backbone.forward(x).detach();

        let x = self.pool.forward(features);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);
        let x = self.dropout.forward(x);
        self.head.forward(x)
    }

    /// Class probabilities `[batch_size, num_classes]`; rows sum to 1.
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// Forward pass and sparse categorical cross-entropy.
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

/// Stack normalized images into one `[N, 3, 224, 224]` tensor, transferred
/// to the device in a single copy.
pub fn images_to_tensor<B: Backend>(
    images: &[NormalizedImage],
    device: &B::Device,
) -> Tensor<B, 4> {
    let size = IMAGE_SIZE as usize;
    let mut pixels = Vec::with_capacity(images.len() * 3 * size * size);
    for image in images {
        pixels.extend(image.to_chw_floats());
    }
    Tensor::<B, 1>::from_floats(pixels.as_slice(), device).reshape([images.len(), 3, size, size])
}
