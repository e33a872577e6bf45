//! Pretrained convolutional feature extractor.
//!
//! The extractor is never trained here. Its weights come from a record file
//! produced elsewhere and are frozen before the classification head is fit.

use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d, Relu,
    },
    record::{DefaultFileRecorder, FullPrecisionSettings},
    tensor::{backend::Backend, Tensor},
};

use crate::error::{ClassifierError, Result};

/// Extension `DefaultFileRecorder` appends to every record path.
const RECORD_EXTENSION: &str = "mpk";

/// Feature extractor configuration
#[derive(Config, Debug)]
pub struct FeatureExtractorConfig {
    /// Output channels of each block; each block halves the resolution
    #[config(default = "vec![32, 64, 128, 256]")]
    pub channels: Vec<usize>,
}

impl FeatureExtractorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FeatureExtractor<B> {
        let mut in_channels = 3;
        let blocks = self
            .channels
            .iter()
            .map(|&out_channels| {
                let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device);
                in_channels = out_channels;
                conv
            })
            .collect();

        FeatureExtractor {
            blocks,
            activation: Relu::new(),
        }
    }

    /// Channels of the final feature map.
    pub fn out_channels(&self) -> usize {
        self.channels.last().copied().unwrap_or(3)
    }
}

/// Stack of 3x3 stride-2 convolutions, each followed by ReLU.
///
/// Input `[N, 3, H, W]`, output `[N, C, H / 2^k, W / 2^k]` for `k` blocks.
#[derive(Module, Debug)]
pub struct FeatureExtractor<B: Backend> {
    blocks: Vec<Conv2d<B>>,
    activation: Relu,
}

impl<B: Backend> FeatureExtractor<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(images, |x, conv| {
            self.activation.forward(conv.forward(x))
        })
    }

    /// Load pretrained weights and freeze them.
    pub fn load_pretrained(
        config: &FeatureExtractorConfig,
        weights: &Path,
        device: &B::Device,
    ) -> Result<Self> {
        let recorder = DefaultFileRecorder::<FullPrecisionSettings>::new();
        let file = weights.with_extension(RECORD_EXTENSION);
        if !file.exists() {
            return Err(ClassifierError::MissingBackbone(file));
        }

        let extractor = config
            .init::<B>(device)
            .load_file(weights.to_path_buf(), &recorder, device)
            .map_err(|e| ClassifierError::Model(format!("backbone {}: {:?}", file.display(), e)))?;

        tracing::info!(
            "Loaded backbone {} ({} parameters, frozen)",
            file.display(),
            extractor.num_params()
        );
        Ok(extractor.no_grad())
    }

    /// Write the weights as a record `load_pretrained` accepts.
    pub fn save_pretrained(self, weights: &Path) -> Result<PathBuf> {
        let recorder = DefaultFileRecorder::<FullPrecisionSettings>::new();
        let file = weights.with_extension(RECORD_EXTENSION);
        if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ClassifierError::io(parent, e))?;
        }
        self.save_file(weights.to_path_buf(), &recorder)
            .map_err(|e| ClassifierError::Model(format!("backbone {}: {:?}", file.display(), e)))?;
        Ok(file)
    }
}
