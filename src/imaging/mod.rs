//! Image normalization: every encoding in, 8-bit RGB out.

pub mod container;
pub mod normalize;
pub mod source_image;

pub use container::{normalize_in_place, Container, DEFAULT_JPEG_QUALITY};
pub use normalize::{
    load_normalized, normalize, normalize_for_model, NormalizedImage, IMAGE_SIZE, RESAMPLE_FILTER,
};
pub use source_image::{decode_source, DeepImage, SourceImage};
