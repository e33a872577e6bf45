//! Decoded input images, tagged by how they must be normalized.

use std::io::Cursor;

use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::{
    AnimationDecoder, ColorType, DynamicImage, ImageDecoder, ImageFormat, ImageResult, RgbImage,
};

/// A decoded image before normalization.
///
/// Each variant maps to exactly one normalization path, so adding an encoding
/// means adding a variant rather than another mode check.
#[derive(Debug, Clone)]
pub enum SourceImage {
    /// Already canonical: 8 bits per channel, RGB.
    Rgb8(RgbImage),
    /// 8-bit but not RGB (grey, grey+alpha, RGBA, expanded palettes).
    Other8(DynamicImage),
    /// More than 8 bits per sample (16-bit integer or 32-bit float).
    Deep(DeepImage),
    /// Animation or multi-page container; only the first frame is used.
    MultiFrame { first: Box<SourceImage> },
}

impl SourceImage {
    /// Tag a single decoded frame by its pixel layout.
    pub fn from_dynamic(img: DynamicImage) -> Self {
        match img {
            DynamicImage::ImageRgb8(rgb) => Self::Rgb8(rgb),
            DynamicImage::ImageLuma8(_)
            | DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageRgba8(_) => Self::Other8(img),
            DynamicImage::ImageLuma16(buf) => {
                let (width, height) = buf.dimensions();
                Self::Deep(DeepImage::from_samples(
                    width,
                    height,
                    1,
                    buf.as_raw().iter().map(|&v| f32::from(v)).collect(),
                ))
            }
            DynamicImage::ImageLumaA16(buf) => {
                let (width, height) = buf.dimensions();
                Self::Deep(DeepImage::from_samples(
                    width,
                    height,
                    1,
                    strip_alpha(buf.as_raw(), 2, |v| f32::from(v)),
                ))
            }
            DynamicImage::ImageRgb16(buf) => {
                let (width, height) = buf.dimensions();
                Self::Deep(DeepImage::from_samples(
                    width,
                    height,
                    3,
                    buf.as_raw().iter().map(|&v| f32::from(v)).collect(),
                ))
            }
            DynamicImage::ImageRgba16(buf) => {
                let (width, height) = buf.dimensions();
                Self::Deep(DeepImage::from_samples(
                    width,
                    height,
                    3,
                    strip_alpha(buf.as_raw(), 4, |v| f32::from(v)),
                ))
            }
            DynamicImage::ImageRgb32F(buf) => {
                let (width, height) = buf.dimensions();
                Self::Deep(DeepImage::from_samples(width, height, 3, buf.into_raw()))
            }
            DynamicImage::ImageRgba32F(buf) => {
                let (width, height) = buf.dimensions();
                Self::Deep(DeepImage::from_samples(
                    width,
                    height,
                    3,
                    strip_alpha(buf.as_raw(), 4, |v| v),
                ))
            }
            other => Self::Other8(other),
        }
    }

    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rgb8(_) => "rgb8",
            Self::Other8(_) => "other8",
            Self::Deep(_) => "deep",
            Self::MultiFrame { .. } => "multi-frame",
        }
    }
}

fn strip_alpha<T: Copy>(raw: &[T], stride: usize, to_f32: impl Fn(T) -> f32) -> Vec<f32> {
    raw.chunks_exact(stride)
        .flat_map(|px| px[..stride - 1].iter().map(|&v| to_f32(v)).collect::<Vec<_>>())
        .collect()
}

/// High bit-depth raster with alpha removed, samples widened to `f32`.
#[derive(Debug, Clone)]
pub struct DeepImage {
    pub width: u32,
    pub height: u32,
    /// Colour channels per pixel: 1 (grey) or 3 (RGB).
    pub channels: usize,
    pub samples: Vec<f32>,
}

impl DeepImage {
    pub fn from_samples(width: u32, height: u32, channels: usize, samples: Vec<f32>) -> Self {
        Self {
            width,
            height,
            channels,
            samples,
        }
    }

    /// Observed sample range, ignoring NaNs. `None` for an empty raster.
    pub fn sample_range(&self) -> Option<(f32, f32)> {
        self.samples
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Decode raw bytes into a tagged [`SourceImage`].
///
/// The container is sniffed from the bytes, falling back to `format_hint`.
/// Animated PNG/WebP/GIF and multi-page TIFF are tagged as
/// [`SourceImage::MultiFrame`]. If frame extraction fails the image is decoded
/// again as a plain single-frame image instead of failing.
pub fn decode_source(bytes: &[u8], format_hint: Option<ImageFormat>) -> ImageResult<SourceImage> {
    let format = match image::guess_format(bytes) {
        Ok(format) => format,
        Err(err) => format_hint.ok_or(err)?,
    };

    match first_frame(bytes, format) {
        Ok(Some(first)) => {
            return Ok(SourceImage::MultiFrame {
                first: Box::new(first),
            })
        }
        Ok(None) => {}
        Err(err) => {
            tracing::warn!("Frame extraction failed, decoding as single frame: {}", err);
        }
    }

    let img = image::load_from_memory_with_format(bytes, format)?;
    Ok(SourceImage::from_dynamic(img))
}

/// First frame of a multi-frame container, or `None` for single-frame images.
fn first_frame(bytes: &[u8], format: ImageFormat) -> ImageResult<Option<SourceImage>> {
    match format {
        ImageFormat::Png => {
            let decoder = PngDecoder::new(Cursor::new(bytes))?;
            if !decoder.is_apng()? {
                return Ok(None);
            }
            if is_deep(decoder.color_type()) {
                // Animation frames are RGBA8; the default image keeps 16-bit samples.
                let img = DynamicImage::from_decoder(decoder)?;
                return Ok(Some(SourceImage::from_dynamic(img)));
            }
            take_first(decoder.apng()?.into_frames())
        }
        ImageFormat::WebP => {
            let decoder = WebPDecoder::new(Cursor::new(bytes))?;
            if !decoder.has_animation() {
                return Ok(None);
            }
            take_first(decoder.into_frames())
        }
        ImageFormat::Gif => {
            let decoder = GifDecoder::new(Cursor::new(bytes))?;
            take_first(decoder.into_frames())
        }
        ImageFormat::Tiff => {
            if !tiff_has_more_pages(bytes) {
                return Ok(None);
            }
            // The TIFF decoder reads the first page only.
            let img = image::load_from_memory_with_format(bytes, ImageFormat::Tiff)?;
            Ok(Some(SourceImage::from_dynamic(img)))
        }
        _ => Ok(None),
    }
}

fn is_deep(color: ColorType) -> bool {
    color.bytes_per_pixel() > color.channel_count()
}

fn take_first(mut frames: image::Frames<'_>) -> ImageResult<Option<SourceImage>> {
    match frames.next() {
        Some(frame) => {
            let rgba = frame?.into_buffer();
            Ok(Some(SourceImage::from_dynamic(DynamicImage::ImageRgba8(rgba))))
        }
        None => Ok(None),
    }
}

/// Whether a TIFF holds more than one page. Unreadable files count as single-page.
fn tiff_has_more_pages(bytes: &[u8]) -> bool {
    match tiff::decoder::Decoder::new(Cursor::new(bytes)) {
        Ok(decoder) => decoder.more_images(),
        Err(_) => false,
    }
}
