//! Conversion of any [`SourceImage`] into the canonical 8-bit RGB raster.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};

use crate::error::{ClassifierError, Result};
use crate::imaging::source_image::{decode_source, DeepImage, SourceImage};

/// Side length of the square model input.
pub const IMAGE_SIZE: u32 = 224;

/// Resampling filter for every resize feeding the model. Training and
/// inference must agree on it.
pub const RESAMPLE_FILTER: FilterType = FilterType::CatmullRom;

/// Denominator guard for the 16-bit stretch when min == max.
const STRETCH_EPSILON: f32 = 1e-6;

/// Convert a decoded image into 8-bit RGB, keeping its size.
///
/// - multi-frame: the first frame is normalized
/// - deep (16-bit / float): linear stretch of the observed [min, max] to [0, 255]
/// - other 8-bit layouts: converted to RGB, alpha dropped
pub fn normalize(source: SourceImage) -> RgbImage {
    match source {
        SourceImage::Rgb8(img) => img,
        SourceImage::Other8(img) => img.to_rgb8(),
        SourceImage::Deep(img) => stretch_to_rgb8(&img),
        SourceImage::MultiFrame { first } => normalize(*first),
    }
}

/// Linearly rescale the per-image sample range to [0, 255].
///
/// Values are truncated toward zero, so only the maximum of a wide range
/// reaches 255.
pub fn stretch_to_rgb8(img: &DeepImage) -> RgbImage {
    let (lo, hi) = img.sample_range().unwrap_or((0.0, 0.0));
    let denom = hi - lo + STRETCH_EPSILON;
    let to_u8 = |v: f32| (255.0 * (v - lo) / denom).clamp(0.0, 255.0) as u8;

    let pixel_count = (img.width as usize) * (img.height as usize);
    let mut raw = Vec::with_capacity(pixel_count * 3);
    match img.channels {
        1 => {
            for &v in img.samples.iter().take(pixel_count) {
                let g = to_u8(v);
                raw.extend_from_slice(&[g, g, g]);
            }
        }
        _ => {
            for px in img.samples.chunks_exact(img.channels).take(pixel_count) {
                raw.extend_from_slice(&[to_u8(px[0]), to_u8(px[1]), to_u8(px[2])]);
            }
        }
    }
    raw.resize(pixel_count * 3, 0);

    // Length matches width * height * 3 by construction.
    RgbImage::from_raw(img.width, img.height, raw)
        .unwrap_or_else(|| RgbImage::new(img.width, img.height))
}

/// A 224×224 RGB raster, the only image shape the model ever sees.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage(RgbImage);

impl NormalizedImage {
    pub fn as_rgb(&self) -> &RgbImage {
        &self.0
    }

    /// Raw 0-255 channel values in CHW order, as the model input expects.
    pub fn to_chw_floats(&self) -> Vec<f32> {
        let (width, height) = self.0.dimensions();
        let mut data = Vec::with_capacity(3 * (width * height) as usize);
        for channel in 0..3 {
            for y in 0..height {
                for x in 0..width {
                    data.push(f32::from(self.0.get_pixel(x, y)[channel]));
                }
            }
        }
        data
    }
}

/// Normalize and resize to the model input resolution.
pub fn normalize_for_model(source: SourceImage) -> NormalizedImage {
    let rgb = normalize(source);
    if rgb.dimensions() == (IMAGE_SIZE, IMAGE_SIZE) {
        return NormalizedImage(rgb);
    }
    NormalizedImage(imageops::resize(&rgb, IMAGE_SIZE, IMAGE_SIZE, RESAMPLE_FILTER))
}

/// Decode a file from disk and normalize it for the model.
pub fn load_normalized(path: &Path) -> Result<NormalizedImage> {
    let bytes = std::fs::read(path).map_err(|e| ClassifierError::decode(path, e))?;
    let hint = ImageFormat::from_path(path).ok();
    let source = decode_source(&bytes, hint).map_err(|e| ClassifierError::decode(path, e))?;
    tracing::trace!("Decoded {} as {}", path.display(), source.kind());
    Ok(normalize_for_model(source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, Luma, LumaA, Rgb};

    fn gradient_rgb(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn test_rgb8_is_untouched() {
        let img = gradient_rgb(31, 17);
        let out = normalize(SourceImage::Rgb8(img.clone()));
        assert_eq!(out, img);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize(SourceImage::from_dynamic(DynamicImage::ImageRgb8(
            gradient_rgb(40, 40),
        )));
        let twice = normalize(SourceImage::from_dynamic(DynamicImage::ImageRgb8(
            once.clone(),
        )));
        assert_eq!(once, twice);

        let model_once = normalize_for_model(SourceImage::Rgb8(gradient_rgb(300, 200)));
        let model_twice = normalize_for_model(SourceImage::Rgb8(model_once.as_rgb().clone()));
        assert_eq!(model_once, model_twice);
    }

    #[test]
    fn test_sixteen_bit_stretch_uses_observed_range() {
        let buf: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(3, 1, |x, _| Luma([1000 + 1000 * x as u16]));
        let out = normalize(SourceImage::from_dynamic(DynamicImage::ImageLuma16(buf)));

        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([127, 127, 127]));
        assert_eq!(out.get_pixel(2, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_flat_sixteen_bit_image_does_not_divide_by_zero() {
        let buf: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_pixel(4, 4, Luma([4242]));
        let out = normalize(SourceImage::from_dynamic(DynamicImage::ImageLuma16(buf)));
        assert!(out.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_grey_with_alpha_becomes_rgb() {
        let buf: ImageBuffer<LumaA<u8>, Vec<u8>> = ImageBuffer::from_pixel(2, 2, LumaA([90, 10]));
        let out = normalize(SourceImage::from_dynamic(DynamicImage::ImageLumaA8(buf)));
        assert_eq!(out.get_pixel(1, 1), &Rgb([90, 90, 90]));
    }

    #[test]
    fn test_model_input_is_fixed_size() {
        let out = normalize_for_model(SourceImage::Rgb8(gradient_rgb(640, 480)));
        assert_eq!(out.as_rgb().dimensions(), (IMAGE_SIZE, IMAGE_SIZE));
        assert_eq!(out.to_chw_floats().len(), 3 * 224 * 224);
    }

    #[test]
    fn test_chw_layout_keeps_raw_range() {
        let img = RgbImage::from_pixel(IMAGE_SIZE, IMAGE_SIZE, Rgb([255, 128, 0]));
        let floats = normalize_for_model(SourceImage::Rgb8(img)).to_chw_floats();
        let plane = (IMAGE_SIZE * IMAGE_SIZE) as usize;
        assert_eq!(floats[0], 255.0);
        assert_eq!(floats[plane], 128.0);
        assert_eq!(floats[2 * plane], 0.0);
    }

    #[test]
    fn test_load_normalized_reports_decode_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();

        let err = load_normalized(&path).unwrap_err();
        assert!(matches!(err, ClassifierError::Decode { .. }));
    }
}
