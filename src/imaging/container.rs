//! In-place normalization that keeps the file's container format.

use std::io::{Cursor, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, RgbImage};
use tempfile::NamedTempFile;
use tiff::encoder::{colortype, compression::Deflate, TiffEncoder};

use crate::error::{ClassifierError, Result};
use crate::imaging::normalize::normalize;
use crate::imaging::source_image::decode_source;

/// Default JPEG quality for rewritten files.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// How a rewritten file is encoded, chosen from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// Deflate-compressed TIFF.
    Tiff,
    Jpeg { quality: u8 },
    /// Best compression, adaptive filtering.
    Png,
    /// Whatever encoder the extension maps to.
    Generic,
}

impl Container {
    pub fn for_path(path: &Path, jpeg_quality: u8) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "tif" | "tiff" => Self::Tiff,
            "jpg" | "jpeg" => Self::Jpeg {
                quality: jpeg_quality,
            },
            "png" => Self::Png,
            _ => Self::Generic,
        }
    }

    /// Encode `img` into bytes for this container.
    pub fn encode(self, img: &RgbImage, path: &Path) -> Result<Vec<u8>> {
        let (width, height) = img.dimensions();
        let mut cursor = Cursor::new(Vec::new());
        match self {
            Self::Tiff => {
                let mut encoder =
                    TiffEncoder::new(&mut cursor).map_err(|e| ClassifierError::encode(path, e))?;
                encoder
                    .write_image_with_compression::<colortype::RGB8, _>(
                        width,
                        height,
                        Deflate::default(),
                        img.as_raw(),
                    )
                    .map_err(|e| ClassifierError::encode(path, e))?;
            }
            Self::Jpeg { quality } => {
                JpegEncoder::new_with_quality(&mut cursor, quality)
                    .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
                    .map_err(|e| ClassifierError::encode(path, e))?;
            }
            Self::Png => {
                PngEncoder::new_with_quality(
                    &mut cursor,
                    CompressionType::Best,
                    PngFilter::Adaptive,
                )
                .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
                .map_err(|e| ClassifierError::encode(path, e))?;
            }
            Self::Generic => {
                let format =
                    ImageFormat::from_path(path).map_err(|e| ClassifierError::encode(path, e))?;
                DynamicImage::ImageRgb8(img.clone())
                    .write_to(&mut cursor, format)
                    .map_err(|e| ClassifierError::encode(path, e))?;
            }
        }
        Ok(cursor.into_inner())
    }
}

/// Normalize the image at `path` to 8-bit RGB and overwrite it, keeping its
/// container. The new bytes land in a sibling temp file first and are renamed
/// over the original, so a failed rewrite leaves the original intact.
pub fn normalize_in_place(path: &Path, jpeg_quality: u8) -> Result<()> {
    let bytes = std::fs::read(path).map_err(|e| ClassifierError::io(path, e))?;
    let source = decode_source(&bytes, ImageFormat::from_path(path).ok())
        .map_err(|e| ClassifierError::decode(path, e))?;
    let kind = source.kind();
    let rgb = normalize(source);

    let container = Container::for_path(path, jpeg_quality);
    let encoded = container.encode(&rgb, path)?;
    replace_file(path, &encoded)?;

    tracing::debug!(
        "Normalized {} in place ({} -> rgb8, {:?})",
        path.display(),
        kind,
        container
    );
    Ok(())
}

/// Atomically replace `path` with `contents`.
pub(crate) fn replace_file(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ClassifierError::io(dir, e))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| ClassifierError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| ClassifierError::io(path, e.error))?;
    Ok(())
}
