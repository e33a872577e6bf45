//! Bringing images into the upload area.
//!
//! Uploads and seeded files are stored under a fresh UUID name (keeping the
//! lowercased extension) and normalized in place before anything reads them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ClassifierError, Result};
use crate::imaging::normalize_in_place;
use crate::model::IngestSettings;
use crate::store::{NewImageRecord, RecordStatus, SqliteRecordStore};

/// A file now living in the upload directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestedFile {
    pub path: PathBuf,
    pub original_name: String,
}

/// Per-class counts from a seeding run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedReport {
    pub classes: Vec<(String, usize)>,
    pub inserted: usize,
}

/// Lowercased extension of `file_name` with its leading dot, if accepted.
pub fn validate_extension(file_name: &str, settings: &IngestSettings) -> Result<String> {
    let extension = Path::new(file_name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default();

    if settings.accepted_extensions.iter().any(|accepted| *accepted == extension) {
        Ok(extension)
    } else {
        Err(ClassifierError::UnsupportedFileType {
            extension,
            accepted: settings.accepted_extensions.join(", "),
        })
    }
}

fn unique_path(upload_dir: &Path, extension: &str) -> PathBuf {
    upload_dir.join(format!("{}{}", Uuid::new_v4(), extension))
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| ClassifierError::io(dir, e))
}

/// Normalize a freshly written file, removing it again if it is not a
/// readable image.
fn normalize_new_file(path: &Path, settings: &IngestSettings) -> Result<()> {
    if let Err(e) = normalize_in_place(path, settings.jpeg_quality) {
        if let Err(remove_err) = std::fs::remove_file(path) {
            tracing::warn!("Failed to remove rejected file {}: {}", path.display(), remove_err);
        }
        return Err(e);
    }
    Ok(())
}

/// Store uploaded bytes under a new name and normalize them.
pub fn ingest_upload(
    bytes: &[u8],
    original_name: &str,
    upload_dir: &Path,
    settings: &IngestSettings,
) -> Result<IngestedFile> {
    let extension = validate_extension(original_name, settings)?;
    ensure_dir(upload_dir)?;

    let path = unique_path(upload_dir, &extension);
    std::fs::write(&path, bytes).map_err(|e| ClassifierError::io(&path, e))?;
    normalize_new_file(&path, settings)?;

    tracing::info!("Stored upload {} as {}", original_name, path.display());
    Ok(IngestedFile {
        path,
        original_name: original_name.to_string(),
    })
}

/// Insert a pending record for an ingested file.
pub fn record_upload(store: &SqliteRecordStore, file: &IngestedFile) -> Result<i64> {
    store.insert(&NewImageRecord {
        file_path: file.path.to_string_lossy().into_owned(),
        original_name: Some(file.original_name.clone()),
        status: RecordStatus::Pending,
        human_label: None,
    })
}

/// Import a class-per-directory dataset as labeled records.
///
/// Each subdirectory of `seed_dir` is one class named after the directory
/// (trimmed). Files with an accepted extension are copied into `upload_dir`,
/// normalized and inserted with status `labeled`. Other files are ignored.
pub fn seed_from_directory(
    seed_dir: &Path,
    upload_dir: &Path,
    store: &SqliteRecordStore,
    settings: &IngestSettings,
) -> Result<SeedReport> {
    let mut class_dirs: Vec<PathBuf> = std::fs::read_dir(seed_dir)
        .map_err(|e| ClassifierError::io(seed_dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    class_dirs.sort();
    ensure_dir(upload_dir)?;

    let mut report = SeedReport::default();
    for class_dir in class_dirs {
        let label = class_dir
            .file_name()
            .map(|name| name.to_string_lossy().trim().to_string())
            .unwrap_or_default();
        if label.is_empty() {
            continue;
        }

        let mut files: Vec<(PathBuf, String)> = std::fs::read_dir(&class_dir)
            .map_err(|e| ClassifierError::io(&class_dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .filter_map(|path| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                let extension = validate_extension(&name, settings).ok()?;
                Some((path, extension))
            })
            .collect();
        files.sort();
        tracing::info!("Class '{}': {} files", label, files.len());

        for (source, extension) in &files {
            let destination = unique_path(upload_dir, extension);
            std::fs::copy(source, &destination).map_err(|e| ClassifierError::io(source, e))?;
            normalize_new_file(&destination, settings)?;

            store.insert(&NewImageRecord {
                file_path: destination.to_string_lossy().into_owned(),
                original_name: source.file_name().map(|n| n.to_string_lossy().into_owned()),
                status: RecordStatus::Labeled,
                human_label: Some(label.clone()),
            })?;
            report.inserted += 1;
        }
        report.classes.push((label, files.len()));
    }

    if report.inserted == 0 {
        tracing::warn!(
            "Nothing imported from {}; expected one subdirectory of images per class",
            seed_dir.display()
        );
    } else {
        tracing::info!("Inserted {} labeled records", report.inserted);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{fetch_labeled_samples, RecordStore};
    use image::{ImageBuffer, Luma, Rgb, RgbImage};

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        let mut cursor = std::io::Cursor::new(Vec::new());
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_extension_check() {
        let settings = IngestSettings::default();
        assert_eq!(validate_extension("Slide.TIF", &settings).unwrap(), ".tif");
        assert_eq!(validate_extension("a.b.jpeg", &settings).unwrap(), ".jpeg");

        for name in ["notes.txt", "archive.gif", "no_extension"] {
            assert!(
                matches!(
                    validate_extension(name, &settings),
                    Err(ClassifierError::UnsupportedFileType { .. })
                ),
                "{name}"
            );
        }
    }

    #[test]
    fn test_upload_gets_unique_name() {
        let dir = tempfile::tempdir().unwrap();
        let settings = IngestSettings::default();

        let a = ingest_upload(&png_bytes(), "cells.PNG", dir.path(), &settings).unwrap();
        let b = ingest_upload(&png_bytes(), "cells.PNG", dir.path(), &settings).unwrap();

        assert_ne!(a.path, b.path);
        assert_eq!(a.path.extension().unwrap(), "png");
        assert_eq!(a.original_name, "cells.PNG");
        assert!(image::open(&a.path).unwrap().as_rgb8().is_some());
    }

    #[test]
    fn test_rejected_upload_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let settings = IngestSettings::default();

        let err = ingest_upload(b"garbage", "cells.png", dir.path(), &settings).unwrap_err();
        assert!(matches!(err, ClassifierError::Decode { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let err = ingest_upload(&png_bytes(), "cells.bmp", dir.path(), &settings).unwrap_err();
        assert!(matches!(err, ClassifierError::UnsupportedFileType { .. }));
    }

    #[test]
    fn test_record_upload_is_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let file =
            ingest_upload(&png_bytes(), "x.png", dir.path(), &IngestSettings::default()).unwrap();

        let id = record_upload(&store, &file).unwrap();
        let record = store.get(id).unwrap().unwrap();
        assert_eq!(record.status, "pending");
        assert_eq!(record.original_name.as_deref(), Some("x.png"));
        assert!(store.labeled_records().unwrap().is_empty());
    }

    #[test]
    fn test_seed_imports_class_directories() {
        let seed = tempfile::tempdir().unwrap();
        let uploads = tempfile::tempdir().unwrap();
        let store = SqliteRecordStore::open_in_memory().unwrap();

        let cocci = seed.path().join("Staphylococcus aureus");
        let rods = seed.path().join("Bacillus");
        std::fs::create_dir_all(&cocci).unwrap();
        std::fs::create_dir_all(&rods).unwrap();

        RgbImage::from_pixel(4, 4, Rgb([9, 9, 9])).save(cocci.join("a.png")).unwrap();
        RgbImage::from_pixel(4, 4, Rgb([9, 9, 9])).save(cocci.join("b.jpg")).unwrap();
        let deep: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(4, 4, |x, _| Luma([x as u16 * 1000]));
        deep.save(rods.join("c.tif")).unwrap();
        std::fs::write(rods.join("readme.txt"), b"ignored").unwrap();
        std::fs::write(seed.path().join("stray.png"), b"ignored").unwrap();

        let settings = IngestSettings::default();
        let report = seed_from_directory(seed.path(), uploads.path(), &store, &settings).unwrap();
        assert_eq!(report.inserted, 3);
        assert_eq!(
            report.classes,
            vec![("Bacillus".to_string(), 1), ("Staphylococcus aureus".to_string(), 2)]
        );

        let samples = fetch_labeled_samples(&store).unwrap();
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|s| s.image_path.starts_with(uploads.path())));

        let tiff = samples.iter().find(|s| s.human_label == "Bacillus").unwrap();
        assert!(image::open(&tiff.image_path).unwrap().as_rgb8().is_some());
    }
}
