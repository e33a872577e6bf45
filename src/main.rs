use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use specimen_classifier_lib::{
    imaging::normalize_in_place,
    ingest::{ingest_upload, record_upload, seed_from_directory},
    logging,
    ml::{FeatureExtractor, FeatureExtractorConfig},
    model::AppConfig,
    store::SqliteRecordStore,
    AppState,
};

#[derive(Parser, Debug)]
#[command(
    name = "specimen-classifier",
    version,
    about = "Classify microscopy images and retrain from curated labels"
)]
struct Cli {
    /// Path to config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train on every labeled record and publish the model
    Train,
    /// Classify stored images with the published model
    Classify {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Store an image in the upload directory and register it as pending
    Ingest { image: PathBuf },
    /// Import a class-per-directory dataset as labeled records
    Seed { dir: PathBuf },
    /// Rewrite images in place as 8-bit RGB, keeping their format
    Normalize {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Write a randomly initialized feature extractor record
    InitBackbone {
        /// Destination (defaults to the configured backbone path)
        output: Option<PathBuf>,
    },
    /// Write the effective configuration to the config path
    WriteConfig,
}

fn main() -> Result<()> {
    logging::init().context("Failed to initialize logging")?;
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_or_default(&config_path);
    config.log_summary();

    match cli.command {
        Command::Train => {
            let state = AppState::new(config);
            let summary = state.train().context("Training failed")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Classify { images } => {
            let state = AppState::startup(config);
            for image in images {
                let outcome = state
                    .classify(&image)
                    .with_context(|| format!("Failed to classify {}", image.display()))?;
                println!("{}: {}", image.display(), serde_json::to_string(&outcome)?);
            }
        }
        Command::Ingest { image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("Failed to read {}", image.display()))?;
            let name = image
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .context("Image path has no file name")?;
            let stored = ingest_upload(&bytes, &name, &config.paths.upload_dir, &config.ingest)?;
            let store = SqliteRecordStore::open(&config.paths.database_path)?;
            let id = record_upload(&store, &stored)?;
            println!("{} -> {} (record {})", image.display(), stored.path.display(), id);
        }
        Command::Seed { dir } => {
            if !dir.is_dir() {
                anyhow::bail!(
                    "{} does not exist; create it with one subdirectory per class",
                    dir.display()
                );
            }
            let store = SqliteRecordStore::open(&config.paths.database_path)?;
            let report =
                seed_from_directory(&dir, &config.paths.upload_dir, &store, &config.ingest)?;
            for (label, count) in &report.classes {
                println!("{label}: {count}");
            }
            println!("Inserted {} records", report.inserted);
        }
        Command::Normalize { images } => {
            for image in images {
                normalize_in_place(&image, config.ingest.jpeg_quality)
                    .with_context(|| format!("Failed to normalize {}", image.display()))?;
                println!("{}", image.display());
            }
        }
        Command::InitBackbone { output } => {
            let output = output.unwrap_or_else(|| config.paths.backbone_weights.clone());
            let device = burn_ndarray::NdArrayDevice::Cpu;
            let extractor = FeatureExtractorConfig::new()
                .with_channels(config.training.backbone_channels.clone())
                .init::<burn_ndarray::NdArray>(&device);
            let written = FeatureExtractor::save_pretrained(extractor, &output)?;
            println!("{}", written.display());
        }
        Command::WriteConfig => {
            config.save(&config_path)?;
            println!("{}", config_path.display());
        }
    }

    Ok(())
}
