//! Application state: the loaded model and the training lifecycle.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::task::{self, JoinHandle};

use crate::error::{ClassifierError, Result};
use crate::ml::{train_from_store, InferenceEngine, TrainingSummary};
use crate::model::AppConfig;
use crate::scoring::ClassifyOutcome;
use crate::store::SqliteRecordStore;

/// Progress of the most recent training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrainingStatus {
    Idle,
    Running,
    Succeeded { summary: TrainingSummary },
    Failed { reason: String },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Held for the duration of a training run; clears the flag when dropped.
struct TrainingGuard {
    flag: Arc<Mutex<bool>>,
}

impl TrainingGuard {
    fn acquire(flag: &Arc<Mutex<bool>>) -> Result<Self> {
        let mut busy = lock(flag);
        if *busy {
            return Err(ClassifierError::TrainingInProgress);
        }
        *busy = true;
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for TrainingGuard {
    fn drop(&mut self) {
        *lock(&self.flag) = false;
    }
}

/// Shared state. Clones refer to the same model and training flag.
#[derive(Clone)]
pub struct AppState {
    config: Arc<AppConfig>,
    engine: Arc<Mutex<Option<InferenceEngine>>>, // None until a model is published
    is_training: Arc<Mutex<bool>>,
    status: Arc<Mutex<TrainingStatus>>,
}

impl AppState {
    /// State with no model loaded.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            engine: Arc::new(Mutex::new(None)),
            is_training: Arc::new(Mutex::new(false)),
            status: Arc::new(Mutex::new(TrainingStatus::Idle)),
        }
    }

    /// State with the published model loaded, if there is one. Starting
    /// without a model is allowed; classification reports "not ready".
    pub fn startup(config: AppConfig) -> Self {
        let state = Self::new(config);
        match state.reload_engine() {
            Ok(()) => tracing::info!("Model loaded at startup"),
            Err(ClassifierError::MissingModel(path)) => {
                tracing::warn!("No model at {} yet; run training first", path.display())
            }
            Err(e) => tracing::warn!("Starting without a model: {}", e),
        }
        state
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.engine).is_some()
    }

    pub fn is_training(&self) -> bool {
        *lock(&self.is_training)
    }

    pub fn training_status(&self) -> TrainingStatus {
        lock(&self.status).clone()
    }

    /// Load the published artifact and swap it in. On failure the current
    /// engine stays in place.
    pub fn reload_engine(&self) -> Result<()> {
        let paths = self.config.paths.artifact_paths();
        let engine = InferenceEngine::load(
            &paths.model_path,
            &paths.labels_path,
            self.config.device_type,
        )?;
        *lock(&self.engine) = Some(engine);
        Ok(())
    }

    /// Classify a stored image with whatever model is current.
    ///
    /// The engine is cloned out of the lock, so concurrent calls do not wait
    /// on each other and a model swap never interrupts a running prediction.
    pub fn classify(&self, image_path: &Path) -> Result<ClassifyOutcome> {
        let engine = lock(&self.engine).clone();
        match engine {
            None => Ok(ClassifyOutcome::NotReady),
            Some(engine) => engine
                .classify_image(image_path, &self.config.inference)
                .map(ClassifyOutcome::Ready),
        }
    }

    /// Train in the calling thread and swap in the new model.
    pub fn train(&self) -> Result<TrainingSummary> {
        let guard = self.begin_training()?;
        self.run_training(guard)
    }

    /// Start a training run on the blocking pool and return immediately.
    ///
    /// Fails with `TrainingInProgress` if a run is already going. Progress is
    /// visible through [`AppState::training_status`]. Must be called from
    /// within a Tokio runtime.
    pub fn spawn_training(&self) -> Result<JoinHandle<Result<TrainingSummary>>> {
        let guard = self.begin_training()?;
        let state = self.clone();
        Ok(task::spawn_blocking(move || state.run_training(guard)))
    }

    /// Claim the training slot and report the run as started.
    fn begin_training(&self) -> Result<TrainingGuard> {
        let guard = TrainingGuard::acquire(&self.is_training)?;
        *lock(&self.status) = TrainingStatus::Running;
        Ok(guard)
    }

    fn run_training(&self, guard: TrainingGuard) -> Result<TrainingSummary> {
        let result = SqliteRecordStore::open(&self.config.paths.database_path)
            .and_then(|store| train_from_store(&self.config, &store))
            .and_then(|summary| {
                self.reload_engine()?;
                Ok(summary)
            });

        *lock(&self.status) = match &result {
            Ok(summary) => {
                tracing::info!(
                    "Training finished: {} samples, {} classes",
                    summary.sample_count,
                    summary.classes.len()
                );
                TrainingStatus::Succeeded {
                    summary: summary.clone(),
                }
            }
            Err(e) => {
                tracing::error!("Training failed: {}", e);
                TrainingStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };
        drop(guard);
        result
    }
}
