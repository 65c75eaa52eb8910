//! Weight persistence and run metadata.
//!
//! Weights are stored with burn's `CompactRecorder`, which appends `.mpk` to the
//! given path. A small JSON sidecar records what was trained and how.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{module::Module, record::CompactRecorder, tensor::backend::Backend};
use med_core::{Error, ModelKind, ResNetDepth, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Extension `CompactRecorder` gives weight files
pub const WEIGHTS_EXTENSION: &str = "mpk";

/// Path of the weight file the recorder produces for `path`.
///
/// The recorder replaces any existing extension, so `run.v2` becomes `run.mpk`.
pub fn weights_file(path: &Path) -> PathBuf {
    path.with_extension(WEIGHTS_EXTENSION)
}

/// Saves `model` to `path` (extension added by the recorder). Returns the written file.
pub fn save_model<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::write(parent, e))?;
    }

    model
        .clone()
        .save_file(path, &CompactRecorder::new())
        .map_err(|e| Error::Model(format!("Failed to save model to {}: {e:?}", path.display())))?;

    let written = weights_file(path);
    info!("Saved weights to {}", written.display());
    Ok(written)
}

/// Loads weights saved by [`save_model`] into `model`.
pub fn load_model<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> Result<M> {
    let file = weights_file(path);
    if !file.is_file() {
        return Err(Error::read(&file, "weights file not found"));
    }

    let model = model
        .load_file(path, &CompactRecorder::new(), device)
        .map_err(|e| Error::Model(format!("Failed to load model from {}: {e:?}", file.display())))?;
    info!("Loaded weights from {}", file.display());
    Ok(model)
}

/// Metadata written next to the weights of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub model: ModelKind,
    pub run_name: String,
    /// Class names in label order; empty for segmentation runs
    pub classes: Vec<String>,
    pub epochs_trained: usize,
    pub learning_rate: f64,
    pub resnet_depth: Option<ResNetDepth>,
    pub saved_at: String,
}

impl RunMetadata {
    pub fn new(
        model: ModelKind,
        run_name: impl Into<String>,
        epochs_trained: usize,
        learning_rate: f64,
    ) -> Self {
        Self {
            model,
            run_name: run_name.into(),
            classes: Vec::new(),
            epochs_trained,
            learning_rate,
            resnet_depth: None,
            saved_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_classes(mut self, classes: Vec<String>) -> Self {
        self.classes = classes;
        self
    }

    pub fn with_resnet_depth(mut self, depth: ResNetDepth) -> Self {
        self.resnet_depth = Some(depth);
        self
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize run metadata: {e}")))?;
        fs::write(path, json).map_err(|e| Error::write(path, e))?;
        info!("Saved run metadata to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
        serde_json::from_str(&json)
            .map_err(|e| Error::Serialization(format!("Failed to deserialize run metadata: {e}")))
    }
}
