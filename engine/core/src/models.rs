//! Local model discovery

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::backend::ModelInfo;
use crate::error::GenerationError;

/// Extension of loadable model files
pub const MODEL_EXTENSION: &str = "gguf";

/// A model file found on disk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalModel {
    /// File stem, e.g. `llama-3.2-1b-q4`
    pub name: String,
    /// Full path
    pub path: PathBuf,
    /// File size in bytes
    pub size_bytes: u64,
}

impl From<LocalModel> for ModelInfo {
    fn from(model: LocalModel) -> Self {
        Self {
            name: model.path.display().to_string(),
            size: Some(model.size_bytes),
            path: Some(model.path),
        }
    }
}

/// Whether `path` has the model file extension (case-insensitive)
#[must_use]
pub fn has_model_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(MODEL_EXTENSION))
}

/// Check that `model` names an existing `.gguf` file
///
/// # Errors
///
/// Returns [`GenerationError::Configuration`] otherwise.
pub fn validate_model_path(model: &str) -> Result<PathBuf, GenerationError> {
    let path = crate::config::expand_home(model.trim());
    if !has_model_extension(&path) {
        return Err(GenerationError::configuration(format!(
            "model must be a .{MODEL_EXTENSION} file: {}",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(GenerationError::configuration(format!(
            "model file not found: {}",
            path.display()
        )));
    }
    Ok(path)
}

/// Recursively find `.gguf` files under `dir`, sorted by path
///
/// A missing directory yields an empty list. Unreadable subdirectories are
/// skipped.
///
/// # Errors
///
/// Returns [`GenerationError::Configuration`] if `dir` exists but cannot be
/// read.
pub async fn discover_models(dir: &Path) -> Result<Vec<LocalModel>, GenerationError> {
    if !dir.exists() {
        debug!(dir = %dir.display(), "Models directory does not exist");
        return Ok(Vec::new());
    }

    let mut models = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    let mut is_root = true;

    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(err) if is_root => {
                return Err(GenerationError::configuration(format!(
                    "cannot read models directory {}: {err}",
                    current.display()
                )));
            }
            Err(err) => {
                debug!(dir = %current.display(), error = %err, "Skipping unreadable directory");
                continue;
            }
        };
        is_root = false;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if metadata.is_dir() {
                pending.push(path);
            } else if metadata.is_file() && has_model_extension(&path) {
                let name = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                models.push(LocalModel {
                    name,
                    path,
                    size_bytes: metadata.len(),
                });
            }
        }
    }

    models.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(models)
}
