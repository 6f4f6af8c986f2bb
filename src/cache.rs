//! Model cache management for downloaded models
//!
//! Models live as single `<model-id>.onnx` files in an XDG-compliant cache
//! directory. The location can be overridden with `IMGLY_BGCLEAN_CACHE_DIR`.

use crate::error::{BgCleanError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "IMGLY_BGCLEAN_CACHE_DIR";

const MODEL_EXTENSION: &str = "onnx";

/// Information about a cached model
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (file stem)
    pub model_id: String,
    /// Path to the cached model file
    pub path: PathBuf,
    /// Size of the model file in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a new model cache manager
    ///
    /// Uses the XDG Base Directory specification for the cache location:
    /// - Linux/macOS: `~/.cache/imgly-bgclean/models/`
    /// - Windows: `%LOCALAPPDATA%/imgly-bgclean/models/`
    ///
    /// # Errors
    /// - Failed to determine cache directory
    /// - Failed to create cache directory
    pub fn new() -> Result<Self> {
        let cache_dir = Self::get_cache_dir()?;

        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| {
                BgCleanError::file_io_error("create cache directory", &cache_dir, &e)
            })?;
        }

        Ok(Self { cache_dir })
    }

    fn get_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                BgCleanError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV} environment variable."
                ))
            })?
            .join("imgly-bgclean")
            .join("models"))
    }

    /// Create a model cache rooted at a custom directory (models go in `<dir>/models`)
    ///
    /// # Errors
    /// - Failed to create cache directory
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        let models_dir = cache_dir.join("models");

        if !models_dir.exists() {
            fs::create_dir_all(&models_dir).map_err(|e| {
                BgCleanError::file_io_error("create custom cache directory", &models_dir, &e)
            })?;
        }

        Ok(Self {
            cache_dir: models_dir,
        })
    }

    /// Path where a model with this id is (or would be) stored
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{model_id}.{MODEL_EXTENSION}"))
    }

    /// Check whether a non-empty model file exists for the id
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        fs::metadata(self.get_model_path(model_id))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// List all cached models, sorted by id
    ///
    /// # Errors
    /// - Failed to read cache directory
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(models);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            BgCleanError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                BgCleanError::file_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;
            let path = entry.path();

            if !path.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(MODEL_EXTENSION)
            {
                continue;
            }

            let Some(model_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            models.push(CachedModelInfo {
                model_id: model_id.to_string(),
                path: path.clone(),
                size_bytes,
            });
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    /// Remove every cached model
    ///
    /// # Returns
    /// The ids of the removed models
    ///
    /// # Errors
    /// - Failed to read the cache directory or remove a model file
    pub fn clear_all_models(&self) -> Result<Vec<String>> {
        let mut removed_models = Vec::new();

        for model in self.scan_cached_models()? {
            log::info!("Removing cached model: {}", model.model_id);
            fs::remove_file(&model.path).map_err(|e| {
                BgCleanError::file_io_error("remove cached model", &model.path, &e)
            })?;
            removed_models.push(model.model_id);
        }

        Ok(removed_models)
    }

    /// Remove one cached model
    ///
    /// # Returns
    /// `true` if the model was found and removed, `false` if it was not cached
    ///
    /// # Errors
    /// - Failed to remove the model file
    pub fn clear_specific_model(&self, model_id: &str) -> Result<bool> {
        let model_path = self.get_model_path(model_id);

        if !model_path.exists() {
            return Ok(false);
        }

        log::info!("Removing cached model: {}", model_id);
        fs::remove_file(&model_path).map_err(|e| {
            BgCleanError::file_io_error("remove specific cached model", &model_path, &e)
        })?;

        Ok(true)
    }

    #[must_use]
    pub fn get_current_cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    let unit = UNITS.get(unit_index).unwrap_or(&"B");
    if unit_index == 0 {
        format!("{bytes} {unit}")
    } else {
        format!("{size:.1} {unit}")
    }
}
