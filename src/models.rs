//! Segmentation model presets and model loading

use crate::cache::ModelCache;
use crate::error::{BgCleanError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const RELEASE_BASE_URL: &str = "https://github.com/danielgatis/rembg/releases/download/v0.0.0";

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Input normalization expected by a model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Model input width and height
    pub target_size: [u32; 2],
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
}

/// Pretrained salient-object models known to the cleaner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ModelPreset {
    /// U²-Net general model (176 MB)
    #[default]
    U2net,
    /// Lightweight U²-Net (4.7 MB)
    U2netp,
    /// Pruned U²-Net (43 MB)
    Silueta,
    /// `ISNet` general-use model (1024² input)
    IsnetGeneralUse,
}

impl ModelPreset {
    pub const ALL: [ModelPreset; 4] = [
        Self::U2net,
        Self::U2netp,
        Self::Silueta,
        Self::IsnetGeneralUse,
    ];

    /// Cache identifier and release file stem
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::U2net => "u2net",
            Self::U2netp => "u2netp",
            Self::Silueta => "silueta",
            Self::IsnetGeneralUse => "isnet-general-use",
        }
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::U2net => "U2-Net general salient object detection",
            Self::U2netp => "U2-Net lightweight variant",
            Self::Silueta => "U2-Net pruned to 43 MB",
            Self::IsnetGeneralUse => "ISNet general use, high resolution",
        }
    }

    #[must_use]
    pub fn url(self) -> String {
        format!("{RELEASE_BASE_URL}/{}.onnx", self.id())
    }

    #[must_use]
    pub fn preprocessing(self) -> PreprocessingConfig {
        match self {
            Self::U2net | Self::U2netp | Self::Silueta => PreprocessingConfig {
                target_size: [320, 320],
                normalization_mean: IMAGENET_MEAN,
                normalization_std: IMAGENET_STD,
            },
            Self::IsnetGeneralUse => PreprocessingConfig {
                target_size: [1024, 1024],
                normalization_mean: [0.5, 0.5, 0.5],
                normalization_std: [1.0, 1.0, 1.0],
            },
        }
    }
}

impl std::fmt::Display for ModelPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ModelPreset {
    type Err = BgCleanError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.id() == lowered)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|p| p.id()).collect();
                BgCleanError::invalid_config(format!(
                    "Unknown model '{s}'. Known models: {}",
                    known.join(", ")
                ))
            })
    }
}

/// Where the model weights come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelSource {
    /// A preset stored in the model cache
    Preset(ModelPreset),
    /// An ONNX file on disk
    External(PathBuf),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => format!(
                "external:{}",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
            ModelSource::Preset(preset) => format!("preset:{preset}"),
        }
    }
}

/// Model source plus the preset whose preprocessing applies to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    /// Preprocessing for external models; presets always use their own
    pub preprocessing: Option<ModelPreset>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self::preset(ModelPreset::default())
    }
}

impl ModelSpec {
    #[must_use]
    pub fn preset(preset: ModelPreset) -> Self {
        Self {
            source: ModelSource::Preset(preset),
            preprocessing: None,
        }
    }

    #[must_use]
    pub fn external<P: Into<PathBuf>>(path: P, preprocessing: Option<ModelPreset>) -> Self {
        Self {
            source: ModelSource::External(path.into()),
            preprocessing,
        }
    }

    /// Parse a model argument: a preset name, or a path to an `.onnx` file
    /// optionally followed by `:<preset>` naming its preprocessing.
    ///
    /// # Errors
    /// - Unknown preset name
    pub fn parse(value: &str) -> Result<Self> {
        if let Ok(preset) = value.parse::<ModelPreset>() {
            return Ok(Self::preset(preset));
        }

        if let Some((path, preset)) = value.rsplit_once(':') {
            if path.ends_with(".onnx") {
                return Ok(Self::external(path, Some(preset.parse()?)));
            }
        }

        if Path::new(value)
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("onnx"))
        {
            return Ok(Self::external(value, None));
        }

        Err(value.parse::<ModelPreset>().err().unwrap_or_else(|| {
            BgCleanError::invalid_config(format!("Invalid model specification '{value}'"))
        }))
    }

    /// Preprocessing that applies to this model
    #[must_use]
    pub fn preprocessing_config(&self) -> PreprocessingConfig {
        match &self.source {
            ModelSource::Preset(preset) => preset.preprocessing(),
            ModelSource::External(_) => self.preprocessing.unwrap_or_default().preprocessing(),
        }
    }
}

/// Model information and metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub precision: String,
    pub size_bytes: usize,
    pub input_shape: (usize, usize, usize, usize), // NCHW format
    pub output_shape: (usize, usize, usize, usize),
}

/// Model provider trait for loading models
pub trait ModelProvider: std::fmt::Debug + Send {
    /// Load model data as bytes
    ///
    /// # Errors
    /// - Model file not found or inaccessible
    fn load_model_data(&self) -> Result<Vec<u8>>;

    /// # Errors
    /// - Model file metadata unavailable
    fn get_model_info(&self) -> Result<ModelInfo>;

    /// # Errors
    /// - Invalid preprocessing configuration
    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// # Errors
    /// - Model path not available for this provider type
    fn get_model_path(&self) -> Result<PathBuf>;
}

fn model_info_for(path: &Path, name: String, config: &PreprocessingConfig) -> Result<ModelInfo> {
    let size_bytes = fs::metadata(path)
        .map_err(|e| BgCleanError::file_io_error("read model metadata", path, &e))?
        .len() as usize;
    let [width, height] = config.target_size;
    Ok(ModelInfo {
        name,
        precision: "fp32".to_string(),
        size_bytes,
        input_shape: (1, 3, height as usize, width as usize),
        output_shape: (1, 1, height as usize, width as usize),
    })
}

fn read_model_file(path: &Path) -> Result<Vec<u8>> {
    let data =
        fs::read(path).map_err(|e| BgCleanError::file_io_error("read model file", path, &e))?;
    if data.is_empty() {
        return Err(BgCleanError::model(format!(
            "Model file '{}' is empty",
            path.display()
        )));
    }
    Ok(data)
}

/// Loads a preset model from the model cache
#[derive(Debug)]
pub struct PresetModelProvider {
    preset: ModelPreset,
    path: PathBuf,
}

impl PresetModelProvider {
    /// # Errors
    /// - The preset has not been downloaded into the cache
    pub fn new(preset: ModelPreset, cache: &ModelCache) -> Result<Self> {
        if !cache.is_model_cached(preset.id()) {
            return Err(BgCleanError::model(format!(
                "Model '{}' is not cached in {}. Download it with: imgly-bgclean models download {}",
                preset,
                cache.get_current_cache_dir().display(),
                preset
            )));
        }
        Ok(Self {
            preset,
            path: cache.get_model_path(preset.id()),
        })
    }

    #[must_use]
    pub fn preset(&self) -> ModelPreset {
        self.preset
    }
}

impl ModelProvider for PresetModelProvider {
    fn load_model_data(&self) -> Result<Vec<u8>> {
        read_model_file(&self.path)
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        model_info_for(
            &self.path,
            self.preset.id().to_string(),
            &self.preset.preprocessing(),
        )
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.preset.preprocessing())
    }

    fn get_model_path(&self) -> Result<PathBuf> {
        Ok(self.path.clone())
    }
}

/// Loads an ONNX file from an arbitrary path
#[derive(Debug)]
pub struct ExternalModelProvider {
    model_path: PathBuf,
    preprocessing: PreprocessingConfig,
}

impl ExternalModelProvider {
    /// # Errors
    /// - The path does not exist or is not a file
    pub fn new<P: AsRef<Path>>(model_path: P, preprocessing: PreprocessingConfig) -> Result<Self> {
        let model_path = model_path.as_ref().to_path_buf();
        if !model_path.is_file() {
            return Err(BgCleanError::model(format!(
                "Model file does not exist: {}",
                model_path.display()
            )));
        }
        Ok(Self {
            model_path,
            preprocessing,
        })
    }
}

impl ModelProvider for ExternalModelProvider {
    fn load_model_data(&self) -> Result<Vec<u8>> {
        read_model_file(&self.model_path)
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        let name = self
            .model_path
            .file_stem()
            .map_or_else(|| "external".to_string(), |s| s.to_string_lossy().into_owned());
        model_info_for(&self.model_path, name, &self.preprocessing)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.preprocessing)
    }

    fn get_model_path(&self) -> Result<PathBuf> {
        Ok(self.model_path.clone())
    }
}

/// Model manager for handling different model sources
#[derive(Debug)]
pub struct ModelManager {
    provider: Box<dyn ModelProvider>,
}

impl ModelManager {
    /// Create a model manager from a model specification using the default cache
    ///
    /// # Errors
    /// - Preset not cached, external file missing, cache directory unavailable
    pub fn from_spec(spec: &ModelSpec) -> Result<Self> {
        match &spec.source {
            ModelSource::Preset(preset) => {
                let cache = ModelCache::new()?;
                Self::with_preset(*preset, &cache)
            },
            ModelSource::External(path) => {
                Self::with_external_model(path, spec.preprocessing_config())
            },
        }
    }

    /// # Errors
    /// - Preset not present in the cache
    pub fn with_preset(preset: ModelPreset, cache: &ModelCache) -> Result<Self> {
        Ok(Self {
            provider: Box::new(PresetModelProvider::new(preset, cache)?),
        })
    }

    /// # Errors
    /// - Model file does not exist
    pub fn with_external_model<P: AsRef<Path>>(
        model_path: P,
        preprocessing: PreprocessingConfig,
    ) -> Result<Self> {
        Ok(Self {
            provider: Box::new(ExternalModelProvider::new(model_path, preprocessing)?),
        })
    }

    /// # Errors
    /// - Model file unreadable or empty
    pub fn load_model(&self) -> Result<Vec<u8>> {
        self.provider.load_model_data()
    }

    /// # Errors
    /// - Model metadata unavailable
    pub fn get_info(&self) -> Result<ModelInfo> {
        self.provider.get_model_info()
    }

    /// # Errors
    /// - Invalid preprocessing configuration
    pub fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.provider.get_preprocessing_config()
    }

    /// # Errors
    /// - Model path not available for this provider type
    pub fn get_model_path(&self) -> Result<PathBuf> {
        self.provider.get_model_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_preset_ids_round_trip_through_from_str() {
        for preset in ModelPreset::ALL {
            assert_eq!(preset.id().parse::<ModelPreset>().unwrap(), preset);
        }
        assert_eq!("U2NET".parse::<ModelPreset>().unwrap(), ModelPreset::U2net);
        assert!("birefnet".parse::<ModelPreset>().is_err());
    }

    #[test]
    fn test_preset_urls() {
        assert_eq!(
            ModelPreset::U2net.url(),
            "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2net.onnx"
        );
        assert!(ModelPreset::IsnetGeneralUse
            .url()
            .ends_with("/isnet-general-use.onnx"));
    }

    #[test]
    fn test_preset_preprocessing() {
        let u2net = ModelPreset::U2net.preprocessing();
        assert_eq!(u2net.target_size, [320, 320]);
        assert_eq!(u2net.normalization_mean, IMAGENET_MEAN);
        assert_eq!(ModelPreset::Silueta.preprocessing(), u2net);

        let isnet = ModelPreset::IsnetGeneralUse.preprocessing();
        assert_eq!(isnet.target_size, [1024, 1024]);
        assert_eq!(isnet.normalization_std, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_model_spec_default_is_u2net() {
        let spec = ModelSpec::default();
        assert_eq!(spec.source, ModelSource::Preset(ModelPreset::U2net));
        assert_eq!(spec.source.display_name(), "preset:u2net");
    }

    #[test]
    fn test_model_spec_parse() {
        assert_eq!(
            ModelSpec::parse("silueta").unwrap(),
            ModelSpec::preset(ModelPreset::Silueta)
        );

        let external = ModelSpec::parse("/models/custom.onnx").unwrap();
        assert_eq!(external.source, ModelSource::External(PathBuf::from("/models/custom.onnx")));
        assert_eq!(external.preprocessing_config(), ModelPreset::U2net.preprocessing());

        let with_preset = ModelSpec::parse("/models/custom.onnx:isnet-general-use").unwrap();
        assert_eq!(with_preset.preprocessing, Some(ModelPreset::IsnetGeneralUse));
        assert_eq!(with_preset.preprocessing_config().target_size, [1024, 1024]);

        assert!(ModelSpec::parse("not-a-model").is_err());
        assert!(ModelSpec::parse("/models/custom.onnx:unknown").is_err());
    }

    #[test]
    fn test_preset_provider_requires_cached_model() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();

        let err = ModelManager::with_preset(ModelPreset::U2netp, &cache).unwrap_err();
        assert!(err.to_string().contains("models download u2netp"));

        fs::write(cache.get_model_path("u2netp"), b"weights").unwrap();
        let manager = ModelManager::with_preset(ModelPreset::U2netp, &cache).unwrap();
        assert_eq!(manager.load_model().unwrap(), b"weights");
        let info = manager.get_info().unwrap();
        assert_eq!(info.name, "u2netp");
        assert_eq!(info.size_bytes, 7);
        assert_eq!(info.input_shape, (1, 3, 320, 320));
        assert_eq!(info.output_shape, (1, 1, 320, 320));
    }

    #[test]
    fn test_external_provider() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("custom.onnx");
        assert!(
            ModelManager::with_external_model(&path, ModelPreset::U2net.preprocessing()).is_err()
        );

        fs::write(&path, b"").unwrap();
        let manager =
            ModelManager::with_external_model(&path, ModelPreset::IsnetGeneralUse.preprocessing())
                .unwrap();
        assert!(manager.load_model().is_err());
        assert_eq!(manager.get_model_path().unwrap(), path);
        assert_eq!(manager.get_info().unwrap().name, "custom");
        assert_eq!(
            manager.get_preprocessing_config().unwrap().target_size,
            [1024, 1024]
        );
    }
}
