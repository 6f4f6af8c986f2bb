//! Tract backend for the segmentation models
//!
//! Pure Rust inference with no native runtime. CPU only.

use crate::config::SegmenterConfig;
use crate::error::{BgCleanError, Result};
use crate::inference::InferenceBackend;
use crate::models::ModelManager;
use ndarray::Array4;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// Tract backend for running segmentation models using pure Rust inference
#[derive(Debug)]
pub struct TractBackend {
    model: Option<TractModel>,
    model_manager: Option<ModelManager>,
    initialized: bool,
}

impl TractBackend {
    /// Execution providers offered by Tract as `(name, available, description)`
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!("Tract backend on {} / {}", std::env::consts::OS, std::env::consts::ARCH);
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    #[must_use]
    pub fn new() -> Self {
        Self {
            model: None,
            model_manager: None,
            initialized: false,
        }
    }

    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            model: None,
            model_manager: Some(model_manager),
            initialized: false,
        }
    }

    fn load_model(&mut self) -> Result<Duration> {
        let model_load_start = Instant::now();

        let Some(ref model_manager) = self.model_manager else {
            return Err(BgCleanError::model(
                "No model manager available for Tract backend",
            ));
        };

        let model_data = model_manager.load_model()?;
        let model_info = model_manager.get_info()?;
        let preprocessing = model_manager.get_preprocessing_config()?;
        let [width, height] = preprocessing.target_size;

        log::info!(
            "Initializing Tract backend with model {} ({:.2} MB)",
            model_info.name,
            model_info.size_bytes as f64 / (1024.0 * 1024.0)
        );

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| BgCleanError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([1, 3, height as usize, width as usize]).into())
            .map_err(|e| BgCleanError::model(format!("Failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| BgCleanError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| BgCleanError::model(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Tract backend initialized in {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );

        Ok(model_load_time)
    }
}

impl Default for TractBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, _config: &SegmenterConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }

        let model_load_time = self.load_model()?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| BgCleanError::inference("Tract model not initialized"))?;

        log::debug!("Running Tract inference on {:?}", input.shape());
        let inference_start = Instant::now();

        let input_tensor = Tensor::from(input.clone());
        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| BgCleanError::inference(format!("Tract inference failed: {e}")))?;

        // U2-Net family models emit several side outputs; the fused mask comes first
        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgCleanError::inference("No output tensor found"))?
            .into_arc_tensor();

        let output_data = output_tensor.to_array_view::<f32>().map_err(|e| {
            BgCleanError::inference(format!("Failed to convert output tensor: {e}"))
        })?;

        let output_shape = output_data.shape().to_vec();
        if output_shape.len() != 4 {
            return Err(BgCleanError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        }

        let output_array = Array4::from_shape_vec(
            (
                output_shape.first().copied().unwrap_or(1),
                output_shape.get(1).copied().unwrap_or(1),
                output_shape.get(2).copied().unwrap_or(1),
                output_shape.get(3).copied().unwrap_or(1),
            ),
            output_data.iter().copied().collect(),
        )
        .map_err(|e| BgCleanError::inference(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "Tract inference completed in {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(output_array)
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.model_manager
            .as_ref()
            .and_then(|manager| manager.get_info().ok())
            .map_or((1, 3, 320, 320), |info| info.input_shape)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.model_manager
            .as_ref()
            .and_then(|manager| manager.get_info().ok())
            .map_or((1, 1, 320, 320), |info| info.output_shape)
    }

    fn get_preprocessing_config(&self) -> Result<crate::models::PreprocessingConfig> {
        let model_manager = self
            .model_manager
            .as_ref()
            .ok_or_else(|| BgCleanError::internal("Model manager not initialized"))?;
        model_manager.get_preprocessing_config()
    }

    fn get_model_info(&self) -> Result<crate::models::ModelInfo> {
        let model_manager = self
            .model_manager
            .as_ref()
            .ok_or_else(|| BgCleanError::internal("Model manager not initialized"))?;
        model_manager.get_info()
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelPreset;

    #[test]
    fn test_tract_backend_default_shapes() {
        let backend = TractBackend::new();
        assert!(!backend.is_initialized());
        assert_eq!(backend.input_shape(), (1, 3, 320, 320));
        assert_eq!(backend.output_shape(), (1, 1, 320, 320));
        assert!(backend.get_model_info().is_err());
        assert!(backend.get_preprocessing_config().is_err());
    }

    #[test]
    fn test_tract_backend_without_manager_fails_to_initialize() {
        let mut backend = TractBackend::new();
        assert!(backend.initialize(&SegmenterConfig::default()).is_err());
        assert!(!backend.is_initialized());
        assert!(backend.infer(&Array4::zeros((1, 3, 8, 8))).is_err());
    }

    #[test]
    fn test_tract_backend_rejects_invalid_model_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.onnx");
        std::fs::write(&path, b"definitely not protobuf").unwrap();
        let manager =
            ModelManager::with_external_model(&path, ModelPreset::U2netp.preprocessing()).unwrap();

        let mut backend = TractBackend::with_model_manager(manager);
        assert_eq!(backend.input_shape(), (1, 3, 320, 320));
        assert!(backend.initialize(&SegmenterConfig::default()).is_err());
        assert!(!backend.is_initialized());
    }

    #[test]
    fn test_list_providers_cpu_only() {
        let providers = TractBackend::list_providers();
        assert_eq!(providers.len(), 1);
        assert!(providers.iter().all(|(name, available, _)| name == "CPU" && *available));
    }
}
