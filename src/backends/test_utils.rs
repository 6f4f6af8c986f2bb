//! Mock backends for exercising the segmenter without model files

use crate::{
    config::{BackendType, SegmenterConfig},
    error::{BgCleanError, Result},
    inference::InferenceBackend,
    models::{ModelInfo, ModelManager, ModelPreset, PreprocessingConfig},
    segmenter::BackendFactory,
};
use instant::Duration;
use ndarray::Array4;
use std::sync::{Arc, Mutex};

/// Side length of the mock model's square input
const MOCK_SIDE: usize = 32;

/// Where a mock backend breaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// The factory refuses to build a backend
    Creation,
    Initialization,
    Inference,
}

pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

/// Backend whose saliency is a soft disc centred in the frame
#[derive(Debug, Clone)]
pub struct MockBackend {
    loaded: bool,
    failure: Option<MockFailure>,
    calls: CallLog,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            loaded: false,
            failure: None,
            calls: CallLog::default(),
        }
    }

    fn log(&self, call: &'static str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn disc(batch: usize) -> Array4<f32> {
        let centre = MOCK_SIDE as f32 / 2.0;
        let radius = MOCK_SIDE as f32 / 3.0;
        Array4::from_shape_fn((batch, 1, MOCK_SIDE, MOCK_SIDE), |(_, _, y, x)| {
            let distance = (x as f32 - centre).hypot(y as f32 - centre);
            ((radius - distance) / radius).max(0.0)
        })
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &SegmenterConfig) -> Result<Option<Duration>> {
        self.log("initialize");
        if self.failure == Some(MockFailure::Initialization) {
            return Err(BgCleanError::model("mock model refused to load"));
        }
        if self.loaded {
            return Ok(None);
        }
        self.loaded = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.log("infer");
        if !self.loaded {
            return Err(BgCleanError::internal("Backend not initialized"));
        }
        if self.failure == Some(MockFailure::Inference) {
            return Err(BgCleanError::inference("mock inference crashed"));
        }

        let (batch, channels, height, width) = input.dim();
        if (channels, height, width) != (3, MOCK_SIDE, MOCK_SIDE) {
            return Err(BgCleanError::inference(format!(
                "mock model takes 3x{MOCK_SIDE}x{MOCK_SIDE} input, got {channels}x{height}x{width}"
            )));
        }
        Ok(Self::disc(batch))
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        (1, 3, MOCK_SIDE, MOCK_SIDE)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        (1, 1, MOCK_SIDE, MOCK_SIDE)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        let mut config = ModelPreset::U2netp.preprocessing();
        config.target_size = [MOCK_SIDE as u32; 2];
        Ok(config)
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        Ok(ModelInfo {
            name: "mock-disc".to_string(),
            precision: "fp32".to_string(),
            size_bytes: 0,
            input_shape: self.input_shape(),
            output_shape: self.output_shape(),
        })
    }

    fn is_initialized(&self) -> bool {
        self.loaded
    }
}

/// Factory handing out mock backends that share one call log
#[derive(Debug, Default)]
pub struct MockBackendFactory {
    pub failure: Option<MockFailure>,
    pub calls: CallLog,
}

impl MockBackendFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing(failure: MockFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }
}

impl BackendFactory for MockBackendFactory {
    fn create_backend(
        &self,
        _backend_type: BackendType,
        _model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>> {
        if self.failure == Some(MockFailure::Creation) {
            return Err(BgCleanError::invalid_config("no mock backend available"));
        }
        Ok(Box::new(MockBackend {
            failure: self.failure,
            calls: Arc::clone(&self.calls),
            ..MockBackend::new()
        }))
    }

    fn available_backends(&self) -> Vec<BackendType> {
        vec![BackendType::Onnx, BackendType::Tract]
    }
}

/// Horizontal and vertical ramps, no flat regions
#[must_use]
pub fn create_test_image(width: u32, height: u32) -> image::DynamicImage {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            ((x * 255) / width.max(1)) as u8,
            ((y * 255) / height.max(1)) as u8,
            128,
        ])
    });
    image::DynamicImage::ImageRgb8(img)
}

/// Placeholder model file the external model provider accepts
pub fn write_dummy_model(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("mock.onnx");
    std::fs::write(&path, b"mock model weights").unwrap();
    path
}
