//! Salient-object segmentation
//!
//! The cleaning pipeline only sees [`Segmenter`]: image bytes in, RGBA PNG
//! bytes out, alpha carrying subject confidence. [`ModelSegmenter`] provides
//! it with an ONNX model run by one of the inference backends.

use crate::{
    compositing,
    config::{BackendType, SegmenterConfig},
    error::{BgCleanError, Result},
    inference::InferenceBackend,
    models::ModelManager,
    services::ImageIOService,
    types::SegmentationMask,
    utils::ImagePreprocessor,
};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use instant::{Duration, Instant};
use tracing::{debug, info};

/// Background removal as an opaque function
pub trait Segmenter: Send {
    /// Segment an encoded image
    ///
    /// Returns PNG-encoded RGBA with the same (orientation-corrected)
    /// dimensions as the input.
    ///
    /// # Errors
    /// - Undecodable input
    /// - Model or inference failures
    fn segment(&mut self, image_bytes: &[u8]) -> Result<Vec<u8>>;
}

impl<S: Segmenter + ?Sized> Segmenter for Box<S> {
    fn segment(&mut self, image_bytes: &[u8]) -> Result<Vec<u8>> {
        (**self).segment(image_bytes)
    }
}

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create a backend of the given type around a model
    ///
    /// # Errors
    /// - Backend type not compiled in
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>>;

    fn available_backends(&self) -> Vec<BackendType>;
}

/// Creates the backends enabled by cargo features
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::with_model_manager(
                model_manager,
            ))),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::with_model_manager(
                model_manager,
            ))),
            #[allow(unreachable_patterns)]
            other => {
                drop(model_manager);
                Err(BgCleanError::invalid_config(format!(
                    "The {other} backend is not compiled into this build"
                )))
            },
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        if cfg!(feature = "onnx") {
            backends.push(BackendType::Onnx);
        }
        if cfg!(feature = "tract") {
            backends.push(BackendType::Tract);
        }
        backends
    }
}

/// Segmenter backed by a salient-object model
pub struct ModelSegmenter {
    config: SegmenterConfig,
    backend_factory: Box<dyn BackendFactory>,
    backend: Option<Box<dyn InferenceBackend>>,
}

impl ModelSegmenter {
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: SegmenterConfig) -> Result<Self> {
        Self::with_factory(config, Box::new(DefaultBackendFactory))
    }

    /// # Errors
    /// - Invalid configuration
    pub fn with_factory(
        config: SegmenterConfig,
        backend_factory: Box<dyn BackendFactory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend_factory,
            backend: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    /// Load the model and create the backend
    ///
    /// Returns the model load time, or `None` when already initialized.
    ///
    /// # Errors
    /// - Model not cached or unreadable
    /// - Backend creation or session setup failures
    pub fn initialize(&mut self) -> Result<Option<Duration>> {
        if self.backend.is_some() {
            return Ok(None);
        }

        info!(
            model = %self.config.model_spec.source.display_name(),
            backend = %self.config.backend_type,
            provider = %self.config.execution_provider,
            "Initializing segmentation model"
        );

        let model_manager = ModelManager::from_spec(&self.config.model_spec)?;
        let mut backend = self
            .backend_factory
            .create_backend(self.config.backend_type, model_manager)?;
        let load_time = backend.initialize(&self.config)?;

        self.backend = Some(backend);
        Ok(load_time)
    }

    /// Predict the subject mask of a decoded image at its own size
    ///
    /// # Errors
    /// - Initialization or inference failures
    pub fn segment_image(&mut self, image: &DynamicImage) -> Result<SegmentationMask> {
        self.initialize()?;
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| {
                BgCleanError::internal("Segmentation backend missing after initialization")
            })?;

        let preprocessing = backend.get_preprocessing_config()?;
        let start = Instant::now();
        let tensor = ImagePreprocessor::preprocess_for_inference(image, &preprocessing)?;
        let output = backend.infer(&tensor)?;
        let mask = ImagePreprocessor::output_to_mask(&output, image.dimensions())?;

        debug!(
            width = image.width(),
            height = image.height(),
            coverage = mask.coverage(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Segmentation mask predicted"
        );
        Ok(mask)
    }

    /// Cut the subject out onto transparent black through the mask
    ///
    /// # Errors
    /// - `DimensionMismatch` when the mask does not match the image
    pub fn cutout(image: &DynamicImage, mask: &SegmentationMask) -> Result<RgbaImage> {
        let source = image.to_rgba8();
        let (width, height) = source.dimensions();
        let transparent = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
        compositing::composite(&source, &transparent, &mask.to_image()?)
    }
}

impl Segmenter for ModelSegmenter {
    fn segment(&mut self, image_bytes: &[u8]) -> Result<Vec<u8>> {
        let image = ImageIOService::decode_oriented(image_bytes)?;
        let mask = self.segment_image(&image)?;
        let cutout = Self::cutout(&image, &mask)?;
        ImageIOService::encode_png(&DynamicImage::ImageRgba8(cutout))
    }
}
