//! Inference backend abstraction

use crate::{config::SegmenterConfig, error::Result};
use ndarray::Array4;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// A loaded segmentation model that maps an NCHW image tensor to an NCHW mask tensor
pub trait InferenceBackend: Send {
    /// Initialize the backend with the given configuration
    ///
    /// Returns the model load time, or `None` if the backend was already initialized.
    ///
    /// # Errors
    /// - Model loading or session creation failures
    fn initialize(&mut self, config: &SegmenterConfig) -> Result<Option<Duration>>;

    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Output tensor is not 4-dimensional
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Expected input shape (NCHW)
    fn input_shape(&self) -> (usize, usize, usize, usize);

    /// Expected output shape (NCHW)
    fn output_shape(&self) -> (usize, usize, usize, usize);

    /// # Errors
    /// - Model manager not set
    fn get_preprocessing_config(&self) -> Result<crate::models::PreprocessingConfig>;

    /// # Errors
    /// - Model manager not set
    /// - Model metadata unavailable
    fn get_model_info(&self) -> Result<crate::models::ModelInfo>;

    fn is_initialized(&self) -> bool;
}
