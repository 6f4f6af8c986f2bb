//! Model input and output conversion
//!
//! Input: stretch-resize to the model size, scale by the image maximum,
//! per-channel mean/std normalization, NCHW layout.
//! Output: first channel of the prediction, min-max normalized, as an 8-bit
//! mask resized back to the source dimensions.

use crate::{
    error::{BgCleanError, Result},
    models::PreprocessingConfig,
    types::SegmentationMask,
};
use image::{imageops::FilterType, DynamicImage, GrayImage, RgbImage};
use ndarray::{Array4, ArrayView2};

/// Converts images to model tensors and model tensors back to masks
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Build the normalized NCHW input tensor for an image
    ///
    /// # Errors
    /// - The configured target size is zero
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<Array4<f32>> {
        let [width, height] = preprocessing_config.target_size;
        if width == 0 || height == 0 {
            return Err(BgCleanError::invalid_config(format!(
                "Model input size must be non-zero, got {width}x{height}"
            )));
        }

        let resized =
            image::imageops::resize(&image.to_rgb8(), width, height, FilterType::Lanczos3);
        Ok(Self::canvas_to_tensor(&resized, preprocessing_config))
    }

    fn canvas_to_tensor(
        canvas: &RgbImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let max_value = canvas
            .as_raw()
            .iter()
            .copied()
            .max()
            .map_or(1e-6, |m| f32::from(m).max(1e-6));

        let mean = preprocessing_config.normalization_mean;
        let std = preprocessing_config.normalization_std;
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor allocated with the canvas dimensions, channel index < 3
        for (x, y, pixel) in canvas.enumerate_pixels() {
            for c in 0..3 {
                let scaled = f32::from(pixel.0[c]) / max_value;
                tensor[[0, c, y as usize, x as usize]] = (scaled - mean[c]) / std[c];
            }
        }

        tensor
    }

    /// Turn the model prediction into a mask of the requested size
    ///
    /// # Errors
    /// - The output tensor has no batch or channel entries
    pub fn output_to_mask(output: &Array4<f32>, target: (u32, u32)) -> Result<SegmentationMask> {
        let shape = output.shape();
        if shape.first().copied().unwrap_or(0) == 0 || shape.get(1).copied().unwrap_or(0) == 0 {
            return Err(BgCleanError::inference(format!(
                "Unexpected model output shape {shape:?}"
            )));
        }

        let prediction = output.slice(ndarray::s![0, 0, .., ..]);
        let model_mask = Self::normalize_prediction(prediction)?;
        let resized =
            image::imageops::resize(&model_mask, target.0, target.1, FilterType::Lanczos3);
        Ok(SegmentationMask::from_image(&resized))
    }

    fn normalize_prediction(prediction: ArrayView2<'_, f32>) -> Result<GrayImage> {
        let (rows, cols) = prediction.dim();
        let (min, max) = prediction
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = max - min;

        let data: Vec<u8> = prediction
            .iter()
            .map(|&v| {
                let normalized = if range > f32::EPSILON { (v - min) / range } else { 0.0 };
                (normalized * 255.0).clamp(0.0, 255.0) as u8
            })
            .collect();

        GrayImage::from_raw(cols as u32, rows as u32, data).ok_or_else(|| {
            BgCleanError::processing(format!("Prediction of {cols}x{rows} could not form a mask"))
        })
    }
}
