//! Dominant color extraction
//!
//! Uses the modified median cut quantizer from `color_thief`. Quality 1 samples
//! every pixel; the first palette entry is the most populated color box.
//! Pixels that are mostly transparent or nearly white are skipped by the quantizer.

use crate::error::{BgCleanError, Result};
use crate::types::DominantColor;
use color_thief::ColorFormat;
use image::{DynamicImage, Rgba};
use std::path::Path;

/// Sampling step handed to the quantizer (1 = every pixel)
pub const QUANTIZER_QUALITY: u8 = 1;

/// Palette size requested from the quantizer
pub const PALETTE_SIZE: u8 = 5;

/// Alpha below which a pixel is not sampled
const MIN_ALPHA: u8 = 125;

/// A pixel with every channel above this is white and not sampled
const WHITE_LEVEL: u8 = 250;

fn is_sampled(pixel: &Rgba<u8>) -> bool {
    let [r, g, b, a] = pixel.0;
    a >= MIN_ALPHA && !(r > WHITE_LEVEL && g > WHITE_LEVEL && b > WHITE_LEVEL)
}

/// Extract the palette of a decoded image
///
/// # Errors
/// - Every pixel is white or mostly transparent
/// - The quantizer rejects the input
pub fn palette(image: &DynamicImage, max_colors: u8) -> Result<Vec<DominantColor>> {
    let rgba = image.to_rgba8();
    if !rgba.pixels().any(is_sampled) {
        return Err(BgCleanError::processing(
            "Image has no quantizable pixels (all white or transparent)",
        ));
    }

    let colors = color_thief::get_palette(
        rgba.as_raw(),
        ColorFormat::Rgba,
        QUANTIZER_QUALITY,
        max_colors,
    )
    .map_err(|e| BgCleanError::processing(format!("Color quantization failed: {e:?}")))?;

    Ok(colors
        .into_iter()
        .map(|c| DominantColor::new(c.r, c.g, c.b))
        .collect())
}

/// Dominant color of a decoded image
///
/// # Errors
/// - Every pixel is white or mostly transparent
pub fn dominant_color(image: &DynamicImage) -> Result<DominantColor> {
    palette(image, PALETTE_SIZE)?
        .first()
        .copied()
        .ok_or_else(|| BgCleanError::processing("Image has no quantizable pixels"))
}

/// Dominant color of the image stored at `path`
///
/// # Errors
/// - The file cannot be read or decoded
/// - No color could be quantized
pub fn dominant_color_from_path(path: &Path) -> Result<DominantColor> {
    let image = image::ImageReader::open(path)
        .map_err(|e| BgCleanError::file_io_error("open image file", path, &e))?
        .with_guessed_format()
        .map_err(|e| BgCleanError::file_io_error("detect image format", path, &e))?
        .decode()
        .map_err(|e| BgCleanError::image_load_error(path, &e))?;
    let color = dominant_color(&image)?;
    log::debug!("Dominant color of {}: {}", path.display(), color);
    Ok(color)
}
