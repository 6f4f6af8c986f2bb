//! Mask-based compositing primitives
//!
//! The blend rule is the classic masked composite used by image editors:
//! `out = (a * m + b * (255 - m)) / 255` per channel, rounded to nearest.
//! A mask value of 255 selects `a`, 0 selects `b`.

use crate::error::{BgCleanError, Result};
use crate::types::{DominantColor, SegmentationMask};
use image::{GrayImage, Pixel, RgbImage, Rgba, RgbaImage};

/// Transparent white, the canvas the object layer is cut onto
pub const TRANSPARENT_WHITE: Rgba<u8> = Rgba([255, 255, 255, 0]);

/// Blend one channel value
#[inline]
#[must_use]
pub fn blend_channel(a: u8, b: u8, m: u8) -> u8 {
    let m = u32::from(m);
    let value = (u32::from(a) * m + u32::from(b) * (255 - m) + 127) / 255;
    value as u8
}

fn ensure_same_size(what: &str, expected: (u32, u32), actual: (u32, u32)) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(BgCleanError::dimension_mismatch(what, expected, actual))
    }
}

/// Masked composite of two rasters of the same pixel type
///
/// # Errors
/// - `DimensionMismatch` when the inputs or the mask differ in size
pub fn composite<P>(
    a: &image::ImageBuffer<P, Vec<u8>>,
    b: &image::ImageBuffer<P, Vec<u8>>,
    mask: &GrayImage,
) -> Result<image::ImageBuffer<P, Vec<u8>>>
where
    P: Pixel<Subpixel = u8>,
{
    ensure_same_size("composite background", a.dimensions(), b.dimensions())?;
    ensure_same_size("composite mask", a.dimensions(), mask.dimensions())?;

    let mut out = a.clone();
    for ((out_px, b_px), m) in out.pixels_mut().zip(b.pixels()).zip(mask.pixels()) {
        let m = m.0[0];
        out_px.apply2(b_px, |x, y| blend_channel(x, y, m));
    }
    Ok(out)
}

/// The object layer: the segmented raster cut onto transparent white through its own alpha
#[must_use]
pub fn extract_object(segmented: &RgbaImage) -> RgbaImage {
    let mut out = segmented.clone();
    for px in out.pixels_mut() {
        let m = px.0[3];
        px.apply2(&TRANSPARENT_WHITE, |x, y| blend_channel(x, y, m));
    }
    out
}

/// Fill the subject area of the original with the dominant color.
///
/// `inverted` is 255 on background and 0 on the subject, so the original is
/// kept where the background was and replaced by `color` under the subject.
///
/// # Errors
/// - `DimensionMismatch` when the original and the mask differ in size
pub fn fill_background(
    original: &RgbImage,
    color: DominantColor,
    inverted: &SegmentationMask,
) -> Result<RgbImage> {
    ensure_same_size("oriented original", inverted.dimensions, original.dimensions())?;
    let (width, height) = original.dimensions();
    let canvas = RgbImage::from_pixel(width, height, color.to_rgb());
    composite(original, &canvas, &inverted.to_image()?)
}

/// Alpha-composite `top` over `base` (source-over)
///
/// # Errors
/// - `DimensionMismatch` when the layers differ in size
pub fn alpha_composite(base: &RgbaImage, top: &RgbaImage) -> Result<RgbaImage> {
    ensure_same_size("recomposite layers", base.dimensions(), top.dimensions())?;
    let mut out = base.clone();
    image::imageops::overlay(&mut out, top, 0, 0);
    Ok(out)
}
