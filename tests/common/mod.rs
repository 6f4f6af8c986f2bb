//! Shared fixtures for the integration tests

#![allow(dead_code)]

use image::{codecs::jpeg::JpegEncoder, DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use imgly_bgclean::{
    error::Result, BackgroundCleaner, CleanOptions, ImageIOService, Segmenter,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const BLUE: Rgb<u8> = Rgb([20, 40, 200]);
pub const GREEN: Rgb<u8> = Rgb([30, 170, 60]);
pub const RED: Rgb<u8> = Rgb([220, 20, 20]);

/// Per-channel distance at which a pixel no longer counts as background
const THRESHOLD: u8 = 40;

/// Deterministic stand-in for a salient-object model
///
/// Pixels that differ from the top-left pixel are the subject. An image with
/// no such pixel is treated as one large subject, the way salient-object
/// models light up on featureless input.
#[derive(Clone, Default)]
pub struct ThresholdSegmenter {
    pub calls: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl ThresholdSegmenter {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn differs(a: Rgba<u8>, b: Rgba<u8>) -> bool {
    a.0.iter()
        .zip(b.0.iter())
        .take(3)
        .any(|(x, y)| x.abs_diff(*y) > THRESHOLD)
}

impl Segmenter for ThresholdSegmenter {
    fn segment(&mut self, image_bytes: &[u8]) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let image = ImageIOService::decode_oriented(image_bytes)?.to_rgba8();
        let background = *image.get_pixel(0, 0);
        let featureless = !image.pixels().any(|p| differs(*p, background));

        let out = RgbaImage::from_fn(image.width(), image.height(), |x, y| {
            let px = *image.get_pixel(x, y);
            if featureless || differs(px, background) {
                Rgba([px.0[0], px.0[1], px.0[2], 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        });
        ImageIOService::encode_png(&DynamicImage::ImageRgba8(out))
    }
}

pub fn cleaner(segmenter: ThresholdSegmenter, options: CleanOptions) -> BackgroundCleaner {
    BackgroundCleaner::new(Box::new(segmenter), options)
}

/// A photo with a centred rectangular subject covering 1/16 of the frame
pub fn photo(width: u32, height: u32, background: Rgb<u8>, subject: Rgb<u8>) -> RgbImage {
    let (x0, x1) = (width * 3 / 8, width * 5 / 8);
    let (y0, y1) = (height * 3 / 8, height * 5 / 8);
    RgbImage::from_fn(width, height, |x, y| {
        if (x0..x1).contains(&x) && (y0..y1).contains(&y) {
            subject
        } else {
            background
        }
    })
}

pub fn write_jpeg(dir: &Path, name: &str, image: &RgbImage) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    JpegEncoder::new_with_quality(file, 95)
        .encode_image(image)
        .unwrap();
    path
}

/// JPEG whose EXIF orientation tag says how to turn the stored pixels upright
pub fn write_jpeg_with_orientation(
    dir: &Path,
    name: &str,
    image: &RgbImage,
    orientation: u8,
) -> PathBuf {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, 95)
        .encode_image(image)
        .unwrap();

    let mut tagged = jpeg[..2].to_vec();
    tagged.extend_from_slice(&[0xFF, 0xE1, 0x00, 0x22]);
    tagged.extend_from_slice(b"Exif\0\0");
    tagged.extend_from_slice(&[b'M', b'M', 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08]);
    tagged.extend_from_slice(&[0x00, 0x01, 0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
    tagged.extend_from_slice(&[0x00, orientation, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    tagged.extend_from_slice(&jpeg[2..]);

    let path = dir.join(name);
    std::fs::write(&path, tagged).unwrap();
    path
}

/// PNG content under any file name; decoding goes by content, not extension
pub fn write_png(dir: &Path, name: &str, image: &RgbImage) -> PathBuf {
    let path = dir.join(name);
    image
        .save_with_format(&path, image::ImageFormat::Png)
        .unwrap();
    path
}

pub fn write_photos(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| write_png(dir, name, &photo(48, 32, BLUE, RED)))
        .collect()
}

/// Intermediate files left in `dir`
pub fn leftovers(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("temp_removed_object_") || n.starts_with("object_"))
        .collect()
}

pub fn close_to(actual: [u8; 3], expected: Rgb<u8>, tolerance: u8) -> bool {
    actual
        .iter()
        .zip(expected.0.iter())
        .all(|(a, e)| a.abs_diff(*e) <= tolerance)
}
