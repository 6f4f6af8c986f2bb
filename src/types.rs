//! Core types shared by the cleaning pipeline and the batch drivers

use crate::error::{BgCleanError, Result};
use image::{GrayImage, ImageBuffer, Luma};
use instant::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The ordered phases of the per-image cleaning step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CleanPhase {
    ReadSource,
    FirstSegmentation,
    ObjectExtraction,
    MaskInversion,
    OrientationCorrection,
    DominantColor,
    BackgroundFill,
    TemporaryWrite,
    SecondSegmentation,
    Recomposite,
    OutputWrite,
    Cleanup,
}

impl CleanPhase {
    /// All phases in execution order
    pub const ALL: [CleanPhase; 12] = [
        Self::ReadSource,
        Self::FirstSegmentation,
        Self::ObjectExtraction,
        Self::MaskInversion,
        Self::OrientationCorrection,
        Self::DominantColor,
        Self::BackgroundFill,
        Self::TemporaryWrite,
        Self::SecondSegmentation,
        Self::Recomposite,
        Self::OutputWrite,
        Self::Cleanup,
    ];

    /// Zero-based position in [`CleanPhase::ALL`]
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Human-readable description for progress output
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::ReadSource => "Reading source image",
            Self::FirstSegmentation => "Segmenting subject",
            Self::ObjectExtraction => "Extracting object layer",
            Self::MaskInversion => "Inverting subject mask",
            Self::OrientationCorrection => "Applying EXIF orientation",
            Self::DominantColor => "Computing dominant color",
            Self::BackgroundFill => "Filling subject area",
            Self::TemporaryWrite => "Writing temporary image",
            Self::SecondSegmentation => "Segmenting filled background",
            Self::Recomposite => "Recompositing object",
            Self::OutputWrite => "Writing output",
            Self::Cleanup => "Removing temporary files",
        }
    }

    /// Fraction of the step completed once this phase has finished
    #[must_use]
    pub fn progress_fraction(self) -> f32 {
        (self.index() + 1) as f32 / Self::ALL.len() as f32
    }
}

impl std::fmt::Display for CleanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ReadSource => "read source",
            Self::FirstSegmentation => "first segmentation",
            Self::ObjectExtraction => "object extraction",
            Self::MaskInversion => "mask inversion",
            Self::OrientationCorrection => "orientation correction",
            Self::DominantColor => "dominant color",
            Self::BackgroundFill => "background fill",
            Self::TemporaryWrite => "temporary write",
            Self::SecondSegmentation => "second segmentation",
            Self::Recomposite => "recomposite",
            Self::OutputWrite => "output write",
            Self::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Single-channel alpha matte produced by segmentation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    /// Mask values 0-255, row-major
    pub data: Vec<u8>,

    /// Width and height of the mask
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// Take the alpha channel of an RGBA raster
    #[must_use]
    pub fn from_alpha(image: &image::RgbaImage) -> Self {
        let data = image.pixels().map(|p| p.0[3]).collect();
        Self {
            data,
            dimensions: image.dimensions(),
        }
    }

    #[must_use]
    pub fn from_image(image: &GrayImage) -> Self {
        Self {
            data: image.as_raw().clone(),
            dimensions: image.dimensions(),
        }
    }

    /// Convert into an `image` crate raster
    ///
    /// # Errors
    /// - The data length does not match the dimensions
    pub fn to_image(&self) -> Result<GrayImage> {
        let (width, height) = self.dimensions;
        ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(width, height, self.data.clone()).ok_or_else(
            || {
                BgCleanError::processing(format!(
                    "Mask data length {} does not match {}x{}",
                    self.data.len(),
                    width,
                    height
                ))
            },
        )
    }

    /// The complementary mask, `255 - m` per pixel
    #[must_use]
    pub fn inverted(&self) -> Self {
        Self {
            data: self.data.iter().map(|m| 255 - m).collect(),
            dimensions: self.dimensions,
        }
    }

    /// Share of pixels with a value above the midpoint
    #[must_use]
    pub fn coverage(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let foreground = self.data.iter().filter(|&&m| m > 127).count();
        foreground as f32 / self.data.len() as f32
    }
}

/// Dominant background color of a photograph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DominantColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl DominantColor {
    #[must_use]
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    #[must_use]
    pub fn to_rgb(self) -> image::Rgb<u8> {
        image::Rgb([self.r, self.g, self.b])
    }
}

impl std::fmt::Display for DominantColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Time spent in each phase of one cleaning step
#[derive(Debug, Clone, Default)]
pub struct CleanTimings {
    phases: Vec<(CleanPhase, Duration)>,
}

impl CleanTimings {
    pub fn record(&mut self, phase: CleanPhase, elapsed: Duration) {
        self.phases.push((phase, elapsed));
    }

    #[must_use]
    pub fn get(&self, phase: CleanPhase) -> Option<Duration> {
        self.phases
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, d)| *d)
    }

    #[must_use]
    pub fn total(&self) -> Duration {
        self.phases.iter().map(|(_, d)| *d).sum()
    }

    /// Combined time of both segmentation passes
    #[must_use]
    pub fn segmentation(&self) -> Duration {
        [CleanPhase::FirstSegmentation, CleanPhase::SecondSegmentation]
            .into_iter()
            .filter_map(|p| self.get(p))
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(CleanPhase, Duration)> {
        self.phases.iter()
    }
}

/// Result of cleaning one image
#[derive(Debug, Clone)]
pub struct CleanOutcome {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub dimensions: (u32, u32),
    pub dominant_color: DominantColor,
    pub timings: CleanTimings,
}

impl CleanOutcome {
    /// One-line summary for logs
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} -> {} ({}x{}, fill {}, {:.0}ms, {:.0}ms segmenting)",
            self.input_path.display(),
            self.output_path.display(),
            self.dimensions.0,
            self.dimensions.1,
            self.dominant_color,
            self.timings.total().as_secs_f64() * 1000.0,
            self.timings.segmentation().as_secs_f64() * 1000.0
        )
    }
}
