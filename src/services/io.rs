//! Image I/O for the cleaning pipeline
//!
//! Keeps file access, orientation-aware decoding and artifact naming out of
//! the pipeline logic.

use crate::error::{BgCleanError, Result};
use image::{DynamicImage, ImageDecoder, ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Prefix of the background-filled intermediate image
pub const TEMPORARY_PREFIX: &str = "temp_removed_object_";

/// Prefix of the persisted object layer
pub const OBJECT_PREFIX: &str = "object_";

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Read a file's raw bytes
    ///
    /// # Errors
    /// - File missing or unreadable
    pub fn read_bytes<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
        let path_ref = path.as_ref();
        std::fs::read(path_ref)
            .map_err(|e| BgCleanError::file_io_error("read image file", path_ref, &e))
    }

    /// Decode image bytes and apply their EXIF orientation
    ///
    /// # Errors
    /// - Unknown format or corrupt data
    pub fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage> {
        let decoder = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .into_decoder()?;
        Self::decode_with_orientation(decoder)
    }

    /// Open an image file and apply its EXIF orientation
    ///
    /// # Errors
    /// - File missing or unreadable
    /// - Unknown format or corrupt data
    pub fn open_oriented<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();
        let decoder = image::ImageReader::open(path_ref)
            .map_err(|e| BgCleanError::file_io_error("open image file", path_ref, &e))?
            .with_guessed_format()
            .map_err(|e| BgCleanError::file_io_error("detect image format", path_ref, &e))?
            .into_decoder()
            .map_err(|e| BgCleanError::image_load_error(path_ref, &e))?;
        Self::decode_with_orientation(decoder)
            .map_err(|e| match e {
                BgCleanError::Image(inner) => BgCleanError::image_load_error(path_ref, &inner),
                other => other,
            })
    }

    fn decode_with_orientation(mut decoder: impl ImageDecoder) -> Result<DynamicImage> {
        let orientation = decoder.orientation()?;
        let mut image = DynamicImage::from_decoder(decoder)?;
        image.apply_orientation(orientation);
        Ok(image)
    }

    /// Decode bytes returned by a segmenter into RGBA
    ///
    /// # Errors
    /// - Data is not a decodable image
    pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage> {
        image::load_from_memory(bytes)
            .map(|img| img.to_rgba8())
            .map_err(|e| {
                BgCleanError::processing_stage_error(
                    "segmentation result decode",
                    &e.to_string(),
                    Some(&format!("size: {} bytes", bytes.len())),
                )
            })
    }

    /// Encode an image as PNG in memory
    ///
    /// # Errors
    /// - Encoder failure
    pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }

    /// Write an image as PNG, creating the parent directory if needed
    ///
    /// # Errors
    /// - Directory creation or write failure
    pub fn save_png<P: AsRef<Path>>(image: &DynamicImage, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| BgCleanError::file_io_error("create output directory", parent, &e))?;
        }

        image
            .save_with_format(path_ref, ImageFormat::Png)
            .map_err(|e| {
                BgCleanError::processing_stage_error(
                    "image save",
                    &format!("Failed to save as PNG: {e}"),
                    Some(&format!("path: {}", path_ref.display())),
                )
            })
    }
}

/// Paths written while cleaning one input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNames {
    /// `<filename>.png`
    pub output: PathBuf,
    /// `temp_removed_object_<filename>.png`
    pub temporary: PathBuf,
    /// `object_<filename>.png`
    pub object: PathBuf,
}

impl ArtifactNames {
    /// # Errors
    /// - The input path has no file name
    pub fn new(input: &Path, output_dir: &Path) -> Result<Self> {
        let file_name = input
            .file_name()
            .ok_or_else(|| {
                BgCleanError::invalid_config(format!(
                    "Input path has no file name: {}",
                    input.display()
                ))
            })?
            .to_string_lossy();

        Ok(Self {
            output: output_dir.join(format!("{file_name}.png")),
            temporary: output_dir.join(format!("{TEMPORARY_PREFIX}{file_name}.png")),
            object: output_dir.join(format!("{OBJECT_PREFIX}{file_name}.png")),
        })
    }
}

/// An intermediate file that is deleted when the guard goes away
///
/// [`TemporaryArtifact::remove`] deletes it and reports failures. Dropping
/// the guard without calling it makes one best-effort attempt and only logs.
#[derive(Debug)]
pub struct TemporaryArtifact {
    path: PathBuf,
    armed: bool,
}

impl TemporaryArtifact {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now
    ///
    /// # Errors
    /// - The file exists but cannot be deleted
    pub fn remove(mut self) -> Result<()> {
        self.armed = false;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BgCleanError::file_io_error(
                "remove temporary file",
                &self.path,
                &e,
            )),
        }
    }
}

impl Drop for TemporaryArtifact {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed leftover {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => log::warn!(
                "Could not remove temporary file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}
