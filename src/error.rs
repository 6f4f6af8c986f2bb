//! Error types for background cleaning operations

use crate::types::CleanPhase;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for background cleaning operations
pub type Result<T> = std::result::Result<T, BgCleanError>;

/// Errors produced by the cleaning pipeline, the batch drivers and the
/// segmentation backends
#[derive(Error, Debug)]
pub enum BgCleanError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error(
        "Dimension mismatch for {what}: expected {}x{}, got {}x{}",
        expected.0,
        expected.1,
        actual.0,
        actual.1
    )]
    DimensionMismatch {
        what: String,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("No input images found in {}", .0.display())]
    NoInputs(PathBuf),

    /// A failure inside the per-image step, tagged with the file and phase
    #[error("{file}: {phase} failed: {source}")]
    Step {
        file: String,
        phase: CleanPhase,
        #[source]
        source: Box<BgCleanError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BgCleanError {
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap an I/O error with the failed operation and the path involved
    #[must_use]
    pub fn file_io_error(operation: &str, path: &Path, err: &std::io::Error) -> Self {
        Self::Io(std::io::Error::new(
            err.kind(),
            format!("Failed to {} '{}': {}", operation, path.display(), err),
        ))
    }

    /// Image decode failure with the path that could not be read
    #[must_use]
    pub fn image_load_error(path: &Path, err: &image::ImageError) -> Self {
        Self::Processing(format!(
            "Failed to decode image '{}': {}",
            path.display(),
            err
        ))
    }

    /// Processing failure in a named stage, with optional extra context
    #[must_use]
    pub fn processing_stage_error(stage: &str, details: &str, context: Option<&str>) -> Self {
        match context {
            Some(ctx) => Self::Processing(format!("{stage} failed: {details} ({ctx})")),
            None => Self::Processing(format!("{stage} failed: {details}")),
        }
    }

    pub fn network_error<E: std::fmt::Display>(context: &str, err: E) -> Self {
        Self::Network(format!("{context}: {err}"))
    }

    pub fn dimension_mismatch<S: Into<String>>(
        what: S,
        expected: (u32, u32),
        actual: (u32, u32),
    ) -> Self {
        Self::DimensionMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }

    /// Tag this error with the file and phase of the per-image step.
    ///
    /// Already tagged errors are returned unchanged so the innermost phase wins.
    #[must_use]
    pub fn in_step<S: Into<String>>(self, file: S, phase: CleanPhase) -> Self {
        match self {
            Self::Step { .. } => self,
            other => Self::Step {
                file: file.into(),
                phase,
                source: Box::new(other),
            },
        }
    }

    /// Phase of the per-image step this error was raised in, if any
    #[must_use]
    pub fn phase(&self) -> Option<CleanPhase> {
        match self {
            Self::Step { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// File name attached by [`BgCleanError::in_step`], if any
    #[must_use]
    pub fn file(&self) -> Option<&str> {
        match self {
            Self::Step { file, .. } => Some(file.as_str()),
            _ => None,
        }
    }

    /// The error with any step tagging removed
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Step { source, .. } => source.root(),
            other => other,
        }
    }
}
