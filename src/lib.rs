#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # IMG.LY Background Cleaner
//!
//! Batch background cleaning that keeps the subject intact: every image is
//! segmented, the subject area is filled with the image's dominant color,
//! the filled image is segmented a second time and the original subject is
//! composited back on top. Output is a same-size RGBA PNG.
//!
//! ## Features
//!
//! - **Two-pass cleaning**: subject preserved pixel-for-pixel, background
//!   color sampled from the original file
//! - **Batch runs**: synchronous folder runs, or a cancellable worker thread
//!   reporting progress and ETA over a channel
//! - **Model presets**: U²-Net, U²-Netp, Silueta and `ISNet`, downloaded into
//!   an XDG cache on first use, or any local ONNX file
//! - **Multiple Backends**: ONNX Runtime (CPU, CUDA, `CoreML`) and Tract (pure Rust)
//! - **CLI Integration**: optional `imgly-bgclean` binary (feature `cli`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imgly_bgclean::{
//!     run_batch, BackgroundCleaner, BatchConfig, CleanOptions, ModelPreset, ModelSegmenter,
//!     ModelSpec, SegmenterConfig,
//! };
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = SegmenterConfig::builder()
//!     .model_spec(ModelSpec::preset(ModelPreset::U2net))
//!     .build()?;
//! let segmenter = ModelSegmenter::new(config)?;
//! let mut cleaner = BackgroundCleaner::new(Box::new(segmenter), CleanOptions::default());
//!
//! let batch = BatchConfig::non_interactive("InputImages", "OutputImages");
//! let summary = run_batch(&mut cleaner, &batch)?;
//! println!("cleaned {} of {}", summary.processed, summary.total);
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom segmentation
//!
//! The pipeline only depends on [`Segmenter`]: encoded image in, RGBA PNG
//! with subject confidence in alpha out. Any implementation can be plugged
//! into [`BackgroundCleaner`].
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): Command-line interface and progress bars
//! - `webp-support` (default): WebP input support
//! - `tracing-json`, `tracing-files`: extra log outputs for the CLI

pub mod backends;
pub mod batch;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositing;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod pipeline;
pub mod segmenter;
pub mod services;
pub mod session;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

use std::path::Path;

pub use batch::{
    discover_batch_inputs, discover_inputs, run_batch, BatchEvent, BatchHandle, BatchProgress,
    BatchRunner, BatchSummary, ItemFailure,
};
pub use cache::{format_size, CachedModelInfo, ModelCache, CACHE_DIR_ENV};
pub use config::{
    BackendType, BatchConfig, CleanOptions, ExecutionProvider, InputFilter, SegmenterConfig,
    SegmenterConfigBuilder,
};
pub use download::{validate_model_url, ModelDownloader};
pub use error::{BgCleanError, Result};
pub use inference::InferenceBackend;
pub use models::{ModelManager, ModelPreset, ModelSource, ModelSpec, PreprocessingConfig};
pub use pipeline::BackgroundCleaner;
pub use segmenter::{BackendFactory, DefaultBackendFactory, ModelSegmenter, Segmenter};
pub use services::{
    ArtifactNames, ConsoleProgressReporter, ImageIOService, NoOpProgressReporter,
    ProgressReporter, ProgressTracker, ProgressUpdate,
};
pub use session::{InteractiveSession, SessionState};
pub use types::{CleanOutcome, CleanPhase, CleanTimings, DominantColor, SegmentationMask};
pub use utils::{dominant_color, ExecutionProviderManager, ImagePreprocessor, ProviderInfo};

#[cfg(feature = "cli")]
pub use tracing_config::{
    init_cli_tracing, TracingConfig, TracingFormat, TracingGuard, TracingOutput,
};

/// Clean a single image into `output_dir` with a model segmenter
///
/// Loads the model for this one call; keep a [`BackgroundCleaner`] around
/// for more than one image.
///
/// # Examples
///
/// ```rust,no_run
/// use imgly_bgclean::{clean_image, SegmenterConfig};
/// use std::path::Path;
///
/// # fn example() -> anyhow::Result<()> {
/// let outcome = clean_image(
///     Path::new("InputImages/IMG_001.JPG"),
///     Path::new("OutputImages"),
///     SegmenterConfig::default(),
/// )?;
/// println!("background was {}", outcome.dominant_color);
/// # Ok(())
/// # }
/// ```
pub fn clean_image(
    input: &Path,
    output_dir: &Path,
    config: SegmenterConfig,
) -> Result<CleanOutcome> {
    let segmenter = ModelSegmenter::new(config)?;
    let mut cleaner = BackgroundCleaner::new(Box::new(segmenter), CleanOptions::default());
    cleaner.clean_file(input, output_dir)
}

/// Clean a folder with a model segmenter, reporting through `log`
///
/// Fails on the first failed image unless `batch.continue_on_error` is set.
pub fn clean_folder(batch: &BatchConfig, config: SegmenterConfig) -> Result<BatchSummary> {
    let segmenter = ModelSegmenter::new(config)?;
    let mut cleaner = BackgroundCleaner::new(Box::new(segmenter), batch.clean)
        .with_reporter(std::sync::Arc::new(ConsoleProgressReporter::new(false)));
    run_batch(&mut cleaner, batch)
}
