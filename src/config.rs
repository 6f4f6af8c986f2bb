//! Configuration types for segmentation, the per-image step and batch runs

use crate::error::{BgCleanError, Result};
use crate::models::ModelSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Inference engine used by the model segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendType {
    /// ONNX Runtime
    Onnx,
    /// Tract, pure Rust
    Tract,
}

impl Default for BackendType {
    fn default() -> Self {
        if cfg!(feature = "onnx") {
            Self::Onnx
        } else {
            Self::Tract
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Configuration for the segmentation model and its runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmenterConfig {
    pub backend_type: BackendType,

    /// Execution provider for ONNX Runtime (ignored by Tract)
    pub execution_provider: ExecutionProvider,

    pub model_spec: ModelSpec,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// Enable debug mode (additional logging)
    pub debug: bool,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            backend_type: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            model_spec: ModelSpec::default(),
            intra_threads: 0,
            inter_threads: 0,
            debug: false,
        }
    }
}

impl SegmenterConfig {
    #[must_use]
    pub fn builder() -> SegmenterConfigBuilder {
        SegmenterConfigBuilder::default()
    }

    /// Validate the backend/provider combination
    ///
    /// # Errors
    /// - The selected backend was not compiled in
    /// - Tract was combined with a GPU execution provider
    pub fn validate(&self) -> Result<()> {
        match self.backend_type {
            BackendType::Onnx if !cfg!(feature = "onnx") => {
                return Err(BgCleanError::invalid_config(
                    "ONNX backend requested but the 'onnx' feature is not enabled",
                ));
            },
            BackendType::Tract if !cfg!(feature = "tract") => {
                return Err(BgCleanError::invalid_config(
                    "Tract backend requested but the 'tract' feature is not enabled",
                ));
            },
            _ => {},
        }

        if self.backend_type == BackendType::Tract
            && matches!(
                self.execution_provider,
                ExecutionProvider::Cuda | ExecutionProvider::CoreMl
            )
        {
            return Err(BgCleanError::invalid_config(format!(
                "Tract backend only supports CPU execution, got '{}'",
                self.execution_provider
            )));
        }

        Ok(())
    }
}

/// Builder for `SegmenterConfig`
#[derive(Debug, Default)]
pub struct SegmenterConfigBuilder {
    config: SegmenterConfig,
}

impl SegmenterConfigBuilder {
    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Set both thread counts: `threads` intra-op, half of it (at least 1) inter-op.
    /// Zero leaves both on auto.
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - See [`SegmenterConfig::validate`]
    pub fn build(self) -> Result<SegmenterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Options for the per-image cleaning step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CleanOptions {
    /// Persist the object layer as `object_<filename>.png` until cleanup
    pub persist_object_layer: bool,
}

/// Extensions accepted by the interactive variant
pub const INTERACTIVE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tiff", "webp"];

/// Suffix accepted by the non-interactive variant
pub const NON_INTERACTIVE_SUFFIX: &str = ".JPG";

/// Which files in the input folder are processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputFilter {
    /// File name must end with this exact, case-sensitive suffix
    ExactExtension(String),
    /// Extension must be one of these, compared case-insensitively
    Extensions(Vec<String>),
}

impl InputFilter {
    #[must_use]
    pub fn non_interactive() -> Self {
        Self::ExactExtension(NON_INTERACTIVE_SUFFIX.to_string())
    }

    #[must_use]
    pub fn interactive() -> Self {
        Self::Extensions(INTERACTIVE_EXTENSIONS.iter().map(|e| (*e).to_string()).collect())
    }

    #[must_use]
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        match self {
            Self::ExactExtension(suffix) => name.ends_with(suffix.as_str()),
            Self::Extensions(extensions) => path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| {
                    extensions
                        .iter()
                        .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
                }),
        }
    }
}

/// Configuration of one batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub filter: InputFilter,
    /// Optional glob on file names, applied after the extension filter
    pub pattern: Option<String>,
    /// Report a failed item and move on instead of aborting the batch
    pub continue_on_error: bool,
    pub clean: CleanOptions,
}

impl BatchConfig {
    /// Defaults of the non-interactive variant: `.JPG` only, abort on first failure,
    /// object layer persisted
    #[must_use]
    pub fn non_interactive<P: Into<PathBuf>, Q: Into<PathBuf>>(
        input_dir: P,
        output_dir: Q,
    ) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            filter: InputFilter::non_interactive(),
            pattern: None,
            continue_on_error: false,
            clean: CleanOptions {
                persist_object_layer: true,
            },
        }
    }

    /// Defaults of the interactive variant: six extensions, continue on failure
    #[must_use]
    pub fn interactive<P: Into<PathBuf>, Q: Into<PathBuf>>(input_dir: P, output_dir: Q) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            filter: InputFilter::interactive(),
            pattern: None,
            continue_on_error: true,
            clean: CleanOptions::default(),
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: InputFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: Option<String>) -> Self {
        self.pattern = pattern;
        self
    }

    #[must_use]
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Check folders and pattern before any work starts
    ///
    /// # Errors
    /// - Input folder missing or not a directory
    /// - Output path exists but is not a directory
    /// - Invalid glob pattern
    pub fn validate(&self) -> Result<()> {
        if !self.input_dir.is_dir() {
            return Err(BgCleanError::invalid_config(format!(
                "Input folder does not exist or is not a directory: {}",
                self.input_dir.display()
            )));
        }
        if self.output_dir.exists() && !self.output_dir.is_dir() {
            return Err(BgCleanError::invalid_config(format!(
                "Output path is not a directory: {}",
                self.output_dir.display()
            )));
        }
        if let Some(pattern) = &self.pattern {
            glob::Pattern::new(pattern).map_err(|e| {
                BgCleanError::invalid_config(format!("Invalid file pattern '{pattern}': {e}"))
            })?;
        }
        Ok(())
    }
}
