//! Model downloading
//!
//! Streams a model file over HTTP into a temporary file inside the cache
//! directory, optionally checks its SHA-256, then renames it into place so a
//! partially downloaded model is never visible in the cache.

use crate::cache::ModelCache;
use crate::error::{BgCleanError, Result};
use crate::models::ModelPreset;
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const DOWNLOAD_TIMEOUT_SECS: u64 = 600;

/// Model downloader with progress reporting
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }

    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {
                let _ = len;
            },
        }
    }

    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {
                let _ = pos;
            },
        }
    }

    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }
}

impl ModelDownloader {
    /// Downloader writing into the default model cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    /// - Failed to initialize model cache
    pub fn new() -> Result<Self> {
        Self::with_cache(ModelCache::new()?)
    }

    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_cache(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()
            .map_err(|e| BgCleanError::network_error("Failed to create HTTP client", e))?;
        Ok(Self { client, cache })
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Make sure a preset model is in the cache, downloading it if needed
    ///
    /// # Errors
    /// - Network errors during download
    /// - File system errors during caching
    pub async fn download_preset(
        &self,
        preset: ModelPreset,
        show_progress: bool,
    ) -> Result<PathBuf> {
        self.download_model(&preset.url(), preset.id(), None, show_progress)
            .await
    }

    /// Download `url` into the cache as `<model_id>.onnx`
    ///
    /// Returns the cached path. An already cached model is not downloaded again.
    ///
    /// # Errors
    /// - Invalid URL
    /// - Network errors during download
    /// - SHA-256 mismatch when `expected_sha256` is given
    /// - File system errors during caching
    pub async fn download_model(
        &self,
        url: &str,
        model_id: &str,
        expected_sha256: Option<&str>,
        show_progress: bool,
    ) -> Result<PathBuf> {
        validate_model_url(url)?;
        let final_path = self.cache.get_model_path(model_id);

        if self.cache.is_model_cached(model_id) {
            log::info!("Model already cached: {}", model_id);
            return Ok(final_path);
        }

        log::info!("Downloading model {} from {}", model_id, url);
        let progress = if show_progress {
            Self::create_progress_indicator()
        } else {
            ProgressIndicator::NoOp
        };
        progress.set_message(format!("Downloading {model_id}"));

        let cache_dir = self.cache.get_current_cache_dir();
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{model_id}-"))
            .suffix(".part")
            .tempfile_in(cache_dir)
            .map_err(|e| {
                BgCleanError::file_io_error("create temporary download file", cache_dir, &e)
            })?;

        let result = self
            .download_file(url, temp.path(), &progress)
            .await
            .and_then(|downloaded| {
                if Self::verify_file_integrity(temp.path(), expected_sha256)? {
                    Ok(downloaded)
                } else {
                    Err(BgCleanError::network(format!(
                        "Checksum mismatch for {model_id} downloaded from {url}"
                    )))
                }
            });

        let downloaded = match result {
            Ok(downloaded) => downloaded,
            Err(e) => {
                progress.finish_with_message(format!("Download of {model_id} failed"));
                // the temporary file is removed when `temp` drops
                return Err(e);
            },
        };

        temp.persist(&final_path).map_err(|e| {
            BgCleanError::file_io_error("move downloaded model into cache", &final_path, &e.error)
        })?;

        progress.finish_with_message(format!("Downloaded {model_id}"));
        log::info!(
            "Downloaded {} ({} bytes) to {}",
            model_id,
            downloaded,
            final_path.display()
        );
        Ok(final_path)
    }

    fn create_progress_indicator() -> ProgressIndicator {
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            ProgressIndicator::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            ProgressIndicator::NoOp
        }
    }

    /// Stream `url` into `local_path`, returning the number of bytes written
    async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        progress: &ProgressIndicator,
    ) -> Result<u64> {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgCleanError::network_error(&format!("Failed to download {url}"), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BgCleanError::network(format!("HTTP error {status} for {url}")));
        }

        let total_size = response.content_length();
        if let Some(total) = total_size {
            progress.set_length(total);
        }

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| BgCleanError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| BgCleanError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| BgCleanError::file_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;
            if total_size.is_some() {
                progress.set_position(downloaded);
            } else {
                progress.set_message(format!(
                    "Downloaded {:.1} MB",
                    downloaded as f64 / 1_048_576.0
                ));
            }
        }

        file.flush()
            .await
            .map_err(|e| BgCleanError::file_io_error("flush file", local_path, &e))?;

        if downloaded == 0 {
            return Err(BgCleanError::network(format!("Empty response body from {url}")));
        }
        Ok(downloaded)
    }

    /// Check a file against a SHA-256 hex digest; `None` skips the check
    ///
    /// # Errors
    /// - Failed to read the file
    pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
        let Some(expected) = expected_hash else {
            return Ok(true);
        };

        let contents = fs::read(file_path).map_err(|e| {
            BgCleanError::file_io_error("read file for verification", file_path, &e)
        })?;

        let actual_hash = format!("{:x}", Sha256::digest(&contents));
        if actual_hash.eq_ignore_ascii_case(expected.trim()) {
            Ok(true)
        } else {
            log::warn!(
                "File integrity check failed for {}: expected {}, got {}",
                file_path.display(),
                expected,
                actual_hash
            );
            Ok(false)
        }
    }
}

/// Check that a model URL is a plain HTTP(S) URL
///
/// # Errors
/// - Empty URL or unsupported scheme
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(BgCleanError::invalid_config("Model URL cannot be empty"));
    }

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| {
            BgCleanError::invalid_config(format!(
                "Unsupported URL format: {url}. Expected an http:// or https:// URL"
            ))
        })?;

    if rest.split('/').next().map_or(true, str::is_empty) {
        return Err(BgCleanError::invalid_config(format!("Model URL has no host: {url}")));
    }

    Ok(())
}
