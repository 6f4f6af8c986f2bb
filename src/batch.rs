//! Batch orchestration
//!
//! Input discovery, a synchronous runner for the non-interactive variant
//! and a worker-thread runner that reports through a channel of
//! [`BatchEvent`]s for the interactive variant.

use crate::{
    config::{BatchConfig, InputFilter},
    error::{BgCleanError, Result},
    pipeline::BackgroundCleaner,
    services::ArtifactNames,
    types::{CleanOutcome, CleanPhase},
};
use chrono::{DateTime, Utc};
use instant::{Duration, Instant};
use serde::Serialize;
use std::collections::hash_map::{Entry, HashMap};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Name of the interactive worker thread
pub const WORKER_THREAD_NAME: &str = "bgclean-worker";

/// List the files in `dir` accepted by `filter`, sorted by file name
///
/// Only regular files directly inside `dir` are considered.
///
/// # Errors
/// - `dir` is missing or unreadable
pub fn discover_inputs(dir: &Path, filter: &InputFilter) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        BgCleanError::invalid_config(format!("Cannot read input folder {}: {e}", dir.display()))
    })?;

    let mut inputs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| BgCleanError::file_io_error("list input folder", dir, &e))?;
        let is_file = entry.file_type().is_ok_and(|t| t.is_file());
        let path = entry.path();
        if is_file && filter.accepts(&path) {
            inputs.push(path);
        }
    }

    inputs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(inputs)
}

/// Inputs of a batch: the filter first, then the optional glob on file names
///
/// # Errors
/// - Unreadable input folder or invalid pattern
pub fn discover_batch_inputs(config: &BatchConfig) -> Result<Vec<PathBuf>> {
    let inputs = discover_inputs(&config.input_dir, &config.filter)?;
    let Some(pattern) = &config.pattern else {
        return Ok(inputs);
    };

    let pattern = glob::Pattern::new(pattern).map_err(|e| {
        BgCleanError::invalid_config(format!("Invalid file pattern '{pattern}': {e}"))
    })?;
    Ok(inputs
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| pattern.matches(n))
        })
        .collect())
}

/// Validate the configuration, find the inputs and create the output folder
fn prepare(config: &BatchConfig) -> Result<Vec<PathBuf>> {
    config.validate()?;
    let inputs = discover_batch_inputs(config)?;
    if inputs.is_empty() {
        return Err(BgCleanError::NoInputs(config.input_dir.clone()));
    }
    std::fs::create_dir_all(&config.output_dir)
        .map_err(|e| BgCleanError::file_io_error("create output folder", &config.output_dir, &e))?;
    check_artifact_collisions(config, &inputs)?;
    Ok(inputs)
}

fn canonical_or_raw(dir: &Path) -> PathBuf {
    std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf())
}

/// Reject batches where a file one item writes is another item's input or artifact
///
/// `x.png` next to `x.png.png` or `temp_removed_object_x.png` would otherwise
/// clobber an unprocessed input or a finished output.
fn check_artifact_collisions(config: &BatchConfig, inputs: &[PathBuf]) -> Result<()> {
    let input_dir = canonical_or_raw(&config.input_dir);
    let output_dir = canonical_or_raw(&config.output_dir);

    let mut claimed: HashMap<PathBuf, (&Path, &'static str)> = inputs
        .iter()
        .filter_map(|input| Some((input_dir.join(input.file_name()?), (input.as_path(), "input"))))
        .collect();

    for input in inputs {
        let names = ArtifactNames::new(input, &output_dir)?;
        let mut artifacts = vec![("output", names.output), ("temporary file", names.temporary)];
        if config.clean.persist_object_layer {
            artifacts.push(("object layer", names.object));
        }

        for (role, path) in artifacts {
            match claimed.entry(path) {
                Entry::Occupied(entry) => {
                    let (owner, owner_role) = *entry.get();
                    return Err(BgCleanError::invalid_config(format!(
                        "The {role} of {} would overwrite the {owner_role} of {}: {}",
                        input.display(),
                        owner.display(),
                        entry.key().display()
                    )));
                },
                Entry::Vacant(entry) => {
                    entry.insert((input.as_path(), role));
                },
            }
        }
    }
    Ok(())
}

/// Progress of a batch after an item finished
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchProgress {
    /// Items finished, successful or not
    pub completed: usize,
    pub total: usize,
    /// Wall time since the batch started
    pub elapsed: Duration,
}

impl BatchProgress {
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed)
    }

    /// Running average time per item
    #[must_use]
    pub fn average(&self) -> Duration {
        match u32::try_from(self.completed) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.elapsed / n,
        }
    }

    /// Estimated time left: `average * remaining`
    #[must_use]
    pub fn eta(&self) -> Duration {
        self.average()
            .saturating_mul(u32::try_from(self.remaining()).unwrap_or(u32::MAX))
    }

    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// A failed item as listed in the summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub file: PathBuf,
    /// Phase of the per-image step, when the failure happened inside it
    pub phase: Option<CleanPhase>,
    pub message: String,
}

impl ItemFailure {
    fn from_error(file: &Path, error: &BgCleanError) -> Self {
        Self {
            file: file.to_path_buf(),
            phase: error.phase(),
            message: error.root().to_string(),
        }
    }
}

/// Outcome of a batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    /// Items cleaned successfully
    pub processed: usize,
    pub failed: usize,
    /// Items never started because the batch was cancelled or aborted
    pub skipped: usize,
    pub failures: Vec<ItemFailure>,
    pub outputs: Vec<PathBuf>,
    pub elapsed: Duration,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
}

impl BatchSummary {
    fn started(total: usize) -> Self {
        let now = Utc::now();
        Self {
            total,
            processed: 0,
            failed: 0,
            skipped: 0,
            failures: Vec::new(),
            outputs: Vec::new(),
            elapsed: Duration::ZERO,
            started_at: now,
            finished_at: now,
            cancelled: false,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && !self.cancelled
    }
}

/// Messages from the batch worker to the interface
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started {
        total: usize,
    },
    /// Item `index` (1-based) is about to be cleaned
    ItemStarted {
        index: usize,
        file: PathBuf,
    },
    ItemCompleted {
        file: PathBuf,
        output: PathBuf,
        progress: BatchProgress,
    },
    ItemFailed {
        file: PathBuf,
        phase: Option<CleanPhase>,
        message: String,
        progress: BatchProgress,
    },
    Finished(BatchSummary),
}

/// Run the items in order, emitting events; stops early on cancellation or,
/// without `continue_on_error`, on the first failure, which is returned alongside
fn process_items(
    cleaner: &mut BackgroundCleaner,
    config: &BatchConfig,
    inputs: &[PathBuf],
    cancel: &CancellationToken,
    mut emit: impl FnMut(BatchEvent),
) -> (BatchSummary, Option<BgCleanError>) {
    let total = inputs.len();
    let start = Instant::now();
    let mut summary = BatchSummary::started(total);
    let mut abort = None;
    cleaner.set_options(config.clean);

    for (i, input) in inputs.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("Batch cancelled after {i} of {total} items");
            summary.cancelled = true;
            break;
        }

        let index = i + 1;
        let file_name = input
            .file_name()
            .map_or_else(|| input.display().to_string(), |n| n.to_string_lossy().into_owned());
        cleaner.reporter().report_batch_item(index, total, &file_name);
        emit(BatchEvent::ItemStarted {
            index,
            file: input.clone(),
        });

        let result: Result<CleanOutcome> = cleaner.clean_file(input, &config.output_dir);
        let progress = BatchProgress {
            completed: index,
            total,
            elapsed: start.elapsed(),
        };

        match result {
            Ok(outcome) => {
                summary.processed += 1;
                emit(BatchEvent::ItemCompleted {
                    file: input.clone(),
                    output: outcome.output_path.clone(),
                    progress,
                });
                summary.outputs.push(outcome.output_path);
            },
            Err(error) => {
                warn!("Failed to clean {}: {}", input.display(), error);
                let failure = ItemFailure::from_error(input, &error);
                summary.failed += 1;
                emit(BatchEvent::ItemFailed {
                    file: input.clone(),
                    phase: failure.phase,
                    message: failure.message.clone(),
                    progress,
                });
                summary.failures.push(failure);

                if !config.continue_on_error {
                    abort = Some(error);
                    break;
                }
            },
        }
    }

    summary.skipped = total - summary.processed - summary.failed;
    summary.elapsed = start.elapsed();
    summary.finished_at = Utc::now();
    (summary, abort)
}

/// Clean every input of the batch on the calling thread
///
/// # Errors
/// - Invalid configuration, unreadable or empty input folder
/// - Without `continue_on_error`, the first item failure (tagged with file and phase)
pub fn run_batch(cleaner: &mut BackgroundCleaner, config: &BatchConfig) -> Result<BatchSummary> {
    let inputs = prepare(config)?;
    info!(
        "Cleaning {} image(s) from {} into {}",
        inputs.len(),
        config.input_dir.display(),
        config.output_dir.display()
    );

    let (summary, abort) =
        process_items(cleaner, config, &inputs, &CancellationToken::new(), |_| {});
    match abort {
        Some(error) => Err(error),
        None => Ok(summary),
    }
}

/// A validated batch ready to run on a worker thread
#[derive(Debug)]
pub struct BatchRunner {
    config: BatchConfig,
    inputs: Vec<PathBuf>,
}

impl BatchRunner {
    /// Check the configuration and find the inputs without starting any work
    ///
    /// # Errors
    /// - Invalid configuration, unreadable or empty input folder
    pub fn prepare(config: BatchConfig) -> Result<Self> {
        let inputs = prepare(&config)?;
        Ok(Self { config, inputs })
    }

    #[must_use]
    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Start the batch on the worker thread
    ///
    /// Events arrive on the returned receiver, ending with
    /// [`BatchEvent::Finished`]. The cleaner is handed back by
    /// [`BatchHandle::join`].
    ///
    /// # Errors
    /// - The worker thread could not be spawned
    pub fn spawn(
        self,
        mut cleaner: BackgroundCleaner,
    ) -> Result<(BatchHandle, UnboundedReceiver<BatchEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let Self { config, inputs } = self;

        let handle = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let send = |tx: &UnboundedSender<BatchEvent>, event: BatchEvent| {
                    if tx.send(event).is_err() {
                        // interface is gone, nobody to report to
                        worker_cancel.cancel();
                    }
                };

                send(&tx, BatchEvent::Started {
                    total: inputs.len(),
                });
                let (summary, _) =
                    process_items(&mut cleaner, &config, &inputs, &worker_cancel, |event| {
                        send(&tx, event);
                    });
                info!(
                    processed = summary.processed,
                    failed = summary.failed,
                    cancelled = summary.cancelled,
                    "Batch worker finished"
                );
                send(&tx, BatchEvent::Finished(summary));
                cleaner
            })
            .map_err(|e| BgCleanError::internal(format!("Failed to spawn batch worker: {e}")))?;

        Ok((
            BatchHandle {
                cancel,
                handle: Some(handle),
            },
            rx,
        ))
    }
}

/// Cancel and join point of a running batch
///
/// Dropping the handle cancels the batch and waits for the worker.
pub struct BatchHandle {
    cancel: CancellationToken,
    handle: Option<JoinHandle<BackgroundCleaner>>,
}

impl BatchHandle {
    /// Stop after the item in flight
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the worker and take back the cleaner
    ///
    /// # Errors
    /// - The worker panicked or was already joined
    pub fn join(mut self) -> Result<BackgroundCleaner> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| BgCleanError::internal("Batch worker already joined"))?;
        handle
            .join()
            .map_err(|_| BgCleanError::internal("Batch worker panicked"))
    }
}

impl Drop for BatchHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.cancel.cancel();
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CleanOptions;
    use crate::segmenter::Segmenter;
    use crate::services::ImageIOService;
    use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
    use tempfile::TempDir;

    /// Treats the whole frame as subject
    struct OpaqueSegmenter;

    impl Segmenter for OpaqueSegmenter {
        fn segment(&mut self, image_bytes: &[u8]) -> Result<Vec<u8>> {
            let image = ImageIOService::decode_oriented(image_bytes)?.to_rgba8();
            let out = RgbaImage::from_fn(image.width(), image.height(), |x, y| {
                let p = image.get_pixel(x, y).0;
                Rgba([p[0], p[1], p[2], 255])
            });
            ImageIOService::encode_png(&DynamicImage::ImageRgba8(out))
        }
    }

    fn cleaner() -> BackgroundCleaner {
        BackgroundCleaner::new(Box::new(OpaqueSegmenter), CleanOptions::default())
    }

    fn write_image(dir: &Path, name: &str) {
        let img = RgbImage::from_fn(6, 4, |x, y| {
            if x >= 4 && y >= 2 {
                Rgb([200, 60, 40])
            } else {
                Rgb([30, 90, 160])
            }
        });
        img.save_with_format(dir.join(name), image::ImageFormat::Png).unwrap();
    }

    #[test]
    fn test_discover_inputs_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["b.JPG", "a.JPG", "c.jpg", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.JPG")).unwrap();

        let found = discover_inputs(dir.path(), &InputFilter::non_interactive()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.JPG"]);

        let all = discover_inputs(dir.path(), &InputFilter::interactive()).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_discover_applies_pattern() {
        let dir = TempDir::new().unwrap();
        for name in ["IMG_1.png", "IMG_2.png", "other.png"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let config = BatchConfig::interactive(dir.path(), dir.path())
            .with_pattern(Some("IMG_*".to_string()));
        assert_eq!(discover_batch_inputs(&config).unwrap().len(), 2);
    }

    #[test]
    fn test_progress_average_and_eta() {
        let progress = BatchProgress {
            completed: 2,
            total: 5,
            elapsed: Duration::from_secs(4),
        };
        assert_eq!(progress.remaining(), 3);
        assert_eq!(progress.average(), Duration::from_secs(2));
        assert_eq!(progress.eta(), Duration::from_secs(6));
        assert!((progress.fraction() - 0.4).abs() < f64::EPSILON);

        let done = BatchProgress {
            completed: 5,
            total: 5,
            elapsed: Duration::from_secs(10),
        };
        assert_eq!(done.eta(), Duration::ZERO);

        let none = BatchProgress {
            completed: 0,
            total: 5,
            elapsed: Duration::ZERO,
        };
        assert_eq!(none.average(), Duration::ZERO);
    }

    #[test]
    fn test_eta_non_increasing_for_constant_cost() {
        let total = 6;
        let etas: Vec<Duration> = (1..=total)
            .map(|completed| {
                BatchProgress {
                    completed,
                    total,
                    elapsed: Duration::from_millis(250) * completed as u32,
                }
                .eta()
            })
            .collect();
        assert!(etas.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(etas.last().copied(), Some(Duration::ZERO));
    }

    #[test]
    fn test_run_batch_empty_folder() {
        let dir = TempDir::new().unwrap();
        let config = BatchConfig::non_interactive(dir.path(), dir.path().join("out"));
        let err = run_batch(&mut cleaner(), &config).unwrap_err();
        assert!(matches!(err, BgCleanError::NoInputs(_)));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_run_batch_processes_all() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_image(input.path(), "one.JPG");
        write_image(input.path(), "two.JPG");

        let config = BatchConfig::non_interactive(input.path(), output.path());
        let summary = run_batch(&mut cleaner(), &config).unwrap();
        assert_eq!(summary.processed, 2);
        assert!(summary.is_success());
        assert!(output.path().join("one.JPG.png").exists());
        assert!(output.path().join("two.JPG.png").exists());
    }

    #[test]
    fn test_worker_reports_events_in_order() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_image(input.path(), "a.png");
        write_image(input.path(), "b.png");

        let runner =
            BatchRunner::prepare(BatchConfig::interactive(input.path(), output.path())).unwrap();
        assert_eq!(runner.inputs().len(), 2);
        let (handle, mut rx) = runner.spawn(cleaner()).unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.blocking_recv() {
            events.push(event);
        }
        handle.join().unwrap();

        assert!(matches!(events.first(), Some(BatchEvent::Started { total: 2 })));
        let completed: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::ItemCompleted { progress, .. } => Some(progress.completed),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![1, 2]);
        match events.last() {
            Some(BatchEvent::Finished(summary)) => {
                assert_eq!(summary.processed, 2);
                assert!(!summary.cancelled);
            },
            other => panic!("expected Finished, got {other:?}"),
        }
    }
}
