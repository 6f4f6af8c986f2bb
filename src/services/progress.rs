//! Progress reporting service
//!
//! The cleaning pipeline reports each phase of the per-image step through a
//! [`ProgressReporter`]; front ends decide how (or whether) to show it.

use crate::types::{CleanOutcome, CleanPhase};
use instant::Instant;

/// Progress of one phase within the per-image step
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub phase: CleanPhase,
    /// File name of the item being cleaned
    pub file: String,
    /// Progress percentage (0-100) within the current item
    pub progress: u8,
    pub description: String,
    /// Elapsed time since the item started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(phase: CleanPhase, file: &str, start_time: Instant) -> Self {
        Self {
            phase,
            file: file.to_string(),
            progress: (phase.progress_fraction() * 100.0).round() as u8,
            description: phase.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
        }
    }
}

/// Receives progress from the cleaning pipeline
pub trait ProgressReporter: Send + Sync {
    /// A phase of the per-image step has finished
    fn report_progress(&self, update: ProgressUpdate);

    /// The per-image step finished successfully
    fn report_completion(&self, outcome: &CleanOutcome);

    /// The per-image step failed in `phase`
    fn report_error(&self, phase: CleanPhase, error: &str);

    /// The batch is about to clean item `index` (1-based) of `total`
    fn report_batch_item(&self, index: usize, total: usize, file: &str) {
        let _ = (index, total, file);
    }
}

/// Discards all progress
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _outcome: &CleanOutcome) {}

    fn report_error(&self, _phase: CleanPhase, _error: &str) {}
}

/// Textual progress through the `log` facade
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// `verbose` adds a line per phase and the per-phase timings
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{:>3}%] {}: {} ({}ms elapsed)",
                update.progress,
                update.file,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::debug!("[{:>3}%] {}: {}", update.progress, update.file, update.description);
        }
    }

    fn report_completion(&self, outcome: &CleanOutcome) {
        log::info!("Cleaned {}", outcome.summary());

        if self.verbose {
            for (phase, elapsed) in outcome.timings.iter() {
                log::info!("    {phase}: {:.1}ms", elapsed.as_secs_f64() * 1000.0);
            }
        }
    }

    fn report_error(&self, phase: CleanPhase, error: &str) {
        log::error!("Error during {phase}: {error}");
    }

    fn report_batch_item(&self, index: usize, total: usize, file: &str) {
        log::info!("[{index}/{total}] Processing {file}");
    }
}

/// Tracks the current phase of one item and forwards to a reporter
pub struct ProgressTracker<'a> {
    reporter: &'a dyn ProgressReporter,
    file: String,
    start_time: Instant,
    current_phase: Option<CleanPhase>,
}

impl<'a> ProgressTracker<'a> {
    #[must_use]
    pub fn new(reporter: &'a dyn ProgressReporter, file: impl Into<String>) -> Self {
        Self {
            reporter,
            file: file.into(),
            start_time: Instant::now(),
            current_phase: None,
        }
    }

    /// Mark `phase` as entered; the update is sent when it finishes
    pub fn enter(&mut self, phase: CleanPhase) {
        self.current_phase = Some(phase);
    }

    /// Report that `phase` has finished
    pub fn finish(&mut self, phase: CleanPhase) {
        self.current_phase = Some(phase);
        self.reporter
            .report_progress(ProgressUpdate::new(phase, &self.file, self.start_time));
    }

    pub fn report_completion(&self, outcome: &CleanOutcome) {
        self.reporter.report_completion(outcome);
    }

    /// Report an error against the phase that was running
    pub fn report_error(&self, error: &str) {
        let phase = self.current_phase.unwrap_or(CleanPhase::ReadSource);
        self.reporter.report_error(phase, error);
    }

    #[must_use]
    pub fn current_phase(&self) -> Option<CleanPhase> {
        self.current_phase
    }
}
