//! Interactive session state
//!
//! Holds the operator's folder selections and enforces when a batch may be
//! started: only from [`SessionState::Ready`], and never while one is running.

use crate::{
    batch::BatchRunner,
    config::BatchConfig,
    error::{BgCleanError, Result},
};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// At least one folder is missing
    Idle,
    /// Both folders selected, a batch can start
    Ready,
    /// A batch is running; selections are locked
    Processing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Ready => write!(f, "ready"),
            Self::Processing => write!(f, "processing"),
        }
    }
}

/// Folder selections and batch options of the interactive front end
#[derive(Debug, Clone)]
pub struct InteractiveSession {
    input_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    pattern: Option<String>,
    continue_on_error: bool,
    state: SessionState,
}

impl Default for InteractiveSession {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractiveSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            input_dir: None,
            output_dir: None,
            pattern: None,
            continue_on_error: true,
            state: SessionState::Idle,
        }
    }

    /// Restrict input file names with a glob pattern
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

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn input_dir(&self) -> Option<&Path> {
        self.input_dir.as_deref()
    }

    #[must_use]
    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    fn ensure_not_processing(&self, action: &str) -> Result<()> {
        if self.state == SessionState::Processing {
            return Err(BgCleanError::invalid_config(format!(
                "Cannot {action} while a batch is processing"
            )));
        }
        Ok(())
    }

    fn refresh_state(&mut self) {
        let ready =
            self.input_dir.as_deref().is_some_and(Path::is_dir) && self.output_dir.is_some();
        self.state = if ready {
            SessionState::Ready
        } else {
            SessionState::Idle
        };
        debug!(state = %self.state, "Session state updated");
    }

    /// Select the folder to read images from
    ///
    /// # Errors
    /// - A batch is processing
    /// - `dir` is not an existing directory
    pub fn select_input<P: Into<PathBuf>>(&mut self, dir: P) -> Result<SessionState> {
        self.ensure_not_processing("change the input folder")?;
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(BgCleanError::invalid_config(format!(
                "Input folder does not exist: {}",
                dir.display()
            )));
        }
        self.input_dir = Some(dir);
        self.refresh_state();
        Ok(self.state)
    }

    /// Select the folder to write results to; it is created when the batch starts
    ///
    /// # Errors
    /// - A batch is processing
    pub fn select_output<P: Into<PathBuf>>(&mut self, dir: P) -> Result<SessionState> {
        self.ensure_not_processing("change the output folder")?;
        self.output_dir = Some(dir.into());
        self.refresh_state();
        Ok(self.state)
    }

    /// Forget both folder selections
    ///
    /// # Errors
    /// - A batch is processing
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_not_processing("clear the selection")?;
        self.input_dir = None;
        self.output_dir = None;
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Batch configuration for the current selections
    ///
    /// # Errors
    /// - A folder has not been selected
    pub fn batch_config(&self) -> Result<BatchConfig> {
        let (Some(input), Some(output)) = (&self.input_dir, &self.output_dir) else {
            return Err(BgCleanError::invalid_config(
                "Select both an input and an output folder first",
            ));
        };
        Ok(BatchConfig::interactive(input.clone(), output.clone())
            .with_pattern(self.pattern.clone())
            .with_continue_on_error(self.continue_on_error))
    }

    /// Prepare a batch and move to `Processing`
    ///
    /// On error the session keeps its state so the operator can fix the
    /// selection and retry.
    ///
    /// # Errors
    /// - The session is not `Ready`
    /// - Invalid configuration, unreadable or empty input folder
    pub fn start(&mut self) -> Result<BatchRunner> {
        if self.state != SessionState::Ready {
            return Err(BgCleanError::invalid_config(format!(
                "Cannot start a batch while the session is {}",
                self.state
            )));
        }

        let runner = BatchRunner::prepare(self.batch_config()?)?;
        info!(
            inputs = runner.inputs().len(),
            "Batch prepared, session is processing"
        );
        self.state = SessionState::Processing;
        Ok(runner)
    }

    /// The running batch ended (finished, cancelled or failed)
    ///
    /// Selections are kept, so the session is `Ready` again while the input
    /// folder still exists.
    pub fn finish(&mut self) -> SessionState {
        self.refresh_state();
        self.state
    }
}
