//! Services kept separate from the cleaning logic: image I/O and progress reporting

pub mod io;
pub mod progress;

pub use io::{ArtifactNames, ImageIOService, TemporaryArtifact};
pub use progress::{
    ConsoleProgressReporter, NoOpProgressReporter, ProgressReporter, ProgressTracker,
    ProgressUpdate,
};
