//! The per-image cleaning step
//!
//! Removes the subject, fills the hole with the photo's dominant color,
//! segments the filled image again and puts the original subject back on
//! top. Every phase is timed, reported and tagged on failure.

use crate::{
    compositing,
    config::CleanOptions,
    error::{BgCleanError, Result},
    segmenter::Segmenter,
    services::{
        ArtifactNames, ImageIOService, NoOpProgressReporter, ProgressReporter, ProgressTracker,
        TemporaryArtifact,
    },
    types::{CleanOutcome, CleanPhase, CleanTimings, SegmentationMask},
    utils::color,
};
use image::DynamicImage;
use instant::Instant;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, debug_span, instrument};

/// Runs phases in order, timing each one and tagging its errors
struct PhaseRunner<'a> {
    file: &'a str,
    tracker: ProgressTracker<'a>,
    timings: CleanTimings,
}

impl<'a> PhaseRunner<'a> {
    fn new(file: &'a str, tracker: ProgressTracker<'a>) -> Self {
        Self {
            file,
            tracker,
            timings: CleanTimings::default(),
        }
    }

    fn run<T>(&mut self, phase: CleanPhase, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.tracker.enter(phase);
        let span = debug_span!("phase", %phase);
        let _guard = span.enter();

        let start = Instant::now();
        let value = f().map_err(|e| e.in_step(self.file, phase))?;
        self.timings.record(phase, start.elapsed());
        self.tracker.finish(phase);
        Ok(value)
    }
}

/// Cleans the background of single photographs
pub struct BackgroundCleaner {
    segmenter: Box<dyn Segmenter>,
    options: CleanOptions,
    reporter: Arc<dyn ProgressReporter>,
}

impl BackgroundCleaner {
    #[must_use]
    pub fn new(segmenter: Box<dyn Segmenter>, options: CleanOptions) -> Self {
        Self {
            segmenter,
            options,
            reporter: Arc::new(NoOpProgressReporter),
        }
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn options(&self) -> CleanOptions {
        self.options
    }

    pub fn set_options(&mut self, options: CleanOptions) {
        self.options = options;
    }

    #[must_use]
    pub fn reporter(&self) -> &dyn ProgressReporter {
        self.reporter.as_ref()
    }

    /// Clean one image into `output_dir`
    ///
    /// Writes `<filename>.png` and returns its path with the per-phase
    /// timings. Intermediate files are removed before returning; on failure
    /// they are removed on a best-effort basis.
    ///
    /// # Errors
    /// - `BgCleanError::Step` naming the file and the phase that failed
    #[instrument(skip(self, input, output_dir), fields(input = %input.display()))]
    pub fn clean_file(&mut self, input: &Path, output_dir: &Path) -> Result<CleanOutcome> {
        let file = input
            .file_name()
            .map_or_else(|| input.display().to_string(), |n| n.to_string_lossy().into_owned());
        let reporter = Arc::clone(&self.reporter);
        let mut step =
            PhaseRunner::new(&file, ProgressTracker::new(reporter.as_ref(), file.as_str()));

        let result = self.run_phases(input, output_dir, &mut step);
        match &result {
            Ok(outcome) => step.tracker.report_completion(outcome),
            Err(e) => step.tracker.report_error(&e.root().to_string()),
        }
        result
    }

    fn run_phases(
        &mut self,
        input: &Path,
        output_dir: &Path,
        step: &mut PhaseRunner<'_>,
    ) -> Result<CleanOutcome> {
        let names = ArtifactNames::new(input, output_dir)
            .map_err(|e| e.in_step(step.file, CleanPhase::ReadSource))?;
        let options = self.options;
        let segmenter = &mut self.segmenter;

        let source_bytes = step.run(CleanPhase::ReadSource, || ImageIOService::read_bytes(input))?;

        let segmented = step.run(CleanPhase::FirstSegmentation, || {
            let cutout = segmenter.segment(&source_bytes)?;
            ImageIOService::decode_rgba(&cutout)
        })?;
        drop(source_bytes);
        let subject_mask = SegmentationMask::from_alpha(&segmented);
        debug!(coverage = subject_mask.coverage(), "Subject mask ready");

        let (object_layer, object_guard) = step.run(CleanPhase::ObjectExtraction, || {
            let object = compositing::extract_object(&segmented);
            let guard = if options.persist_object_layer {
                let guard = TemporaryArtifact::new(names.object.clone());
                ImageIOService::save_png(&DynamicImage::ImageRgba8(object.clone()), guard.path())?;
                Some(guard)
            } else {
                None
            };
            Ok((object, guard))
        })?;
        drop(segmented);

        let inverted = step.run(CleanPhase::MaskInversion, || Ok(subject_mask.inverted()))?;

        let oriented = step.run(CleanPhase::OrientationCorrection, || {
            let original = ImageIOService::open_oriented(input)?;
            let dimensions = (original.width(), original.height());
            if subject_mask.dimensions != dimensions {
                return Err(BgCleanError::dimension_mismatch(
                    "subject mask",
                    dimensions,
                    subject_mask.dimensions,
                ));
            }
            Ok(original.to_rgb8())
        })?;
        let dimensions = oriented.dimensions();

        let fill_color = step.run(CleanPhase::DominantColor, || {
            color::dominant_color_from_path(input)
        })?;

        let filled = step.run(CleanPhase::BackgroundFill, || {
            compositing::fill_background(&oriented, fill_color, &inverted)
        })?;
        drop(oriented);

        let temporary = step.run(CleanPhase::TemporaryWrite, || {
            let guard = TemporaryArtifact::new(names.temporary.clone());
            ImageIOService::save_png(&DynamicImage::ImageRgb8(filled), guard.path())?;
            Ok(guard)
        })?;

        let second = step.run(CleanPhase::SecondSegmentation, || {
            let filled_bytes = ImageIOService::read_bytes(temporary.path())?;
            let result = ImageIOService::decode_rgba(&segmenter.segment(&filled_bytes)?)?;
            if result.dimensions() != dimensions {
                return Err(BgCleanError::dimension_mismatch(
                    "second segmentation result",
                    dimensions,
                    result.dimensions(),
                ));
            }
            Ok(result)
        })?;

        let composed = step.run(CleanPhase::Recomposite, || {
            compositing::alpha_composite(&second, &object_layer)
        })?;

        step.run(CleanPhase::OutputWrite, || {
            ImageIOService::save_png(&DynamicImage::ImageRgba8(composed), &names.output)
        })?;

        step.run(CleanPhase::Cleanup, || {
            temporary.remove()?;
            if let Some(guard) = object_guard {
                guard.remove()?;
            }
            Ok(())
        })?;

        Ok(CleanOutcome {
            input_path: input.to_path_buf(),
            output_path: names.output,
            dimensions,
            dominant_color: fill_color,
            timings: std::mem::take(&mut step.timings),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ProgressUpdate;
    use crate::types::DominantColor;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Marks every pixel that differs from the top-left pixel as subject
    struct CornerSegmenter {
        calls: usize,
        fail_on_call: Option<usize>,
        shrink_output: bool,
    }

    impl CornerSegmenter {
        fn new() -> Self {
            Self {
                calls: 0,
                fail_on_call: None,
                shrink_output: false,
            }
        }
    }

    impl Segmenter for CornerSegmenter {
        fn segment(&mut self, image_bytes: &[u8]) -> Result<Vec<u8>> {
            self.calls += 1;
            if self.fail_on_call == Some(self.calls) {
                return Err(BgCleanError::inference("segmentation crashed"));
            }
            let image = ImageIOService::decode_oriented(image_bytes)?.to_rgba8();
            let background = *image.get_pixel(0, 0);
            let mut out = RgbaImage::from_fn(image.width(), image.height(), |x, y| {
                let px = *image.get_pixel(x, y);
                let differs = px
                    .0
                    .iter()
                    .zip(background.0.iter())
                    .take(3)
                    .any(|(a, b)| a.abs_diff(*b) > 40);
                if differs {
                    Rgba([px.0[0], px.0[1], px.0[2], 255])
                } else {
                    Rgba([0, 0, 0, 0])
                }
            });
            if self.shrink_output {
                out = image::imageops::crop_imm(&out, 0, 0, out.width() / 2, out.height())
                    .to_image();
            }
            ImageIOService::encode_png(&DynamicImage::ImageRgba8(out))
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        phases: Mutex<Vec<CleanPhase>>,
        errors: Mutex<Vec<CleanPhase>>,
        completions: Mutex<Vec<PathBuf>>,
    }

    impl ProgressReporter for RecordingReporter {
        fn report_progress(&self, update: ProgressUpdate) {
            self.phases.lock().unwrap().push(update.phase);
        }

        fn report_completion(&self, outcome: &CleanOutcome) {
            self.completions.lock().unwrap().push(outcome.output_path.clone());
        }

        fn report_error(&self, phase: CleanPhase, _error: &str) {
            self.errors.lock().unwrap().push(phase);
        }
    }

    /// Blue photo with a red square in the middle
    fn write_photo(dir: &Path, name: &str) -> PathBuf {
        let img = RgbImage::from_fn(40, 30, |x, y| {
            if (12..28).contains(&x) && (8..22).contains(&y) {
                Rgb([220, 20, 20])
            } else {
                Rgb([20, 40, 200])
            }
        });
        let path = dir.join(name);
        img.save_with_format(&path, image::ImageFormat::Png).unwrap();
        path
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("temp_removed_object_") || n.starts_with("object_"))
            .collect()
    }

    #[test]
    fn test_clean_file_keeps_subject_and_fills_background() {
        let input_dir = TempDir::new().unwrap();
        let output_dir = TempDir::new().unwrap();
        let input = write_photo(input_dir.path(), "photo.png");

        let reporter = Arc::new(RecordingReporter::default());
        let mut cleaner =
            BackgroundCleaner::new(Box::new(CornerSegmenter::new()), CleanOptions::default())
                .with_reporter(reporter.clone());
        let outcome = cleaner.clean_file(&input, output_dir.path()).unwrap();

        assert_eq!(outcome.output_path, output_dir.path().join("photo.png.png"));
        assert_eq!(outcome.dimensions, (40, 30));
        assert_eq!(outcome.timings.iter().count(), CleanPhase::ALL.len());

        let result = image::open(&outcome.output_path).unwrap().to_rgba8();
        assert_eq!(result.dimensions(), (40, 30));
        // subject is the opaque object layer
        assert_eq!(result.get_pixel(20, 15).0, [220, 20, 20, 255]);
        // the second pass sees a uniform background and removes it
        assert_eq!(result.get_pixel(1, 1).0[3], 0);

        assert_eq!(*reporter.phases.lock().unwrap(), CleanPhase::ALL.to_vec());
        assert_eq!(reporter.completions.lock().unwrap().len(), 1);
        assert!(leftovers(output_dir.path()).is_empty());
    }

    #[test]
    fn test_dominant_color_comes_from_original() {
        let dir = TempDir::new().unwrap();
        let input = write_photo(dir.path(), "photo.png");
        let mut cleaner =
            BackgroundCleaner::new(Box::new(CornerSegmenter::new()), CleanOptions::default());
        let outcome = cleaner.clean_file(&input, dir.path()).unwrap();

        let DominantColor { r, g, b } = outcome.dominant_color;
        assert!(b > 150 && r < 80 && g < 100, "expected blue, got {}", outcome.dominant_color);
    }

    #[test]
    fn test_object_layer_is_persisted_and_removed() {
        let dir = TempDir::new().unwrap();
        let input = write_photo(dir.path(), "IMG_001.JPG");
        let options = CleanOptions {
            persist_object_layer: true,
        };
        let mut cleaner = BackgroundCleaner::new(Box::new(CornerSegmenter::new()), options);
        let outcome = cleaner.clean_file(&input, dir.path()).unwrap();

        assert!(outcome.output_path.ends_with("IMG_001.JPG.png"));
        assert!(input.exists());
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn test_second_segmentation_failure_is_tagged_and_cleaned_up() {
        let dir = TempDir::new().unwrap();
        let input = write_photo(dir.path(), "photo.png");
        let segmenter = CornerSegmenter {
            fail_on_call: Some(2),
            ..CornerSegmenter::new()
        };
        let reporter = Arc::new(RecordingReporter::default());
        let options = CleanOptions {
            persist_object_layer: true,
        };
        let mut cleaner =
            BackgroundCleaner::new(Box::new(segmenter), options).with_reporter(reporter.clone());

        let err = cleaner.clean_file(&input, dir.path()).unwrap_err();
        assert_eq!(err.phase(), Some(CleanPhase::SecondSegmentation));
        assert_eq!(err.file(), Some("photo.png"));
        assert!(matches!(err.root(), BgCleanError::Inference(_)));

        assert_eq!(*reporter.errors.lock().unwrap(), vec![CleanPhase::SecondSegmentation]);
        assert!(leftovers(dir.path()).is_empty());
        assert!(!dir.path().join("photo.png.png").exists());
    }

    #[test]
    fn test_mask_size_mismatch_detected_at_orientation() {
        let dir = TempDir::new().unwrap();
        let input = write_photo(dir.path(), "photo.png");
        let segmenter = CornerSegmenter {
            shrink_output: true,
            ..CornerSegmenter::new()
        };
        let mut cleaner = BackgroundCleaner::new(Box::new(segmenter), CleanOptions::default());

        let err = cleaner.clean_file(&input, dir.path()).unwrap_err();
        assert_eq!(err.phase(), Some(CleanPhase::OrientationCorrection));
        assert!(matches!(err.root(), BgCleanError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_missing_input_fails_in_read_phase() {
        let dir = TempDir::new().unwrap();
        let mut cleaner =
            BackgroundCleaner::new(Box::new(CornerSegmenter::new()), CleanOptions::default());
        let err = cleaner
            .clean_file(&dir.path().join("missing.JPG"), dir.path())
            .unwrap_err();
        assert_eq!(err.phase(), Some(CleanPhase::ReadSource));
        assert_eq!(err.file(), Some("missing.JPG"));
    }
}
