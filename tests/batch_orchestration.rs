//! Batch discovery, worker events, failure handling and cancellation

mod common;

use common::{cleaner, leftovers, photo, write_photos, write_png, ThresholdSegmenter, BLUE, RED};
use imgly_bgclean::{
    discover_batch_inputs, run_batch, BatchConfig, BatchEvent, BatchRunner, BatchSummary,
    BgCleanError, CleanOptions, CleanPhase,
};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

async fn collect_events(rx: &mut UnboundedReceiver<BatchEvent>) -> (Vec<BatchEvent>, BatchSummary) {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        if let BatchEvent::Finished(summary) = event {
            return (events, summary);
        }
        events.push(event);
    }
    panic!("worker closed the channel without a summary");
}

#[test]
fn test_default_suffix_is_case_sensitive() {
    let dir = TempDir::new().unwrap();
    write_photos(dir.path(), &["b.JPG", "a.JPG", "c.jpg", "d.png", "notes.txt"]);

    let inputs =
        discover_batch_inputs(&BatchConfig::non_interactive(dir.path(), dir.path())).unwrap();
    let names: Vec<_> = inputs
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.JPG", "b.JPG"]);

    let interactive =
        discover_batch_inputs(&BatchConfig::interactive(dir.path(), dir.path())).unwrap();
    assert_eq!(interactive.len(), 4);
}

#[tokio::test]
async fn test_worker_reports_every_item_with_shrinking_eta() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_photos(input.path(), &["1.JPG", "2.JPG", "3.JPG", "4.JPG"]);

    let runner =
        BatchRunner::prepare(BatchConfig::interactive(input.path(), output.path())).unwrap();
    assert_eq!(runner.inputs().len(), 4);
    let segmenter = ThresholdSegmenter::with_delay(Duration::from_millis(5));
    let (handle, mut rx) = runner
        .spawn(cleaner(segmenter.clone(), CleanOptions::default()))
        .unwrap();

    let (events, summary) = collect_events(&mut rx).await;
    handle.join().unwrap();

    assert!(matches!(events.first(), Some(BatchEvent::Started { total: 4 })));
    let progress: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            BatchEvent::ItemCompleted { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect();
    assert_eq!(
        progress.iter().map(|p| p.completed).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert!(progress.iter().all(|p| p.total == 4));
    assert!(progress[0].eta() > Duration::ZERO);
    assert_eq!(progress[3].eta(), Duration::ZERO);
    assert!((progress[3].fraction() - 1.0).abs() < f64::EPSILON);

    assert!(summary.is_success());
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.outputs.len(), 4);
    assert_eq!(segmenter.call_count(), 8);
    assert!(leftovers(output.path()).is_empty());
}

#[tokio::test]
async fn test_worker_continues_past_broken_file() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_photos(input.path(), &["a.JPG", "c.JPG"]);
    std::fs::write(input.path().join("b.JPG"), b"not a jpeg").unwrap();

    let runner =
        BatchRunner::prepare(BatchConfig::interactive(input.path(), output.path())).unwrap();
    let (handle, mut rx) = runner
        .spawn(cleaner(ThresholdSegmenter::default(), CleanOptions::default()))
        .unwrap();
    let (events, summary) = collect_events(&mut rx).await;
    handle.join().unwrap();

    let failed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            BatchEvent::ItemFailed {
                file,
                phase,
                progress,
                ..
            } => Some((file.clone(), *phase, progress.completed)),
            _ => None,
        })
        .collect();
    assert_eq!(
        failed,
        vec![(input.path().join("b.JPG"), Some(CleanPhase::FirstSegmentation), 2)]
    );

    assert_eq!((summary.processed, summary.failed, summary.skipped), (2, 1, 0));
    assert!(!summary.is_success());
    assert!(output.path().join("a.JPG.png").exists());
    assert!(output.path().join("c.JPG.png").exists());
    assert!(!output.path().join("b.JPG.png").exists());
    assert!(leftovers(output.path()).is_empty());
}

#[test]
fn test_run_batch_aborts_on_first_failure() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    std::fs::write(input.path().join("a.JPG"), b"garbage").unwrap();
    write_png(input.path(), "b.JPG", &photo(24, 24, BLUE, RED));

    let segmenter = ThresholdSegmenter::default();
    let mut cleaner = cleaner(segmenter.clone(), CleanOptions::default());
    let error = run_batch(&mut cleaner, &BatchConfig::non_interactive(input.path(), output.path()))
        .unwrap_err();

    assert_eq!(error.phase(), Some(CleanPhase::FirstSegmentation));
    assert_eq!(error.file(), Some("a.JPG"));
    assert_eq!(segmenter.call_count(), 1);
    assert!(!output.path().join("b.JPG.png").exists());
}

#[test]
fn test_run_batch_rejects_missing_or_empty_input() {
    let output = TempDir::new().unwrap();
    let mut cleaner = cleaner(ThresholdSegmenter::default(), CleanOptions::default());

    let missing = output.path().join("nope");
    assert!(matches!(
        run_batch(&mut cleaner, &BatchConfig::non_interactive(&missing, output.path())),
        Err(BgCleanError::InvalidConfig(_))
    ));

    let empty = TempDir::new().unwrap();
    assert!(matches!(
        run_batch(&mut cleaner, &BatchConfig::non_interactive(empty.path(), output.path())),
        Err(BgCleanError::NoInputs(_))
    ));
}

#[test]
fn test_run_batch_creates_output_folder() {
    let input = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let output = root.path().join("nested").join("OutputImages");
    write_photos(input.path(), &["x.JPG"]);

    let mut cleaner = cleaner(ThresholdSegmenter::default(), CleanOptions::default());
    let summary =
        run_batch(&mut cleaner, &BatchConfig::non_interactive(input.path(), &output)).unwrap();

    assert_eq!(summary.outputs, vec![output.join("x.JPG.png")]);
    assert!(output.join("x.JPG.png").is_file());
}

#[test]
fn test_run_batch_rejects_artifact_landing_on_another_item() {
    let dir = TempDir::new().unwrap();
    write_photos(dir.path(), &["x.png", "temp_removed_object_x.png"]);

    let segmenter = ThresholdSegmenter::default();
    let mut cleaner = cleaner(segmenter.clone(), CleanOptions::default());
    let error =
        run_batch(&mut cleaner, &BatchConfig::interactive(dir.path(), dir.path())).unwrap_err();

    assert!(matches!(error, BgCleanError::InvalidConfig(_)));
    let message = error.to_string();
    assert!(message.contains("temp_removed_object_x.png.png"), "{message}");
    assert!(message.contains("x.png"), "{message}");
    assert_eq!(segmenter.call_count(), 0);
    assert!(!dir.path().join("x.png.png").exists());
    assert!(dir.path().join("temp_removed_object_x.png").is_file());
}

#[test]
fn test_run_batch_rejects_output_landing_on_unprocessed_input() {
    let dir = TempDir::new().unwrap();
    write_photos(dir.path(), &["x.png", "x.png.png"]);
    let before = std::fs::read(dir.path().join("x.png.png")).unwrap();

    let segmenter = ThresholdSegmenter::default();
    let mut cleaner = cleaner(segmenter.clone(), CleanOptions::default());
    let result = run_batch(&mut cleaner, &BatchConfig::interactive(dir.path(), dir.path()));

    assert!(matches!(result, Err(BgCleanError::InvalidConfig(_))));
    assert_eq!(segmenter.call_count(), 0);
    assert_eq!(std::fs::read(dir.path().join("x.png.png")).unwrap(), before);
}

#[test]
fn test_lookalike_names_are_fine_with_separate_output_folder() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_photos(input.path(), &["x.png", "x.png.png"]);

    let mut cleaner = cleaner(ThresholdSegmenter::default(), CleanOptions::default());
    let config = BatchConfig::interactive(input.path(), output.path());
    let summary = run_batch(&mut cleaner, &config).unwrap();

    assert_eq!(
        summary.outputs,
        vec![output.path().join("x.png.png"), output.path().join("x.png.png.png")]
    );
    assert!(summary.outputs.iter().all(|p| p.is_file()));
    assert!(leftovers(output.path()).is_empty());

    // Artifacts of both items share the output folder, wherever the inputs live
    write_photos(input.path(), &["temp_removed_object_x.png"]);
    assert!(matches!(
        run_batch(&mut cleaner, &config),
        Err(BgCleanError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_cancel_stops_after_item_in_flight() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_photos(input.path(), &["1.JPG", "2.JPG", "3.JPG", "4.JPG", "5.JPG", "6.JPG"]);

    let runner =
        BatchRunner::prepare(BatchConfig::interactive(input.path(), output.path())).unwrap();
    let (handle, mut rx) = runner
        .spawn(cleaner(
            ThresholdSegmenter::with_delay(Duration::from_millis(40)),
            CleanOptions::default(),
        ))
        .unwrap();

    let summary = loop {
        match rx.recv().await {
            Some(BatchEvent::ItemCompleted { .. }) => handle.cancel(),
            Some(BatchEvent::Finished(summary)) => break summary,
            Some(_) => {},
            None => panic!("worker closed the channel without a summary"),
        }
    };
    handle.join().unwrap();

    assert!(summary.cancelled);
    assert!(summary.processed >= 1);
    assert!(summary.skipped > 0);
    assert_eq!(summary.processed + summary.failed + summary.skipped, 6);
    assert!(leftovers(output.path()).is_empty());
}

#[tokio::test]
async fn test_dropping_handle_stops_worker() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_photos(input.path(), &["1.JPG", "2.JPG", "3.JPG"]);

    let runner =
        BatchRunner::prepare(BatchConfig::interactive(input.path(), output.path())).unwrap();
    let segmenter = ThresholdSegmenter::with_delay(Duration::from_millis(40));
    let (handle, mut rx) = runner
        .spawn(cleaner(segmenter.clone(), CleanOptions::default()))
        .unwrap();

    assert!(matches!(rx.recv().await, Some(BatchEvent::Started { total: 3 })));
    drop(handle);

    // the worker is joined by now; whatever it sent ends with the summary
    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        last = Some(event);
    }
    let Some(BatchEvent::Finished(summary)) = last else {
        panic!("expected a final summary");
    };
    assert!(summary.cancelled);
    assert!(segmenter.call_count() < 6);
}
