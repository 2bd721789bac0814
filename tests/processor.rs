//! Adaptive processor tests over in-memory sources.

use std::sync::{Arc, Mutex};

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use scenecap::{
    AdaptiveVideoProcessor, CancellationToken, DecodeErrorPolicy, DetectorPhase,
    MemoryFrameSource, OperationType, ProgressCallback, ProgressInfo, ScanOptions,
    SceneChangeDetector, SceneSaver, ScenecapError, skip_rate_for_duration,
};

fn solid(shade: u8) -> RgbImage {
    RgbImage::from_pixel(16, 16, Rgb([shade, shade, shade]))
}

fn saved_indices(saver: &SceneSaver) -> Vec<u64> {
    saver.scenes().iter().map(|scene| scene.frame_index).collect()
}

// ── Skip rate ───────────────────────────────────────────────────────

#[test]
fn skip_rate_boundaries_are_inclusive() {
    assert_eq!(skip_rate_for_duration(0.0), 3);
    assert_eq!(skip_rate_for_duration(10.0), 3);
    assert_eq!(skip_rate_for_duration(10.0001), 5);
    assert_eq!(skip_rate_for_duration(15.0), 5);
    assert_eq!(skip_rate_for_duration(15.0001), 10);
    assert_eq!(skip_rate_for_duration(30.0), 10);
    assert_eq!(skip_rate_for_duration(30.0001), 15);
    assert_eq!(skip_rate_for_duration(45.0), 15);
    assert_eq!(skip_rate_for_duration(45.0001), 20);
    assert_eq!(skip_rate_for_duration(60.0), 20);
    assert_eq!(skip_rate_for_duration(60.0001), 30);
    assert_eq!(skip_rate_for_duration(7200.0), 30);
}

#[test]
fn zero_frame_rate_means_zero_duration() {
    let temp = TempDir::new().unwrap();
    let mut source = MemoryFrameSource::from_fn(10, 0.0, |_| solid(0));
    let mut saver = SceneSaver::new(temp.path());
    let mut processor = AdaptiveVideoProcessor::default();

    let summary = processor.process(&mut source, &mut saver).unwrap();
    assert_eq!(summary.duration, 0.0);
    assert_eq!(summary.skip_rate, 3);
    assert_eq!(summary.frames_decoded, 10);
    assert_eq!(summary.frames_sampled, 4);
}

// ── End-to-end over synthetic clips ─────────────────────────────────

#[test]
fn alternating_clip_saves_each_saturated_transition() {
    let temp = TempDir::new().unwrap();
    // 12 s at 30 fps, switching color every 2 s.
    let mut source = MemoryFrameSource::from_fn(360, 30.0, |index| {
        if (index / 60) % 2 == 0 {
            solid(0)
        } else {
            solid(255)
        }
    });
    let mut saver = SceneSaver::new(temp.path().join("scenes"));
    let mut processor = AdaptiveVideoProcessor::new(SceneChangeDetector::new(30));

    let summary = processor.process(&mut source, &mut saver).unwrap();

    assert_eq!(summary.skip_rate, 5);
    assert_eq!(summary.frames_decoded, 360);
    assert_eq!(summary.frames_sampled, 72);
    // Transitions at 60 and 120 fall inside the warm-up window.
    assert_eq!(saved_indices(&saver), vec![180, 240, 300]);
    assert_eq!(summary.scenes_saved, 3);
    assert_eq!(processor.detector().phase(), DetectorPhase::Uninitialized);

    for (position, scene) in saver.scenes().iter().enumerate() {
        assert_eq!(scene.number, position + 1);
        assert!(scene.path.exists());
    }
}

#[test]
fn uniform_clip_saves_nothing() {
    let temp = TempDir::new().unwrap();
    let mut source = MemoryFrameSource::from_fn(900, 30.0, |_| solid(77));
    let mut saver = SceneSaver::new(temp.path());
    let mut processor = AdaptiveVideoProcessor::default();

    let summary = processor.process(&mut source, &mut saver).unwrap();
    assert_eq!(summary.skip_rate, 10);
    assert_eq!(summary.boundaries_detected, 0);
    assert!(saver.is_empty());
}

#[test]
fn minimum_gap_suppresses_rapid_changes() {
    let temp = TempDir::new().unwrap();
    // 10 s at 30 fps, so every 3rd frame is sampled. Static until frame 120,
    // then the color flips on every sampled frame.
    let mut source = MemoryFrameSource::from_fn(300, 30.0, |index| {
        if index < 120 || (index / 3) % 2 == 1 {
            solid(0)
        } else {
            solid(255)
        }
    });
    let mut saver = SceneSaver::new(temp.path());
    let mut processor = AdaptiveVideoProcessor::default();

    let summary = processor.process(&mut source, &mut saver).unwrap();

    assert_eq!(summary.skip_rate, 3);
    assert_eq!(saved_indices(&saver), vec![120, 150, 180]);
    assert!(summary.boundaries_suppressed > 0);
    assert_eq!(
        summary.boundaries_detected,
        summary.boundaries_suppressed + summary.scenes_saved
    );

    let indices = saved_indices(&saver);
    for pair in indices.windows(2) {
        assert!(pair[1] - pair[0] >= 30);
    }
}

#[test]
fn custom_minimum_gap_is_honored() {
    let temp = TempDir::new().unwrap();
    let mut source = MemoryFrameSource::from_fn(300, 30.0, |index| {
        if index < 120 || (index / 3) % 2 == 1 {
            solid(0)
        } else {
            solid(255)
        }
    });
    let mut saver = SceneSaver::new(temp.path());
    let mut processor = AdaptiveVideoProcessor::default()
        .with_options(ScanOptions::new().with_min_frames_between_saves(60));

    processor.process(&mut source, &mut saver).unwrap();
    assert_eq!(saved_indices(&saver), vec![120, 180]);
}

// ── Reuse and reset ─────────────────────────────────────────────────

#[test]
fn processor_is_reusable_across_videos() {
    let temp = TempDir::new().unwrap();
    let clip = || {
        MemoryFrameSource::from_fn(360, 30.0, |index| {
            if (index / 60) % 2 == 0 { solid(0) } else { solid(255) }
        })
    };
    let mut processor = AdaptiveVideoProcessor::default();

    let mut first_saver = SceneSaver::new(temp.path().join("first"));
    let first = processor.process(&mut clip(), &mut first_saver).unwrap();

    let mut second_saver = SceneSaver::new(temp.path().join("second"));
    let second = processor.process(&mut clip(), &mut second_saver).unwrap();

    assert_eq!(first, second);
    assert_eq!(saved_indices(&first_saver), saved_indices(&second_saver));
}

// ── Decode errors ───────────────────────────────────────────────────

#[test]
fn decode_error_is_surfaced_by_default() {
    let temp = TempDir::new().unwrap();
    let mut source =
        MemoryFrameSource::from_fn(100, 30.0, |_| solid(0)).with_failure_at(50, "corrupt packet");
    let mut saver = SceneSaver::new(temp.path());
    let mut processor = AdaptiveVideoProcessor::default();

    let result = processor.process(&mut source, &mut saver);
    match result {
        Err(ScenecapError::VideoDecodeError(message)) => assert!(message.contains("corrupt")),
        other => panic!("expected a decode error, got {other:?}"),
    }
    assert_eq!(processor.detector().phase(), DetectorPhase::Uninitialized);
}

#[test]
fn decode_error_can_end_the_stream() {
    let temp = TempDir::new().unwrap();
    let mut source =
        MemoryFrameSource::from_fn(100, 30.0, |_| solid(0)).with_failure_at(50, "corrupt packet");
    let mut saver = SceneSaver::new(temp.path());
    let mut processor = AdaptiveVideoProcessor::default().with_options(
        ScanOptions::new().with_decode_error_policy(DecodeErrorPolicy::EndOfStream),
    );

    let summary = processor.process(&mut source, &mut saver).unwrap();
    assert_eq!(summary.frames_decoded, 50);
}

// ── Progress and cancellation ───────────────────────────────────────

#[test]
fn cancelled_scan_returns_error_and_resets() {
    let temp = TempDir::new().unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let mut source = MemoryFrameSource::from_fn(100, 30.0, |_| solid(0));
    let mut saver = SceneSaver::new(temp.path());
    let mut processor =
        AdaptiveVideoProcessor::default().with_options(ScanOptions::new().with_cancellation(token));

    let result = processor.process(&mut source, &mut saver);
    assert!(matches!(result, Err(ScenecapError::Cancelled)));
    assert_eq!(source.position(), 0);
    assert_eq!(processor.detector().phase(), DetectorPhase::Uninitialized);
}

struct CancelAfter {
    token: CancellationToken,
    after: u64,
}

impl ProgressCallback for CancelAfter {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.current >= self.after {
            self.token.cancel();
        }
    }
}

#[test]
fn cancellation_mid_scan_stops_reading() {
    let temp = TempDir::new().unwrap();
    let token = CancellationToken::new();
    let callback = Arc::new(CancelAfter {
        token: token.clone(),
        after: 20,
    });

    let mut source = MemoryFrameSource::from_fn(200, 30.0, |_| solid(0));
    let mut saver = SceneSaver::new(temp.path());
    let mut processor = AdaptiveVideoProcessor::default().with_options(
        ScanOptions::new()
            .with_progress(callback)
            .with_batch_size(10)
            .with_cancellation(token),
    );

    assert!(matches!(
        processor.process(&mut source, &mut saver),
        Err(ScenecapError::Cancelled)
    ));
    assert_eq!(source.position(), 20);
}

#[derive(Default)]
struct Recorder {
    infos: Mutex<Vec<ProgressInfo>>,
}

impl ProgressCallback for Recorder {
    fn on_progress(&self, info: &ProgressInfo) {
        self.infos.lock().unwrap().push(info.clone());
    }
}

#[test]
fn progress_reports_scan_frames() {
    let temp = TempDir::new().unwrap();
    let recorder = Arc::new(Recorder::default());

    let mut source = MemoryFrameSource::from_fn(90, 30.0, |_| solid(0));
    let mut saver = SceneSaver::new(temp.path());
    let mut processor = AdaptiveVideoProcessor::default().with_options(
        ScanOptions::new()
            .with_progress(recorder.clone())
            .with_batch_size(30),
    );
    processor.process(&mut source, &mut saver).unwrap();

    let infos = recorder.infos.lock().unwrap();
    // Three full batches and one final report.
    assert_eq!(infos.len(), 4);
    assert!(infos.iter().all(|info| info.operation == OperationType::SceneScan));
    assert_eq!(infos[0].current_frame, Some(29));
    assert_eq!(infos[0].total, Some(90));
    let last = infos.last().unwrap();
    assert_eq!(last.current, 90);
    assert_eq!(last.percentage, Some(100.0));
}
