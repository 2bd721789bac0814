//! Progress and cancellation integration tests.

use std::sync::{Arc, Mutex};

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use scenecap::{
    AdaptiveVideoProcessor, CacheOptions, CancellationToken, CaptionEngine,
    ContentAddressedCache, MemoryCollection, MemoryFrameSource, OperationType, ProgressCallback,
    ProgressInfo, ScanOptions, SceneSaver, ScenecapError, VideoCaptioner,
};

// ── CancellationToken ──────────────────────────────────────────────

#[test]
fn cancellation_token_default_not_cancelled() {
    let token = CancellationToken::new();
    assert!(!token.is_cancelled());
}

#[test]
fn cancellation_token_clone_shares_state() {
    let token = CancellationToken::new();
    let clone = token.clone();
    assert!(!clone.is_cancelled());

    token.cancel();
    assert!(clone.is_cancelled());
}

#[test]
fn cancellation_token_default_trait() {
    let token = CancellationToken::default();
    assert!(!token.is_cancelled());
}

// ── ProgressCallback ───────────────────────────────────────────────

#[derive(Default)]
struct RecordingProgress {
    infos: Mutex<Vec<ProgressInfo>>,
}

impl ProgressCallback for RecordingProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.infos.lock().unwrap().push(info.clone());
    }
}

fn clip(frames: u64) -> MemoryFrameSource {
    MemoryFrameSource::from_fn(frames, 30.0, |index| {
        let shade = if (index / 60) % 2 == 0 { 0 } else { 255 };
        RgbImage::from_pixel(16, 16, Rgb([shade, shade, shade]))
    })
}

#[test]
fn scan_progress_is_monotonic() {
    let temp = TempDir::new().unwrap();
    let recorder = Arc::new(RecordingProgress::default());
    let mut processor = AdaptiveVideoProcessor::default().with_options(
        ScanOptions::new()
            .with_progress(recorder.clone())
            .with_batch_size(50),
    );
    let mut saver = SceneSaver::new(temp.path());
    processor.process(&mut clip(360), &mut saver).unwrap();

    let infos = recorder.infos.lock().unwrap();
    assert!(!infos.is_empty());
    for pair in infos.windows(2) {
        assert!(pair[1].current >= pair[0].current);
        assert!(pair[1].scenes_captured >= pair[0].scenes_captured);
    }
    let last = infos.last().unwrap();
    assert_eq!(last.current, 360);
    assert_eq!(last.scenes_captured, 3);
    assert!(last.current_frame.is_none());
}

#[test]
fn unknown_frame_count_reports_no_percentage() {
    let temp = TempDir::new().unwrap();
    let recorder = Arc::new(RecordingProgress::default());
    let mut processor = AdaptiveVideoProcessor::default()
        .with_options(ScanOptions::new().with_progress(recorder.clone()));
    let mut saver = SceneSaver::new(temp.path());
    let mut source = clip(20).with_reported_frame_count(0);
    processor.process(&mut source, &mut saver).unwrap();

    let infos = recorder.infos.lock().unwrap();
    assert!(infos.iter().all(|info| info.total.is_none()));
    assert!(infos.iter().all(|info| info.percentage.is_none()));
}

#[test]
fn overstated_frame_count_never_exceeds_full() {
    let temp = TempDir::new().unwrap();
    let recorder = Arc::new(RecordingProgress::default());
    let mut processor = AdaptiveVideoProcessor::default()
        .with_options(ScanOptions::new().with_progress(recorder.clone()));
    let mut saver = SceneSaver::new(temp.path());
    let mut source = clip(30).with_reported_frame_count(10);
    processor.process(&mut source, &mut saver).unwrap();

    let infos = recorder.infos.lock().unwrap();
    assert!(
        infos
            .iter()
            .all(|info| info.percentage.is_some_and(|pct| pct <= 100.0))
    );
}

struct EchoEngine;

impl CaptionEngine for EchoEngine {
    fn name(&self) -> &str {
        "echo"
    }

    fn load(&mut self) -> Result<(), ScenecapError> {
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn caption(&self, image: &RgbImage) -> Result<String, ScenecapError> {
        Ok(format!("{}x{}", image.width(), image.height()))
    }
}

#[test]
fn captioning_reports_its_own_operation() {
    let temp = TempDir::new().unwrap();
    let recorder = Arc::new(RecordingProgress::default());
    let processor = AdaptiveVideoProcessor::default()
        .with_options(ScanOptions::new().with_progress(recorder.clone()).with_batch_size(1000));
    let cache = ContentAddressedCache::new(
        Arc::new(MemoryCollection::new("captions")),
        CacheOptions::new(),
    )
    .unwrap();
    let mut captioner = VideoCaptioner::new(EchoEngine, cache)
        .with_processor(processor)
        .with_scene_dir(temp.path().join("scenes"));

    let report = captioner.caption_video(&mut clip(360)).unwrap();
    assert_eq!(report.caption, "16x16 16x16 16x16");

    let infos = recorder.infos.lock().unwrap();
    let captioning: Vec<&ProgressInfo> = infos
        .iter()
        .filter(|info| info.operation == OperationType::Captioning)
        .collect();
    // One report per scene plus the final one.
    assert_eq!(captioning.len(), 4);
    assert_eq!(captioning[0].total, Some(3));
    assert_eq!(captioning.last().unwrap().current, 3);
    assert!(
        infos
            .iter()
            .any(|info| info.operation == OperationType::SceneScan)
    );
}
