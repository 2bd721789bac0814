//! The adaptive scan loop.
//!
//! [`AdaptiveVideoProcessor`] reads every frame of a [`FrameSource`], feeds
//! only every Nth one to its [`SceneChangeDetector`] (N chosen from the
//! video's duration by [`skip_rate_for_duration`]), and hands confirmed
//! boundaries to a [`SceneSaver`]. A boundary closer than
//! `min_frames_between_saves` decoded frames to the last saved scene is
//! dropped, which keeps a single cut from producing a burst of near-identical
//! captures.
//!
//! # Example
//!
//! ```no_run
//! use image::{Rgb, RgbImage};
//! use scenecap::{AdaptiveVideoProcessor, MemoryFrameSource, SceneChangeDetector, SceneSaver};
//!
//! // Twelve seconds at 30 fps, cutting between black and white every two seconds.
//! let mut video = MemoryFrameSource::from_fn(360, 30.0, |index| {
//!     let shade = if (index / 60) % 2 == 0 { 0 } else { 255 };
//!     RgbImage::from_pixel(64, 36, Rgb([shade, shade, shade]))
//! });
//! let mut saver = SceneSaver::new("extracted_images");
//! let mut processor = AdaptiveVideoProcessor::new(SceneChangeDetector::default());
//!
//! let summary = processor.process(&mut video, &mut saver)?;
//! println!("{} scenes from {} frames", summary.scenes_saved, summary.frames_decoded);
//! # Ok::<(), scenecap::ScenecapError>(())
//! ```

use serde::Serialize;

use crate::configuration::{DecodeErrorPolicy, ScanOptions};
use crate::detector::{DetectorPhase, SceneChangeDetector};
use crate::error::ScenecapError;
use crate::progress::{OperationType, ProgressTracker};
use crate::saver::SceneSaver;
use crate::source::FrameSource;

/// Sampling rate for a video of the given duration in seconds.
///
/// Bucket upper bounds are inclusive: exactly 10 seconds samples every 3rd
/// frame, anything longer up to 15 seconds every 5th.
///
/// ```
/// use scenecap::skip_rate_for_duration;
///
/// assert_eq!(skip_rate_for_duration(10.0), 3);
/// assert_eq!(skip_rate_for_duration(10.0001), 5);
/// assert_eq!(skip_rate_for_duration(3600.0), 30);
/// ```
pub fn skip_rate_for_duration(seconds: f64) -> u64 {
    match seconds {
        s if s <= 10.0 => 3,
        s if s <= 15.0 => 5,
        s if s <= 30.0 => 10,
        s if s <= 45.0 => 15,
        s if s <= 60.0 => 20,
        _ => 30,
    }
}

/// Counters from one scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingSummary {
    /// Duration in seconds the skip rate was derived from.
    pub duration: f64,
    /// Only frames whose index is a multiple of this were sampled.
    pub skip_rate: u64,
    /// Frames read from the source.
    pub frames_decoded: u64,
    /// Frames fed to the detector.
    pub frames_sampled: u64,
    /// Scene changes the detector reported.
    pub boundaries_detected: u64,
    /// Scene changes dropped by the minimum-gap rule.
    pub boundaries_suppressed: u64,
    /// Scenes handed to the saver.
    pub scenes_saved: u64,
}

/// Drives one [`SceneChangeDetector`] over successive videos.
///
/// A processor is not meant to scan two videos at once; `process` takes
/// `&mut self` for the duration of a scan.
#[derive(Debug, Default)]
pub struct AdaptiveVideoProcessor {
    detector: SceneChangeDetector,
    options: ScanOptions,
}

impl AdaptiveVideoProcessor {
    /// Create a processor around `detector` with default [`ScanOptions`].
    pub fn new(detector: SceneChangeDetector) -> Self {
        Self {
            detector,
            options: ScanOptions::default(),
        }
    }

    /// Replace the scan options.
    #[must_use]
    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    /// The owned detector.
    pub fn detector(&self) -> &SceneChangeDetector {
        &self.detector
    }

    /// The active scan options.
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Scan `source` to the end, saving accepted scenes through `saver`.
    ///
    /// The detector is reset before returning, whether the scan finished,
    /// failed, or was cancelled.
    ///
    /// # Errors
    ///
    /// - [`ScenecapError::Cancelled`] if the cancellation token fired.
    /// - The source's decode error, under [`DecodeErrorPolicy::Surface`].
    /// - I/O or image errors from the saver.
    pub fn process<S: FrameSource + ?Sized>(
        &mut self,
        source: &mut S,
        saver: &mut SceneSaver,
    ) -> Result<ProcessingSummary, ScenecapError> {
        let result = self.scan(source, saver);
        self.detector.reset_state();
        debug_assert_eq!(self.detector.phase(), DetectorPhase::Uninitialized);
        result
    }

    fn scan<S: FrameSource + ?Sized>(
        &mut self,
        source: &mut S,
        saver: &mut SceneSaver,
    ) -> Result<ProcessingSummary, ScenecapError> {
        let duration = source.duration_seconds();
        let skip_rate = skip_rate_for_duration(duration);
        let min_gap = self.options.min_frames_between_saves;
        let mut summary = ProcessingSummary {
            duration,
            skip_rate,
            ..ProcessingSummary::default()
        };

        log::info!(
            "Scanning {:.2}s of video ({} frames at {:.3} fps), sampling every {skip_rate} frames",
            duration,
            source.frame_count(),
            source.frames_per_second()
        );

        let mut tracker = ProgressTracker::new(
            self.options.progress.clone(),
            OperationType::SceneScan,
            Some(source.frame_count()),
            self.options.batch_size,
        );

        let mut frame_index: u64 = 0;
        let mut last_saved: u64 = 0;

        loop {
            if self.options.is_cancelled() {
                log::info!("Scan cancelled at frame {frame_index}");
                return Err(ScenecapError::Cancelled);
            }

            let frame = match source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(error) => match self.options.decode_errors {
                    DecodeErrorPolicy::Surface => return Err(error),
                    DecodeErrorPolicy::EndOfStream => {
                        log::warn!("Treating decode failure at frame {frame_index} as end of stream: {error}");
                        break;
                    }
                },
            };
            summary.frames_decoded += 1;

            if frame_index % skip_rate == 0 {
                summary.frames_sampled += 1;
                let decision = self.detector.process_frame(frame);

                if decision.is_change() {
                    summary.boundaries_detected += 1;
                    let gap = frame_index.saturating_sub(last_saved);

                    if gap >= min_gap {
                        if let Some(scene) = self.detector.get_scene() {
                            saver.save_scene(scene.clone(), frame_index)?;
                            last_saved = frame_index;
                            summary.scenes_saved += 1;
                            log::debug!("Scene change at frame {frame_index}: {decision:?}");
                        }
                    } else {
                        summary.boundaries_suppressed += 1;
                        log::debug!(
                            "Scene change at frame {frame_index} suppressed ({gap} frames since last save)"
                        );
                    }
                }
            }

            tracker.advance(Some(frame_index), saver.len());
            frame_index += 1;
        }

        tracker.finish(saver.len());
        log::info!(
            "Scan complete: {} frames decoded, {} sampled, {} scenes saved",
            summary.frames_decoded,
            summary.frames_sampled,
            summary.scenes_saved
        );
        Ok(summary)
    }
}
