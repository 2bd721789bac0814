//! Decodable frame sources.
//!
//! The scan loop only needs three things from a video: its frame rate, its
//! (estimated) frame count, and the next decoded frame. [`FrameSource`]
//! captures exactly that, so the processor runs the same way over an FFmpeg
//! decoder ([`VideoFile`](crate::VideoFile)) and over frames held in memory
//! ([`MemoryFrameSource`]).

use std::collections::VecDeque;
use std::fmt::{Debug, Formatter, Result as FmtResult};

use image::RgbImage;

use crate::conversion::duration_from_frames;
use crate::error::ScenecapError;

/// A sequential source of decoded RGB frames.
pub trait FrameSource {
    /// Nominal frame rate in frames per second. May be zero when unknown.
    fn frames_per_second(&self) -> f64;

    /// Total frame count as reported by the container. May be an estimate.
    fn frame_count(&self) -> u64;

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` at the end of the stream. A frame that cannot be
    /// decoded is an `Err`, which callers may choose to treat as the end.
    fn read_frame(&mut self) -> Result<Option<RgbImage>, ScenecapError>;

    /// Duration in seconds derived from the frame count and frame rate.
    fn duration_seconds(&self) -> f64 {
        duration_from_frames(self.frame_count(), self.frames_per_second())
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn frames_per_second(&self) -> f64 {
        (**self).frames_per_second()
    }

    fn frame_count(&self) -> u64 {
        (**self).frame_count()
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>, ScenecapError> {
        (**self).read_frame()
    }

    fn duration_seconds(&self) -> f64 {
        (**self).duration_seconds()
    }
}

/// Replays frames held in memory.
///
/// Useful for synthetic clips and for driving the scan loop in tests. A
/// decode failure can be injected at a given position with
/// [`with_failure_at`](MemoryFrameSource::with_failure_at).
///
/// # Example
///
/// ```
/// use image::{Rgb, RgbImage};
/// use scenecap::{FrameSource, MemoryFrameSource};
///
/// let mut source = MemoryFrameSource::from_fn(60, 30.0, |index| {
///     let shade = if index < 30 { 0 } else { 255 };
///     RgbImage::from_pixel(8, 8, Rgb([shade, shade, shade]))
/// });
/// assert_eq!(source.duration_seconds(), 2.0);
/// assert!(source.read_frame()?.is_some());
/// # Ok::<(), scenecap::ScenecapError>(())
/// ```
pub struct MemoryFrameSource {
    frames: VecDeque<RgbImage>,
    frames_per_second: f64,
    frame_count: u64,
    position: u64,
    failure: Option<(u64, String)>,
}

impl Debug for MemoryFrameSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("MemoryFrameSource")
            .field("remaining", &self.frames.len())
            .field("frames_per_second", &self.frames_per_second)
            .field("frame_count", &self.frame_count)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl MemoryFrameSource {
    /// Wrap a list of frames played back at `frames_per_second`.
    pub fn new(frames: Vec<RgbImage>, frames_per_second: f64) -> Self {
        let frame_count = frames.len() as u64;
        Self {
            frames: frames.into(),
            frames_per_second,
            frame_count,
            position: 0,
            failure: None,
        }
    }

    /// Generate `count` frames by calling `make_frame` with each index.
    pub fn from_fn<F>(count: u64, frames_per_second: f64, make_frame: F) -> Self
    where
        F: FnMut(u64) -> RgbImage,
    {
        Self::new((0..count).map(make_frame).collect(), frames_per_second)
    }

    /// Fail with [`ScenecapError::VideoDecodeError`] when frame `index` is read.
    #[must_use]
    pub fn with_failure_at(mut self, index: u64, message: impl Into<String>) -> Self {
        self.failure = Some((index, message.into()));
        self
    }

    /// Override the frame count the source reports, as a container might.
    #[must_use]
    pub fn with_reported_frame_count(mut self, frame_count: u64) -> Self {
        self.frame_count = frame_count;
        self
    }

    /// Number of frames returned so far.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl FrameSource for MemoryFrameSource {
    fn frames_per_second(&self) -> f64 {
        self.frames_per_second
    }

    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>, ScenecapError> {
        if let Some((index, message)) = &self.failure {
            if *index == self.position {
                return Err(ScenecapError::VideoDecodeError(format!(
                    "frame {index}: {message}"
                )));
            }
        }

        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.position += 1;
        }
        Ok(frame)
    }
}
