//! Adaptive scene-change detection.
//!
//! The detector tracks the mean absolute luminance difference between
//! consecutive sampled frames in a fixed-capacity rolling window. Once the
//! window is full, a frame is a scene change when its difference is strictly
//! greater than the window's arithmetic mean. The threshold therefore adapts
//! to each video: a handheld clip with constant motion needs a larger jump
//! than a static talking-head shot.
//!
//! State lives in an explicit [`DetectorState`] value advanced by the pure
//! function [`step`]. [`SceneChangeDetector`] wraps that for callers that
//! prefer a mutable object.
//!
//! # Example
//!
//! ```
//! use image::{Rgb, RgbImage};
//! use scenecap::{DetectorPhase, SceneChangeDetector};
//!
//! let mut detector = SceneChangeDetector::new(2);
//! let dark = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
//! let light = RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]));
//!
//! detector.process_frame(dark.clone());
//! detector.process_frame(dark.clone());
//! detector.process_frame(dark);
//! assert_eq!(detector.phase(), DetectorPhase::Ready);
//! assert!(!detector.scene_changed());
//!
//! detector.process_frame(light);
//! assert!(detector.scene_changed());
//! ```

use image::{GrayImage, RgbImage, imageops::{self, FilterType}};

use crate::configuration::DEFAULT_NUM_DIFFS;
use crate::conversion::rgb_to_luma;

/// Where a detector is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorPhase {
    /// No frame has been processed since construction or the last reset.
    Uninitialized,
    /// At least one frame has been seen but the window is not yet full.
    Warm {
        /// Differences currently held in the window.
        samples: usize,
    },
    /// The window is full and verdicts are meaningful.
    Ready,
}

/// The verdict for one processed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SceneDecision {
    /// The window is not full yet. Never a change.
    WarmingUp,
    /// The latest difference did not exceed the rolling mean.
    Steady {
        /// Mean absolute difference against the previous frame.
        difference: f64,
        /// Rolling mean the difference was compared with.
        threshold: f64,
    },
    /// The latest difference exceeded the rolling mean.
    Changed {
        /// Mean absolute difference against the previous frame.
        difference: f64,
        /// Rolling mean the difference was compared with.
        threshold: f64,
    },
}

impl SceneDecision {
    /// Whether this decision reports a scene change.
    pub fn is_change(&self) -> bool {
        matches!(self, SceneDecision::Changed { .. })
    }
}

/// Everything the detector remembers between frames.
#[derive(Debug, Clone)]
pub struct DetectorState {
    num_diffs: usize,
    previous: Option<GrayImage>,
    latest: Option<RgbImage>,
    window: Vec<f64>,
    cursor: usize,
    latest_difference: Option<f64>,
}

impl Default for DetectorState {
    fn default() -> Self {
        Self::new(DEFAULT_NUM_DIFFS)
    }
}

impl DetectorState {
    /// Fresh state with a window of `num_diffs` differences (at least 1).
    pub fn new(num_diffs: usize) -> Self {
        let num_diffs = num_diffs.max(1);
        Self {
            num_diffs,
            previous: None,
            latest: None,
            window: Vec::with_capacity(num_diffs),
            cursor: 0,
            latest_difference: None,
        }
    }

    /// Window capacity.
    pub fn num_diffs(&self) -> usize {
        self.num_diffs
    }

    /// Differences currently held, oldest slot first (ring order, not age order).
    pub fn window(&self) -> &[f64] {
        &self.window
    }

    /// The most recently processed frame.
    pub fn latest_frame(&self) -> Option<&RgbImage> {
        self.latest.as_ref()
    }

    /// Difference computed for the most recent frame, if it had a predecessor.
    pub fn latest_difference(&self) -> Option<f64> {
        self.latest_difference
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> DetectorPhase {
        if self.previous.is_none() {
            DetectorPhase::Uninitialized
        } else if self.window.len() < self.num_diffs {
            DetectorPhase::Warm {
                samples: self.window.len(),
            }
        } else {
            DetectorPhase::Ready
        }
    }

    /// Verdict for the current window contents.
    pub fn decision(&self) -> SceneDecision {
        let difference = match self.latest_difference {
            Some(difference) if self.window.len() >= self.num_diffs => difference,
            _ => return SceneDecision::WarmingUp,
        };

        let threshold = self.window.iter().sum::<f64>() / self.window.len() as f64;
        if difference > threshold {
            SceneDecision::Changed {
                difference,
                threshold,
            }
        } else {
            SceneDecision::Steady {
                difference,
                threshold,
            }
        }
    }

    /// Forget every frame and difference, keeping the window capacity.
    pub fn reset(&mut self) {
        *self = Self::new(self.num_diffs);
    }

    fn push_difference(&mut self, difference: f64) {
        if self.window.len() < self.num_diffs {
            self.window.push(difference);
        } else {
            self.window[self.cursor] = difference;
        }
        self.cursor = (self.cursor + 1) % self.num_diffs;
        self.latest_difference = Some(difference);
    }
}

/// Advance `state` by one frame and report the verdict.
///
/// The first frame after construction or a reset produces no difference. A
/// previous frame with different dimensions is resized to the current frame's
/// size before differencing.
pub fn step(mut state: DetectorState, frame: RgbImage) -> (DetectorState, SceneDecision) {
    let luma = rgb_to_luma(&frame);

    if let Some(previous) = state.previous.take() {
        let difference = mean_absolute_difference(&previous, &luma);
        state.push_difference(difference);
    }

    state.previous = Some(luma);
    state.latest = Some(frame);
    let decision = state.decision();
    (state, decision)
}

/// Mean absolute per-pixel difference between two luminance planes.
///
/// `previous` is resized to `current`'s dimensions when they differ.
pub fn mean_absolute_difference(previous: &GrayImage, current: &GrayImage) -> f64 {
    let (width, height) = current.dimensions();
    if width == 0 || height == 0 {
        return 0.0;
    }

    let resized;
    let previous = if previous.dimensions() != (width, height) {
        log::debug!(
            "Resizing previous frame {:?} to {width}x{height}",
            previous.dimensions()
        );
        resized = imageops::resize(previous, width, height, FilterType::Triangle);
        &resized
    } else {
        previous
    };

    let total: u64 = previous
        .as_raw()
        .iter()
        .zip(current.as_raw())
        .map(|(&a, &b)| u64::from(a.abs_diff(b)))
        .sum();

    total as f64 / (u64::from(width) * u64::from(height)) as f64
}

/// Stateful wrapper over [`step`].
///
/// A detector must be [reset](SceneChangeDetector::reset_state) before it is
/// reused for another video. The processor does this on every exit path.
#[derive(Debug, Clone, Default)]
pub struct SceneChangeDetector {
    state: DetectorState,
}

impl SceneChangeDetector {
    /// Create a detector with a window of `num_diffs` differences (at least 1).
    pub fn new(num_diffs: usize) -> Self {
        Self {
            state: DetectorState::new(num_diffs),
        }
    }

    /// Feed one sampled frame.
    pub fn process_frame(&mut self, frame: RgbImage) -> SceneDecision {
        let state = std::mem::take(&mut self.state);
        let (state, decision) = step(state, frame);
        self.state = state;
        decision
    }

    /// Whether the most recent frame was a scene change. False while warming up.
    pub fn scene_changed(&self) -> bool {
        self.state.decision().is_change()
    }

    /// The most recently processed frame.
    pub fn get_scene(&self) -> Option<&RgbImage> {
        self.state.latest_frame()
    }

    /// Return to [`DetectorPhase::Uninitialized`].
    pub fn reset_state(&mut self) {
        self.state.reset();
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> DetectorPhase {
        self.state.phase()
    }

    /// Read access to the underlying state.
    pub fn state(&self) -> &DetectorState {
        &self.state
    }
}
