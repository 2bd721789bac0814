//! Configuration.
//!
//! Two layers, mirroring how the crate is used:
//!
//! - [`ScanOptions`] and [`CacheOptions`] are builders that thread
//!   operational settings (progress callbacks, cancellation, gap policy,
//!   worker counts) through the processor and the cache without widening
//!   every signature.
//! - [`AppConfig`] is the file-backed configuration loaded from JSON. Every
//!   section and field has a default, so `{}` is a valid configuration.
//!
//! # Example
//!
//! ```no_run
//! use scenecap::{AppConfig, ScanOptions};
//!
//! let config = AppConfig::load("scenecap.json")?;
//! let options = ScanOptions::from(&config.scan).with_batch_size(100);
//! # Ok::<(), scenecap::ScenecapError>(())
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ScenecapError;
use crate::inference::CaptionBackend;
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};

/// Default capacity of the detector's rolling difference window.
pub const DEFAULT_NUM_DIFFS: usize = 30;

/// Default minimum number of decoded frames between two persisted scenes.
pub const DEFAULT_MIN_FRAMES_BETWEEN_SAVES: u64 = 30;

/// What the scan loop does when the frame source fails to decode a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeErrorPolicy {
    /// Stop the scan and return the decode error. This is the default.
    #[default]
    Surface,
    /// Log the failure and treat it as the end of the stream.
    EndOfStream,
}

/// Settings for one scan of a video.
///
/// A default-constructed value applies the standard 30-frame gap, surfaces
/// decode errors, and reports no progress.
#[derive(Clone)]
pub struct ScanOptions {
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) batch_size: u64,
    pub(crate) min_frames_between_saves: u64,
    pub(crate) decode_errors: DecodeErrorPolicy,
}

impl Debug for ScanOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ScanOptions")
            .field("has_cancellation", &self.cancellation.is_some())
            .field("batch_size", &self.batch_size)
            .field("min_frames_between_saves", &self.min_frames_between_saves)
            .field("decode_errors", &self.decode_errors)
            .finish()
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            batch_size: 1,
            min_frames_between_saves: DEFAULT_MIN_FRAMES_BETWEEN_SAVES,
            decode_errors: DecodeErrorPolicy::default(),
        }
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token.
    ///
    /// When the token is cancelled the scan stops before the next read and
    /// returns [`ScenecapError::Cancelled`].
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Fire the progress callback every `size` decoded frames. Clamped to at least 1.
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Minimum decoded-frame distance between two persisted scenes.
    #[must_use]
    pub fn with_min_frames_between_saves(mut self, frames: u64) -> Self {
        self.min_frames_between_saves = frames;
        self
    }

    /// Choose how decode failures are handled.
    #[must_use]
    pub fn with_decode_error_policy(mut self, policy: DecodeErrorPolicy) -> Self {
        self.decode_errors = policy;
        self
    }

    /// The configured minimum gap.
    pub fn min_frames_between_saves(&self) -> u64 {
        self.min_frames_between_saves
    }

    /// The configured decode-error policy.
    pub fn decode_error_policy(&self) -> DecodeErrorPolicy {
        self.decode_errors
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }
}

impl From<&ScanConfig> for ScanOptions {
    fn from(config: &ScanConfig) -> Self {
        ScanOptions::new()
            .with_min_frames_between_saves(config.min_frames_between_saves)
            .with_decode_error_policy(config.decode_errors)
    }
}

/// Sizing of the background persistence queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    pub(crate) workers: usize,
    pub(crate) queue_capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 64,
        }
    }
}

impl CacheOptions {
    /// Create options with default settings (2 workers, 64 queued jobs).
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of worker threads. Clamped to at least 1.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Maximum number of jobs waiting for a worker. Clamped to at least 1.
    ///
    /// Submitting to a full queue blocks until a worker frees a slot.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// The configured worker count.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// The configured queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

impl From<&CacheConfig> for CacheOptions {
    fn from(config: &CacheConfig) -> Self {
        CacheOptions::new()
            .with_workers(config.workers)
            .with_queue_capacity(config.queue_capacity)
    }
}

/// Image normalization applied before content keys are derived.
///
/// Changing either value changes every key: the key space is scoped to one
/// normalization configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Exact `(width, height)` the image is resized to.
    pub resize: (u32, u32),
    /// Side of the square center crop taken from the resized image.
    pub center_crop: u32,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            resize: (256, 256),
            center_crop: 224,
        }
    }
}

impl NormalizationConfig {
    /// Check that the crop fits inside the resized image.
    pub fn validate(&self) -> Result<(), ScenecapError> {
        let (width, height) = self.resize;
        if width == 0 || height == 0 {
            return Err(ScenecapError::InvalidConfiguration(format!(
                "normalization.resize must be non-zero, got {width}x{height}"
            )));
        }
        if self.center_crop == 0 {
            return Err(ScenecapError::InvalidConfiguration(
                "normalization.center_crop must be non-zero".to_string(),
            ));
        }
        if self.center_crop > width || self.center_crop > height {
            return Err(ScenecapError::InvalidConfiguration(format!(
                "normalization.center_crop ({}) exceeds resize {width}x{height}",
                self.center_crop
            )));
        }
        Ok(())
    }
}

/// Scene scan settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Capacity of the detector's rolling difference window.
    pub num_diffs: usize,
    /// Minimum decoded-frame distance between persisted scenes.
    pub min_frames_between_saves: u64,
    /// Ephemeral directory scene frames are written to while captioning.
    pub scene_dir: PathBuf,
    /// Decode-failure handling.
    pub decode_errors: DecodeErrorPolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            num_diffs: DEFAULT_NUM_DIFFS,
            min_frames_between_saves: DEFAULT_MIN_FRAMES_BETWEEN_SAVES,
            scene_dir: PathBuf::from("extracted_images"),
            decode_errors: DecodeErrorPolicy::default(),
        }
    }
}

/// Caption engine selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Which model family captions the scenes.
    pub backend: CaptionBackend,
    /// HTTP endpoint of the caption server.
    pub endpoint: Option<String>,
    /// Model id override. `None` uses the backend's default model.
    pub model: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            backend: CaptionBackend::Blip2,
            endpoint: None,
            model: None,
            timeout_secs: 120,
        }
    }
}

impl InferenceConfig {
    /// The model id sent to the engine.
    pub fn model_id(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.backend.default_model())
    }
}

/// Embedding store and persistence queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory of the on-disk embedding store.
    pub store_path: PathBuf,
    /// Collection records are written to.
    pub collection: String,
    /// Background worker threads.
    pub workers: usize,
    /// Bounded queue capacity.
    pub queue_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let options = CacheOptions::default();
        Self {
            store_path: PathBuf::from("scenecap_store"),
            collection: "image_captions".to_string(),
            workers: options.workers,
            queue_capacity: options.queue_capacity,
        }
    }
}

/// Complete file-backed configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Tensor normalization (also scopes the content-key space).
    pub normalization: NormalizationConfig,
    /// Scene scan settings.
    pub scan: ScanConfig,
    /// Caption engine selection.
    pub inference: InferenceConfig,
    /// Embedding store settings.
    pub cache: CacheConfig,
}

impl AppConfig {
    /// Load and validate a JSON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScenecapError> {
        let path = path.as_ref();
        log::debug!("Loading configuration from {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(text: &str) -> Result<Self, ScenecapError> {
        let config: AppConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section for out-of-range values.
    pub fn validate(&self) -> Result<(), ScenecapError> {
        self.normalization.validate()?;

        if self.scan.num_diffs == 0 {
            return Err(ScenecapError::InvalidConfiguration(
                "scan.num_diffs must be at least 1".to_string(),
            ));
        }
        if self.scan.scene_dir.as_os_str().is_empty() {
            return Err(ScenecapError::InvalidConfiguration(
                "scan.scene_dir must not be empty".to_string(),
            ));
        }
        if self.inference.model_id().trim().is_empty() {
            return Err(ScenecapError::InvalidConfiguration(
                "inference.model must be a non-empty string".to_string(),
            ));
        }
        if self.inference.timeout_secs == 0 {
            return Err(ScenecapError::InvalidConfiguration(
                "inference.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.cache.collection.trim().is_empty() {
            return Err(ScenecapError::InvalidConfiguration(
                "cache.collection must be a non-empty string".to_string(),
            ));
        }
        if self.cache.workers == 0 || self.cache.queue_capacity == 0 {
            return Err(ScenecapError::InvalidConfiguration(
                "cache.workers and cache.queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
