//! # scenecap
//!
//! Pick the frames of a video worth describing, caption them, and index every
//! caption by the content of the frame it came from.
//!
//! `scenecap` decodes a video (FFmpeg via
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next)), samples frames at a
//! rate chosen from the video's length, and flags a scene change whenever a
//! frame differs from its predecessor by more than the rolling average of
//! recent differences. Accepted frames are captioned by a pluggable engine;
//! each caption is stored once per distinct picture in an on-disk collection
//! keyed by a SHA-256 digest of the normalized frame.
//!
//! ## Quick Start
//!
#![cfg_attr(
    feature = "ffmpeg",
    doc = r#"
### Find Scenes

```no_run
use scenecap::{AdaptiveVideoProcessor, SceneChangeDetector, SceneSaver, VideoFile};

let mut video = VideoFile::open("input.mp4")?;
let mut saver = SceneSaver::new("scenes");
let summary = AdaptiveVideoProcessor::new(SceneChangeDetector::default())
    .process(&mut video, &mut saver)?;

for scene in saver.scenes() {
    println!("scene {} at frame {}: {}", scene.number, scene.frame_index, scene.path.display());
}
# Ok::<(), scenecap::ScenecapError>(())
```

"#
)]
//! ### Key an Image
//!
//! ```no_run
//! use scenecap::{NormalizationConfig, derive_key, normalize};
//!
//! let frame = image::open("scene_0001.jpg")?.to_rgb8();
//! let key = derive_key(&normalize(&frame, &NormalizationConfig::default())?);
//! println!("{key}");
//! # Ok::<(), scenecap::ScenecapError>(())
//! ```
//!
//! ### Caption a Video
//!
//! See [`VideoCaptioner`].
//!
//! ## Features
//!
//! - **Adaptive sampling**: every 3rd frame of a short clip, every 30th of a
//!   long one
//! - **Self-calibrating detection**: the threshold is the mean of the last
//!   `num_diffs` luminance differences, so no per-video tuning
//! - **Gap suppression**: one cut yields one scene
//! - **Content-addressed index**: identical pictures are stored once, with
//!   exact tensor reconstruction for later audit
//! - **Background persistence**: a bounded worker queue with a drain barrier
//! - **Progress & cancellation**: callbacks and a `CancellationToken`
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ffmpeg` | Decode video files with FFmpeg (default) |
//! | `remote` | HTTP caption engine via `reqwest` (default) |
//!
//! ## Requirements
//!
//! The `ffmpeg` feature needs the FFmpeg development libraries installed.

pub mod cache;
pub mod configuration;
mod conversion;
pub mod detector;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod inference;
pub mod pipeline;
pub mod processor;
pub mod progress;
pub mod saver;
pub mod source;
pub mod store;
pub mod tensor;
#[cfg(feature = "ffmpeg")]
pub mod video;

pub use cache::{ContentAddressedCache, ContentKey, DrainReport, derive_key, record};
pub use configuration::{
    AppConfig, CacheConfig, CacheOptions, DecodeErrorPolicy, InferenceConfig, NormalizationConfig,
    ScanConfig, ScanOptions,
};
pub use conversion::{duration_from_frames, rgb_to_luma};
pub use detector::{
    DetectorPhase, DetectorState, SceneChangeDetector, SceneDecision, mean_absolute_difference,
    step,
};
pub use error::ScenecapError;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
#[cfg(feature = "remote")]
pub use inference::RemoteCaptionEngine;
pub use inference::{CaptionBackend, CaptionEngine, build_engine};
pub use pipeline::{CaptionReport, SceneCaption, VideoCaptioner};
pub use processor::{AdaptiveVideoProcessor, ProcessingSummary, skip_rate_for_duration};
pub use progress::{CancellationToken, OperationType, ProgressCallback, ProgressInfo};
pub use saver::{Scene, SceneDirectory, SceneSaver};
pub use source::{FrameSource, MemoryFrameSource};
pub use store::{
    CacheRecord, DiskCollection, EmbeddingCollection, EmbeddingStore, MemoryCollection,
    RecordMetadata, RecordOutcome,
};
pub use tensor::{ImageTensor, normalize, parse_shape, reconstruct};
#[cfg(feature = "ffmpeg")]
pub use video::{VideoFile, VideoMetadata};
