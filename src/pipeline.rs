//! End-to-end video captioning.
//!
//! [`VideoCaptioner`] scans a video into scene frames, captions each stored
//! frame in capture order, queues every (tensor, caption) pair for indexing,
//! and joins the captions into one string. The scene directory only lives for
//! the duration of a call.
//!
#![cfg_attr(
    feature = "ffmpeg",
    doc = r#"
# Example

```no_run
use scenecap::{
    AppConfig, CacheOptions, ContentAddressedCache, EmbeddingStore, VideoCaptioner, VideoFile,
    build_engine,
};

let config = AppConfig::load("scenecap.json")?;
let store = EmbeddingStore::open(&config.cache.store_path)?;
let collection = store.collection(&config.cache.collection)?;
let cache = ContentAddressedCache::new(collection, CacheOptions::from(&config.cache))?;

let mut captioner = VideoCaptioner::from_config(build_engine(&config.inference)?, cache, &config);
let report = captioner.caption_video(&mut VideoFile::open("input.mp4")?)?;
println!("{}", report.caption);

let persisted = captioner.finish();
println!("{} new entries", persisted.inserted);
# Ok::<(), scenecap::ScenecapError>(())
```
"#
)]

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cache::{ContentAddressedCache, DrainReport};
use crate::configuration::{AppConfig, NormalizationConfig, ScanOptions};
use crate::detector::SceneChangeDetector;
use crate::error::ScenecapError;
use crate::inference::CaptionEngine;
use crate::processor::{AdaptiveVideoProcessor, ProcessingSummary};
use crate::progress::{OperationType, ProgressTracker};
use crate::saver::{Scene, SceneDirectory, SceneSaver};
use crate::source::FrameSource;
use crate::tensor::normalize;

/// Caption of one scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceneCaption {
    /// 1-based capture position.
    pub number: usize,
    /// Decoded frame the scene came from.
    pub frame_index: u64,
    /// Engine output, trimmed.
    pub caption: String,
}

/// Result of captioning one video.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptionReport {
    /// Scene captions joined by single spaces. Empty when no scene was found.
    pub caption: String,
    /// Per-scene captions in capture order.
    pub scenes: Vec<SceneCaption>,
    /// Scan counters.
    pub summary: ProcessingSummary,
}

/// Scan, caption, and index videos with one engine and one cache.
#[derive(Debug)]
pub struct VideoCaptioner<E: CaptionEngine> {
    engine: E,
    cache: ContentAddressedCache,
    processor: AdaptiveVideoProcessor,
    normalization: NormalizationConfig,
    scene_dir: PathBuf,
}

impl<E: CaptionEngine> VideoCaptioner<E> {
    /// Captioner with default detector, scan options, and normalization,
    /// writing scenes to `extracted_images`.
    pub fn new(engine: E, cache: ContentAddressedCache) -> Self {
        Self {
            engine,
            cache,
            processor: AdaptiveVideoProcessor::default(),
            normalization: NormalizationConfig::default(),
            scene_dir: PathBuf::from("extracted_images"),
        }
    }

    /// Captioner configured from an [`AppConfig`].
    pub fn from_config(engine: E, cache: ContentAddressedCache, config: &AppConfig) -> Self {
        let processor = AdaptiveVideoProcessor::new(SceneChangeDetector::new(config.scan.num_diffs))
            .with_options(ScanOptions::from(&config.scan));
        Self::new(engine, cache)
            .with_processor(processor)
            .with_normalization(config.normalization)
            .with_scene_dir(&config.scan.scene_dir)
    }

    /// Replace the processor (and with it the detector and scan options).
    #[must_use]
    pub fn with_processor(mut self, processor: AdaptiveVideoProcessor) -> Self {
        self.processor = processor;
        self
    }

    /// Replace the normalization applied before key derivation.
    #[must_use]
    pub fn with_normalization(mut self, normalization: NormalizationConfig) -> Self {
        self.normalization = normalization;
        self
    }

    /// Directory scene frames are written to during a call.
    #[must_use]
    pub fn with_scene_dir<P: AsRef<Path>>(mut self, scene_dir: P) -> Self {
        self.scene_dir = scene_dir.as_ref().to_path_buf();
        self
    }

    /// The caption engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The persistence cache.
    pub fn cache(&self) -> &ContentAddressedCache {
        &self.cache
    }

    /// Caption every scene of `source`.
    ///
    /// Loads the engine if needed. The scene directory is created first and
    /// removed before returning, on success and on error alike. Persistence
    /// failures are logged and never fail the call.
    ///
    /// # Errors
    ///
    /// Scan errors from [`AdaptiveVideoProcessor::process`], engine errors,
    /// and I/O errors while creating the scene directory or reading scenes back.
    pub fn caption_video<S: FrameSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<CaptionReport, ScenecapError> {
        if !self.engine.is_loaded() {
            self.engine.load()?;
        }

        let directory = SceneDirectory::create(&self.scene_dir)?;
        let result = self.caption_into(source, directory.path());

        if let Err(error) = directory.remove() {
            log::warn!("Failed to remove scene directory: {error}");
        }
        result
    }

    fn caption_into<S: FrameSource + ?Sized>(
        &mut self,
        source: &mut S,
        directory: &Path,
    ) -> Result<CaptionReport, ScenecapError> {
        let mut saver = SceneSaver::new(directory);
        let summary = self.processor.process(source, &mut saver)?;
        let scenes = saver.take_scenes();

        let options = self.processor.options();
        let mut tracker = ProgressTracker::new(
            options.progress.clone(),
            OperationType::Captioning,
            Some(scenes.len() as u64),
            1,
        );

        let mut captions = Vec::with_capacity(scenes.len());
        for scene in &scenes {
            if options.is_cancelled() {
                return Err(ScenecapError::Cancelled);
            }
            captions.push(self.caption_scene(scene)?);
            tracker.advance(Some(scene.frame_index), scenes.len());
        }
        tracker.finish(scenes.len());

        let caption = captions
            .iter()
            .map(|scene| scene.caption.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        log::info!(
            "Captioned {} scenes from {} decoded frames",
            captions.len(),
            summary.frames_decoded
        );
        Ok(CaptionReport {
            caption,
            scenes: captions,
            summary,
        })
    }

    // The stored artifact is what gets captioned and keyed, matching what a
    // later lookup by file would compute.
    fn caption_scene(&self, scene: &Scene) -> Result<SceneCaption, ScenecapError> {
        let frame = image::open(&scene.path)?.to_rgb8();
        let caption = self.engine.caption(&frame)?.trim().to_string();
        log::debug!("Scene {}: {caption:?}", scene.number);

        match normalize(&frame, &self.normalization) {
            Ok(tensor) => {
                if let Err(error) = self.cache.submit(tensor, caption.clone()) {
                    log::error!("Failed to queue scene {} for persistence: {error}", scene.number);
                }
            }
            Err(error) => log::error!("Failed to normalize scene {}: {error}", scene.number),
        }

        Ok(SceneCaption {
            number: scene.number,
            frame_index: scene.frame_index,
            caption,
        })
    }

    /// Wait for every queued persistence job and return the totals.
    pub fn finish(&mut self) -> DrainReport {
        self.cache.drain()
    }
}
