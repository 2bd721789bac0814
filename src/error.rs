//! Error types for the `scenecap` crate.
//!
//! This module defines [`ScenecapError`], the unified error type returned by
//! all fallible operations in the crate. Errors carry enough context (file
//! paths, tensor shapes, upstream messages) to diagnose a failure without
//! extra logging at the call site.

use std::{io::Error as IoError, path::PathBuf};

use image::ImageError;
use serde_json::Error as JsonError;
use thiserror::Error;

/// The unified error type for all `scenecap` operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScenecapError {
    /// The video file could not be opened.
    #[error("Failed to open video file at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to [`crate::VideoFile::open`].
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The file does not contain a video stream.
    #[error("No video stream found in file")]
    NoVideoStream,

    /// A video frame could not be decoded.
    #[error("Failed to decode video frame: {0}")]
    VideoDecodeError(String),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while saving or converting a frame.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),

    /// The scan was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// A configuration value is out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A JSON document (configuration file or stored record) could not be parsed.
    #[error("JSON error: {0}")]
    ConfigParse(#[from] JsonError),

    /// A tensor shape descriptor could not be parsed.
    #[error("Invalid tensor shape descriptor: {0:?}")]
    InvalidShape(String),

    /// A flattened embedding does not hold as many values as its shape implies.
    #[error("Shape {shape:?} expects {expected} values, got {actual}")]
    ShapeMismatch {
        /// The parsed shape.
        shape: Vec<usize>,
        /// Number of values the shape describes.
        expected: usize,
        /// Number of values actually supplied.
        actual: usize,
    },

    /// The embedding store failed to read or write a record.
    #[error("Embedding store error: {0}")]
    Store(String),

    /// A caption engine was used before [`load`](crate::CaptionEngine::load).
    #[error("Caption engine {0} has not been loaded")]
    EngineNotLoaded(String),

    /// The caption engine failed to produce a caption.
    #[error("Inference error: {0}")]
    InferenceError(String),

    /// The background persistence queue has shut down.
    #[error("Persistence queue is closed")]
    PersistenceClosed,
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for ScenecapError {
    fn from(error: ffmpeg_next::Error) -> Self {
        ScenecapError::FfmpegError(error.to_string())
    }
}
