//! FFmpeg-backed [`FrameSource`].
//!
//! [`VideoFile`] opens a container, picks its best video stream, and decodes
//! frames sequentially into RGB. A resolution change mid-stream rebuilds the
//! scaler, so every returned frame has the dimensions it was decoded at.
//!
//! # Example
//!
//! ```no_run
//! use scenecap::{FrameSource, VideoFile};
//!
//! let mut video = VideoFile::open("input.mp4")?;
//! println!("{:.1}s at {:.2} fps", video.duration_seconds(), video.frames_per_second());
//!
//! let mut decoded = 0;
//! while let Some(_frame) = video.read_frame()? {
//!     decoded += 1;
//! }
//! println!("{decoded} frames");
//! # Ok::<(), scenecap::ScenecapError>(())
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};

use ffmpeg_next::{
    Error as FfmpegError, Packet,
    codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder,
    ffi,
    format::{Pixel, context::Input},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use image::RgbImage;
use serde::Serialize;

use crate::conversion::{frame_to_rgb_image, frames_in_duration, micros_to_seconds};
use crate::error::ScenecapError;
use crate::source::FrameSource;

/// Stream properties read when the file is opened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoMetadata {
    /// Coded width in pixels.
    pub width: u32,
    /// Coded height in pixels.
    pub height: u32,
    /// Average frame rate. Zero when the container does not say.
    pub frames_per_second: f64,
    /// Frame count estimated from duration and frame rate.
    pub frame_count: u64,
    /// Container duration in seconds.
    pub duration: f64,
    /// Decoder name, e.g. `h264`.
    pub codec: String,
}

/// A video file decoded frame by frame.
pub struct VideoFile {
    input: Input,
    decoder: VideoDecoder,
    stream_index: usize,
    metadata: VideoMetadata,
    path: PathBuf,
    scaler: Option<(ScalingContext, Pixel, u32, u32)>,
    decoded: VideoFrame,
    rgb: VideoFrame,
    eof_sent: bool,
    finished: bool,
}

impl Debug for VideoFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("VideoFile")
            .field("path", &self.path)
            .field("stream_index", &self.stream_index)
            .field("metadata", &self.metadata)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl VideoFile {
    /// Open `path` and prepare a decoder for its best video stream.
    ///
    /// # Errors
    ///
    /// [`ScenecapError::FileOpen`] if FFmpeg cannot open the file or build a
    /// decoder, [`ScenecapError::NoVideoStream`] if it has no video.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ScenecapError> {
        let path = path.as_ref().to_path_buf();
        log::debug!("Opening video file: {}", path.display());

        let open_error = |reason: String| ScenecapError::FileOpen {
            path: path.clone(),
            reason,
        };

        ffmpeg_next::init()
            .map_err(|error| open_error(format!("FFmpeg initialisation failed: {error}")))?;
        let input = ffmpeg_next::format::input(&path).map_err(|error| open_error(error.to_string()))?;

        let stream = input
            .streams()
            .best(Type::Video)
            .ok_or(ScenecapError::NoVideoStream)?;
        let stream_index = stream.index();

        let decoder = CodecContext::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|error| open_error(format!("Failed to create video decoder: {error}")))?;

        let frames_per_second = [stream.avg_frame_rate(), stream.rate()]
            .into_iter()
            .find(|rate| rate.numerator() > 0 && rate.denominator() > 0)
            .map(|rate| f64::from(rate.numerator()) / f64::from(rate.denominator()))
            .unwrap_or(0.0);

        let duration = micros_to_seconds(input.duration());
        let codec = decoder
            .codec()
            .map(|codec| codec.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let metadata = VideoMetadata {
            width: decoder.width(),
            height: decoder.height(),
            frames_per_second,
            frame_count: frames_in_duration(duration, frames_per_second),
            duration,
            codec,
        };
        log::debug!("Video stream {stream_index}: {metadata:?}");

        Ok(Self {
            input,
            decoder,
            stream_index,
            metadata,
            path,
            scaler: None,
            decoded: VideoFrame::empty(),
            rgb: VideoFrame::empty(),
            eof_sent: false,
            finished: false,
        })
    }

    /// Properties read at open time.
    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    /// Path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn convert_decoded(&mut self) -> Result<RgbImage, ScenecapError> {
        let format = self.decoded.format();
        let width = self.decoded.width();
        let height = self.decoded.height();
        if width == 0 || height == 0 {
            return Err(ScenecapError::VideoDecodeError(format!(
                "decoder produced an empty {width}x{height} frame"
            )));
        }

        let stale = !matches!(
            &self.scaler,
            Some((_, f, w, h)) if *f == format && *w == width && *h == height
        );
        if stale {
            log::debug!("Building scaler for {format:?} {width}x{height}");
            let context = ScalingContext::get(
                format,
                width,
                height,
                Pixel::RGB24,
                width,
                height,
                ScalingFlags::BILINEAR,
            )?;
            self.scaler = Some((context, format, width, height));
        }

        if let Some((scaler, ..)) = self.scaler.as_mut() {
            scaler.run(&self.decoded, &mut self.rgb)?;
        }
        frame_to_rgb_image(&self.rgb, width, height)
    }
}

/// What one `receive_frame` call means for the decode loop.
#[derive(Debug)]
enum Received {
    Frame,
    NeedsInput,
    Finished,
    Failed(ScenecapError),
}

/// EAGAIN asks for another packet until EOF has been sent, after which it
/// means the decoder is drained. Any other error is a decode failure.
fn classify_receive(result: Result<(), FfmpegError>, eof_sent: bool) -> Received {
    match result {
        Ok(()) => Received::Frame,
        Err(FfmpegError::Other { errno: ffi::EAGAIN }) if !eof_sent => Received::NeedsInput,
        Err(FfmpegError::Other { errno: ffi::EAGAIN }) | Err(FfmpegError::Eof) => Received::Finished,
        Err(error) => Received::Failed(ScenecapError::VideoDecodeError(format!(
            "decoder failed to produce a frame: {error}"
        ))),
    }
}

impl FrameSource for VideoFile {
    fn frames_per_second(&self) -> f64 {
        self.metadata.frames_per_second
    }

    fn frame_count(&self) -> u64 {
        self.metadata.frame_count
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>, ScenecapError> {
        if self.finished {
            return Ok(None);
        }

        loop {
            let received = self.decoder.receive_frame(&mut self.decoded);
            match classify_receive(received, self.eof_sent) {
                Received::Frame => return self.convert_decoded().map(Some),
                Received::NeedsInput => {}
                Received::Finished => {
                    self.finished = true;
                    return Ok(None);
                }
                Received::Failed(error) => {
                    self.finished = true;
                    return Err(error);
                }
            }

            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() == self.stream_index {
                        self.decoder.send_packet(&packet).map_err(|error| {
                            ScenecapError::VideoDecodeError(format!(
                                "decoder rejected packet: {error}"
                            ))
                        })?;
                    }
                }
                Err(FfmpegError::Eof) => {
                    self.decoder.send_eof()?;
                    self.eof_sent = true;
                }
                Err(error) => {
                    return Err(ScenecapError::VideoDecodeError(format!(
                        "failed to read packet: {error}"
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eagain_requests_input_until_eof_is_sent() {
        let again = || Err(FfmpegError::Other { errno: ffi::EAGAIN });
        assert!(matches!(classify_receive(again(), false), Received::NeedsInput));
        assert!(matches!(classify_receive(again(), true), Received::Finished));
    }

    #[test]
    fn eof_and_frames_are_not_failures() {
        assert!(matches!(classify_receive(Ok(()), false), Received::Frame));
        assert!(matches!(classify_receive(Err(FfmpegError::Eof), true), Received::Finished));
    }

    #[test]
    fn invalid_data_surfaces_as_decode_error() {
        for eof_sent in [false, true] {
            match classify_receive(Err(FfmpegError::InvalidData), eof_sent) {
                Received::Failed(ScenecapError::VideoDecodeError(message)) => {
                    assert!(message.contains("decoder failed"));
                }
                other => panic!("expected a decode failure, got {other:?}"),
            }
        }
    }
}
