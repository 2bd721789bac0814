//! Pixel and timing conversions shared by the decoder, detector and tensor code.

use image::{GrayImage, Luma, RgbImage};

#[cfg(feature = "ffmpeg")]
use ffmpeg_next::frame::Video as VideoFrame;

#[cfg(feature = "ffmpeg")]
use crate::error::ScenecapError;

/// Copy a scaled RGB24 frame into an [`RgbImage`], dropping any row padding.
///
/// FFmpeg aligns rows, so `stride(0)` is often wider than `width * 3`.
#[cfg(feature = "ffmpeg")]
pub(crate) fn frame_to_rgb_image(
    rgb_frame: &VideoFrame,
    width: u32,
    height: u32,
) -> Result<RgbImage, ScenecapError> {
    let stride = rgb_frame.stride(0);
    let row_bytes = width as usize * 3;
    let rows = height as usize;
    let data = rgb_frame.data(0);

    if stride < row_bytes || data.len() < stride * rows.saturating_sub(1) + row_bytes {
        return Err(ScenecapError::VideoDecodeError(format!(
            "Frame buffer too small for {width}x{height} RGB24 (stride {stride}, {} bytes)",
            data.len()
        )));
    }

    let buffer = if stride == row_bytes {
        data[..row_bytes * rows].to_vec()
    } else {
        let mut packed = Vec::with_capacity(row_bytes * rows);
        for row in data.chunks(stride).take(rows) {
            packed.extend_from_slice(&row[..row_bytes]);
        }
        packed
    };

    RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
        ScenecapError::VideoDecodeError(
            "Failed to construct RGB image from decoded frame data".to_string(),
        )
    })
}

// BT.601 weights in 14-bit fixed point, rounded half up, as OpenCV's
// RGB-to-gray conversion computes them.
const LUMA_RED: u32 = 4899;
const LUMA_GREEN: u32 = 9617;
const LUMA_BLUE: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

/// Luminance plane of an RGB frame using BT.601 weights
/// (0.299, 0.587, 0.114).
///
/// Grey pixels keep their level exactly.
pub fn rgb_to_luma(frame: &RgbImage) -> GrayImage {
    GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        let [r, g, b] = frame.get_pixel(x, y).0;
        let weighted = u32::from(r) * LUMA_RED + u32::from(g) * LUMA_GREEN + u32::from(b) * LUMA_BLUE;
        Luma([((weighted + (1 << (LUMA_SHIFT - 1))) >> LUMA_SHIFT) as u8])
    })
}

/// Duration in seconds implied by a frame count and frame rate.
///
/// Returns `0.0` when the frame rate is not positive or not finite.
pub fn duration_from_frames(frame_count: u64, frames_per_second: f64) -> f64 {
    if frames_per_second.is_finite() && frames_per_second > 0.0 {
        frame_count as f64 / frames_per_second
    } else {
        0.0
    }
}

/// Estimated frame count for a duration in seconds, truncated.
#[cfg(feature = "ffmpeg")]
pub(crate) fn frames_in_duration(seconds: f64, frames_per_second: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 && frames_per_second.is_finite() {
        (seconds * frames_per_second.max(0.0)) as u64
    } else {
        0
    }
}

/// Convert an FFmpeg container duration (AV_TIME_BASE, microseconds) to seconds.
#[cfg(feature = "ffmpeg")]
pub(crate) fn micros_to_seconds(microseconds: i64) -> f64 {
    if microseconds > 0 {
        microseconds as f64 / 1_000_000.0
    } else {
        0.0
    }
}
