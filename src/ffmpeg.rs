//! FFmpeg console verbosity.
//!
//! Decoding a damaged or unusual file makes FFmpeg print its own warnings to
//! stderr, independently of the `log` records this crate emits. These helpers
//! tune that output without importing `ffmpeg-next` directly.
//!
//! ```no_run
//! use scenecap::FfmpegLogLevel;
//!
//! scenecap::set_ffmpeg_log_level(FfmpegLogLevel::Error);
//! ```

use ffmpeg_next::util::log::Level;

/// FFmpeg's internal log levels, from silent to most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// No output.
    Quiet,
    /// Unrecoverable errors that abort the process.
    Panic,
    /// Unrecoverable errors that invalidate the context.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings. FFmpeg's default.
    Warning,
    /// Informational messages.
    Info,
    /// Verbose informational messages.
    Verbose,
    /// Debugging messages.
    Debug,
    /// Tracing output.
    Trace,
}

const LEVELS: [(FfmpegLogLevel, Level); 9] = [
    (FfmpegLogLevel::Quiet, Level::Quiet),
    (FfmpegLogLevel::Panic, Level::Panic),
    (FfmpegLogLevel::Fatal, Level::Fatal),
    (FfmpegLogLevel::Error, Level::Error),
    (FfmpegLogLevel::Warning, Level::Warning),
    (FfmpegLogLevel::Info, Level::Info),
    (FfmpegLogLevel::Verbose, Level::Verbose),
    (FfmpegLogLevel::Debug, Level::Debug),
    (FfmpegLogLevel::Trace, Level::Trace),
];

impl FfmpegLogLevel {
    /// Map the `--verbose` flag of the command-line tool onto a level.
    pub fn for_verbosity(verbose: bool) -> Self {
        if verbose {
            FfmpegLogLevel::Warning
        } else {
            FfmpegLogLevel::Error
        }
    }
}

/// Set FFmpeg's internal log level. Does not affect `log` crate output.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    if let Some((_, ffmpeg_level)) = LEVELS.iter().find(|(ours, _)| *ours == level) {
        ffmpeg_next::util::log::set_level(*ffmpeg_level);
    }
}

/// Current FFmpeg log level, if it maps onto a known variant.
pub fn get_ffmpeg_log_level() -> Option<FfmpegLogLevel> {
    let current = ffmpeg_next::util::log::get_level().ok()?;
    LEVELS
        .iter()
        .find(|(_, ffmpeg_level)| *ffmpeg_level == current)
        .map(|(ours, _)| *ours)
}
