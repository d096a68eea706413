//! In-memory audio transcoding.
//!
//! Decodes a single-stream encoded audio buffer, converts sample rate /
//! format / channel layout to whatever the target container's default encoder
//! negotiates, re-encodes, and muxes, all without touching the filesystem.
//!
//! ```no_run
//! use audio_transcode::{transcode, TranscodeOptions};
//!
//! let source: Vec<u8> = std::fs::read("in.wav").unwrap();
//! let mut options = TranscodeOptions::new("adts");
//! options.bit_rate = Some(128_000);
//! let out = transcode(&source, &options).unwrap();
//! println!("{} bytes, {} bit/s, {:.2} s", out.data.len(), out.bit_rate, out.duration);
//! ```

mod error;
mod fifo;
mod input;
mod io;
mod output;
mod pipeline;
mod resample;

#[cfg(test)]
mod integration;

pub use error::{Result, TranscodeError};
pub use pipeline::{transcode, TranscodeOptions, TranscodeOutput};

use std::sync::Once;

static INIT: Once = Once::new();

/// One-time process-wide FFmpeg initialization, invoked lazily on first use.
/// Repeated calls are no-ops.
pub(crate) fn ensure_initialized() {
    INIT.call_once(|| {
        if let Err(e) = ffmpeg_next::init() {
            tracing::error!("FFmpeg initialization failed: {e}");
        }
        // Suppress per-call demuxer/muxer INFO chatter on stderr.
        unsafe {
            ffmpeg_next::ffi::av_log_set_level(ffmpeg_next::ffi::AV_LOG_WARNING as i32);
        }
        tracing::debug!("FFmpeg initialized");
    });
}
