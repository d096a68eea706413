//! Growable queue of converted PCM samples, absorbing the size mismatch
//! between decoder output chunks and the encoder's fixed frame size.
//!
//! Safe owned wrapper over `av_audio_fifo_*`; ffmpeg-next exposes no binding
//! for the audio FIFO, so this drops to `ffmpeg::ffi` the same way the
//! in-memory IO glue does.

use std::ffi::c_void;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

use crate::error::{Result, TranscodeError};

/// FIFO of whole multi-channel samples in the negotiated output format.
pub struct SampleFifo {
    ptr: *mut ffmpeg::ffi::AVAudioFifo,
    format: Sample,
    layout: ChannelLayout,
    rate: u32,
}

impl SampleFifo {
    /// Allocate a FIFO for `channels` channels of `format` samples. `layout`
    /// and `rate` are stamped onto the frames produced by [`read`](Self::read).
    pub fn new(format: Sample, channels: u16, layout: ChannelLayout, rate: u32) -> Result<Self> {
        let fmt: ffmpeg::ffi::AVSampleFormat = format.into();
        let ptr = unsafe { ffmpeg::ffi::av_audio_fifo_alloc(fmt, channels as i32, 1) };
        if ptr.is_null() {
            return Err(TranscodeError::AllocationFailure(
                "could not allocate sample FIFO".to_string(),
            ));
        }
        Ok(Self {
            ptr,
            format,
            layout,
            rate,
        })
    }

    /// Number of whole samples currently queued.
    pub fn len(&self) -> usize {
        unsafe { ffmpeg::ffi::av_audio_fifo_size(self.ptr).max(0) as usize }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append all samples of `frame`, growing the FIFO first. Writing an
    /// empty frame is a no-op.
    pub fn write(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<()> {
        let count = frame.samples();
        if count == 0 {
            return Ok(());
        }

        unsafe {
            let needed = (self.len() + count) as i32;
            if ffmpeg::ffi::av_audio_fifo_realloc(self.ptr, needed) < 0 {
                return Err(TranscodeError::AllocationFailure(
                    "could not grow sample FIFO".to_string(),
                ));
            }

            let data = (*frame.as_ptr()).extended_data as *const *mut c_void;
            let written =
                ffmpeg::ffi::av_audio_fifo_write(self.ptr, data as *mut *mut c_void, count as i32);
            if written < count as i32 {
                return Err(TranscodeError::CodecProcessingFailure(format!(
                    "short FIFO write: {written} of {count} samples"
                )));
            }
        }

        Ok(())
    }

    /// Pop exactly `count` samples into a fresh frame.
    ///
    /// Callers check [`len`](Self::len) first; asking for more than is queued
    /// is an error, never a silent partial read.
    pub fn read(&mut self, count: usize) -> Result<ffmpeg::util::frame::Audio> {
        let available = self.len();
        if count == 0 || count > available {
            return Err(TranscodeError::CodecProcessingFailure(format!(
                "FIFO read of {count} samples with {available} available"
            )));
        }

        let mut frame = ffmpeg::util::frame::Audio::new(self.format, count, self.layout);
        frame.set_rate(self.rate);

        unsafe {
            let data = (*frame.as_mut_ptr()).extended_data as *mut *mut c_void;
            let read = ffmpeg::ffi::av_audio_fifo_read(self.ptr, data, count as i32);
            if read < count as i32 {
                return Err(TranscodeError::CodecProcessingFailure(format!(
                    "short FIFO read: {read} of {count} samples"
                )));
            }
        }

        Ok(frame)
    }
}

impl Drop for SampleFifo {
    fn drop(&mut self) {
        unsafe {
            ffmpeg::ffi::av_audio_fifo_free(self.ptr);
        }
    }
}
