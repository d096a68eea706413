//! Sample rate / format / channel layout conversion between the decoder's
//! output and the negotiated encoder input, with delay-aware output sizing.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::resampling;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

use crate::error::{Result, TranscodeError};
use crate::output::{InputProfile, NegotiatedParams};

/// Stateful converter wrapping FFmpeg's `SwrContext`.
pub struct Resampler {
    context: resampling::Context,
    in_rate: i64,
    out_rate: i64,
    out_format: Sample,
    out_layout: ChannelLayout,
}

impl Resampler {
    /// Configure the conversion from the input parameters to the negotiated
    /// output parameters.
    pub fn new(input: &InputProfile, params: &NegotiatedParams) -> Result<Self> {
        let context = resampling::Context::get(
            input.format,
            input.channel_layout,
            input.rate as u32,
            params.format,
            params.channel_layout,
            params.rate as u32,
        )
        .map_err(|e| {
            TranscodeError::CodecOpenFailure(format!("could not open resample context: {e}"))
        })?;

        Ok(Self {
            context,
            in_rate: input.rate as i64,
            out_rate: params.rate as i64,
            out_format: params.format,
            out_layout: params.channel_layout,
        })
    }

    /// Samples buffered inside the converter, measured at the input rate.
    pub fn pending_delay(&self) -> i64 {
        self.context.delay().map(|d| d.input).unwrap_or(0)
    }

    /// Convert one decoded frame, returning `None` when the converter needs
    /// more input before it can emit samples.
    ///
    /// The output frame is sized for everything pending in the converter plus
    /// the new input, rounded up to the output rate; under-sizing it would
    /// silently drop samples, over-sizing is corrected by the converter
    /// reporting the true produced count.
    pub fn convert(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<Option<ffmpeg::util::frame::Audio>> {
        let pending = self.pending_delay() + frame.samples() as i64;
        let capacity = ceil_rescale(pending, self.out_rate, self.in_rate);

        let mut out =
            ffmpeg::util::frame::Audio::new(self.out_format, capacity as usize, self.out_layout);
        out.set_rate(self.out_rate as u32);

        self.context.run(frame, &mut out).map_err(|e| {
            TranscodeError::CodecProcessingFailure(format!("could not convert input samples: {e}"))
        })?;

        if out.samples() == 0 {
            return Ok(None);
        }

        Ok(Some(out))
    }
}

/// `ceil(a * num / den)` in integer arithmetic.
fn ceil_rescale(a: i64, num: i64, den: i64) -> i64 {
    (a * num + den - 1) / den
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_rescale_rounds_up() {
        assert_eq!(ceil_rescale(1024, 48000, 44100), 1115);
        assert_eq!(ceil_rescale(1024, 44100, 44100), 1024);
        assert_eq!(ceil_rescale(0, 48000, 44100), 0);
        assert_eq!(ceil_rescale(1, 22050, 44100), 1);
    }
}
