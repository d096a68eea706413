//! The transcoding control loop: pull packets from the demuxer, decode,
//! convert, buffer, encode in fixed-size chunks and mux into the in-memory
//! destination, flushing the decoder and encoder at end of stream.

use ffmpeg_next as ffmpeg;

use crate::error::{Result, TranscodeError};
use crate::fifo::SampleFifo;
use crate::input::InputContainer;
use crate::output::{InputProfile, OutputContainer};
use crate::resample::Resampler;

/// Fallback ratio for sizing the destination buffer when neither a requested
/// bit rate nor a declared input duration is available.
const SIZE_ESTIMATE_DIVISOR: usize = 18;

/// Caller-supplied target parameters.
#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    /// Short container format name, e.g. "mp3", "ogg", "adts", "wav".
    pub container: String,
    /// Target bit rate in bits per second; the encoder default when absent.
    pub bit_rate: Option<usize>,
    /// Target sample rate; the input rate when absent. Subject to the
    /// encoder's supported-rate set.
    pub sample_rate: Option<i32>,
}

impl TranscodeOptions {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            bit_rate: None,
            sample_rate: None,
        }
    }
}

/// Result of a successful transcoding call.
#[derive(Debug)]
pub struct TranscodeOutput {
    /// The complete, trailer-terminated container.
    pub data: Vec<u8>,
    /// Achieved bit rate, floored to the nearest 1000 below.
    pub bit_rate: i64,
    /// Duration of the encoded audio in seconds.
    pub duration: f64,
}

/// Transcode a single-stream audio buffer into `options.container`, entirely
/// in memory.
///
/// Either fully succeeds with a complete container, or fails with no usable
/// output; every acquired decoder/encoder/converter/buffer is released on
/// both paths.
pub fn transcode(source: &[u8], options: &TranscodeOptions) -> Result<TranscodeOutput> {
    crate::ensure_initialized();

    let (mut input, mut decoder) = InputContainer::open(source)?;

    let capacity = estimate_capacity(source.len(), options.bit_rate, input.duration_secs());

    let profile = InputProfile::from_decoder(&decoder);
    let (mut output, mut encoder) = OutputContainer::open(
        &options.container,
        &profile,
        options.sample_rate,
        options.bit_rate,
        capacity,
    )?;

    let params = *output.params();
    let mut resampler = Resampler::new(&profile, &params)?;
    let mut fifo = SampleFifo::new(
        params.format,
        params.channels,
        params.channel_layout,
        params.rate as u32,
    )?;

    output.write_header()?;

    let frame_size = output.frame_size();
    let encoder_time_base = ffmpeg::Rational::new(1, params.rate);
    let stream_time_base = output.stream_time_base();

    let mut clock = SampleClock::new();
    let mut input_done = false;

    {
        let in_rate = profile.rate as u32;
        let in_layout = profile.channel_layout;
        let mut packets = input.packets();

        loop {
            // FILLING: buffer converted samples until one encoder frame's
            // worth is queued or the input runs dry.
            while !input_done && fifo.len() < frame_size {
                match packets.next() {
                    Some((_, packet)) => {
                        decoder.send_packet(&packet).map_err(|e| {
                            TranscodeError::CodecProcessingFailure(format!(
                                "could not decode packet: {e}"
                            ))
                        })?;
                        receive_convert_store(
                            &mut decoder,
                            &mut resampler,
                            &mut fifo,
                            in_rate,
                            in_layout,
                        )?;
                    }
                    None => {
                        // End of input; the decoder may still hold delayed
                        // frames, which only a flush surfaces.
                        decoder.send_eof().map_err(|e| {
                            TranscodeError::CodecProcessingFailure(format!(
                                "could not flush decoder: {e}"
                            ))
                        })?;
                        receive_convert_store(
                            &mut decoder,
                            &mut resampler,
                            &mut fifo,
                            in_rate,
                            in_layout,
                        )?;
                        input_done = true;
                    }
                }
            }

            // DRAINING: feed full frames to the encoder; after end of input,
            // also the remainder.
            while fifo.len() >= frame_size || (input_done && !fifo.is_empty()) {
                let count = fifo.len().min(frame_size);
                let mut chunk = fifo.read(count)?;

                // Timestamp is assigned before the encode call.
                chunk.set_pts(Some(clock.stamp(count)));

                encoder.send_frame(&chunk).map_err(|e| {
                    TranscodeError::CodecProcessingFailure(format!("could not encode frame: {e}"))
                })?;
                write_encoded_packets(
                    &mut encoder,
                    &mut output,
                    encoder_time_base,
                    stream_time_base,
                )?;
            }

            if input_done {
                break;
            }
        }
    }

    // FINISHED: flush the encoder's delayed packets, then close the container.
    encoder.send_eof().map_err(|e| {
        TranscodeError::CodecProcessingFailure(format!("could not flush encoder: {e}"))
    })?;
    write_encoded_packets(&mut encoder, &mut output, encoder_time_base, stream_time_base)?;

    output.write_trailer()?;

    let duration = clock.total() as f64 / params.rate as f64;
    if duration <= 0.0 {
        return Err(TranscodeError::InvalidDuration(duration));
    }

    let data = output.into_bytes();
    let mut bit_rate = (8.0 * data.len() as f64 / duration) as i64;
    bit_rate -= bit_rate % 1000;

    tracing::debug!(
        output_len = data.len(),
        bit_rate,
        duration,
        "transcoding finished"
    );

    Ok(TranscodeOutput {
        data,
        bit_rate,
        duration,
    })
}

/// Presentation clock, in samples at the output rate. Each chunk is stamped
/// with the running total, which then advances by the chunk's sample count,
/// so stamps are strictly increasing and gap-free.
struct SampleClock {
    pts: i64,
}

impl SampleClock {
    fn new() -> Self {
        Self { pts: 0 }
    }

    fn stamp(&mut self, samples: usize) -> i64 {
        let pts = self.pts;
        self.pts += samples as i64;
        pts
    }

    /// Total samples stamped so far; the stream's duration in time-base units.
    fn total(&self) -> i64 {
        self.pts
    }
}

/// Drain every frame the decoder currently has, convert each and queue the
/// converted samples. A packet yielding zero frames is not an error.
fn receive_convert_store(
    decoder: &mut ffmpeg::decoder::Audio,
    resampler: &mut Resampler,
    fifo: &mut SampleFifo,
    in_rate: u32,
    in_layout: ffmpeg::util::channel_layout::ChannelLayout,
) -> Result<()> {
    let mut frame = ffmpeg::util::frame::Audio::empty();
    loop {
        match decoder.receive_frame(&mut frame) {
            Ok(()) => {
                // Raw-format decoders can emit frames without layout or rate
                // metadata; the converter rejects frames that do not match
                // its configured input.
                if frame.channel_layout().bits() == 0 {
                    frame.set_channel_layout(in_layout);
                }
                if frame.rate() == 0 {
                    frame.set_rate(in_rate);
                }

                if let Some(converted) = resampler.convert(&frame)? {
                    fifo.write(&converted)?;
                }
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
            Err(ffmpeg::Error::Eof) => break,
            Err(e) => {
                return Err(TranscodeError::CodecProcessingFailure(format!(
                    "could not decode frame: {e}"
                )))
            }
        }
    }
    Ok(())
}

/// Drain every packet the encoder currently has and mux it.
fn write_encoded_packets(
    encoder: &mut ffmpeg::encoder::Audio,
    output: &mut OutputContainer,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
) -> Result<()> {
    let mut packet = ffmpeg::Packet::empty();
    loop {
        match encoder.receive_packet(&mut packet) {
            Ok(()) => {
                packet.set_stream(0);
                packet.rescale_ts(encoder_time_base, stream_time_base);
                output.write_packet(&mut packet)?;
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
            Err(ffmpeg::Error::Eof) => break,
            Err(e) => {
                return Err(TranscodeError::CodecProcessingFailure(format!(
                    "could not receive encoded packet: {e}"
                )))
            }
        }
    }
    Ok(())
}

/// Starting size for the destination buffer: requested bit rate times the
/// declared input duration when both are known, else a flat ratio of the
/// source size.
fn estimate_capacity(source_len: usize, bit_rate: Option<usize>, duration: Option<f64>) -> usize {
    match (bit_rate, duration) {
        (Some(bit_rate), Some(secs)) if secs > 0.0 => (bit_rate as f64 * secs / 8.0) as usize,
        _ => source_len / SIZE_ESTIMATE_DIVISOR,
    }
}
