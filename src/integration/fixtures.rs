//! Test fixtures built without touching the filesystem: a hand-rolled WAV
//! writer for single-stream sources and an FFmpeg-muxed Matroska builder for
//! the multi-stream rejection case.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::{Sample, Type};

use crate::io::create_memory_output;

/// Serialize mono/stereo interleaved s16 samples as a RIFF/WAVE buffer.
pub fn wav_pcm_s16(rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
    let data_len = samples.len() * 2;
    let byte_rate = rate * channels as u32 * 2;
    let block_align = channels * 2;

    let mut out = Vec::with_capacity(44 + data_len);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((36 + data_len) as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data_len as u32).to_le_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// A 440 Hz sine at moderate amplitude.
pub fn sine_s16(rate: u32, seconds: f64) -> Vec<i16> {
    let total = (rate as f64 * seconds) as usize;
    (0..total)
        .map(|i| {
            let t = i as f64 / rate as f64;
            ((t * 440.0 * 2.0 * std::f64::consts::PI).sin() * 12000.0) as i16
        })
        .collect()
}

/// Mono 16-bit PCM WAV of the given duration.
pub fn mono_wav(rate: u32, seconds: f64) -> Vec<u8> {
    wav_pcm_s16(rate, 1, &sine_s16(rate, seconds))
}

/// A Matroska buffer holding two mono PCM audio streams, for exercising the
/// single-stream invariant.
pub fn two_stream_matroska(rate: i32) -> Vec<u8> {
    crate::ensure_initialized();

    let (mut octx, io, writer) = create_memory_output("matroska", 4096).unwrap();
    let pcm = ffmpeg::encoder::find(codec::Id::PCM_S16LE).unwrap();

    let mut encoders = Vec::new();
    for _ in 0..2 {
        let mut context = codec::Context::new_with_codec(pcm);
        context.set_time_base(ffmpeg::Rational::new(1, rate));
        let mut enc = context.encoder().audio().unwrap();
        enc.set_rate(rate);
        enc.set_format(Sample::I16(Type::Packed));
        enc.set_channel_layout(ChannelLayout::MONO);
        let enc = enc.open_as(pcm).unwrap();

        let mut stream = octx.add_stream(pcm).unwrap();
        stream.set_time_base(ffmpeg::Rational::new(1, rate));
        stream.set_parameters(&enc);
        encoders.push(enc);
    }

    octx.write_header().unwrap();

    for (index, enc) in encoders.iter_mut().enumerate() {
        let mut frame =
            ffmpeg::util::frame::Audio::new(Sample::I16(Type::Packed), 1024, ChannelLayout::MONO);
        frame.set_rate(rate as u32);
        for d in frame.data_mut(0).iter_mut() {
            *d = 0;
        }
        frame.set_pts(Some(0));

        enc.send_frame(&frame).unwrap();
        enc.send_eof().unwrap();

        let mut packet = ffmpeg::Packet::empty();
        while enc.receive_packet(&mut packet).is_ok() {
            packet.set_stream(index);
            let stream_tb = octx.stream(index).unwrap().time_base();
            packet.rescale_ts(ffmpeg::Rational::new(1, rate), stream_tb);
            packet.write_interleaved(&mut octx).unwrap();
        }
    }

    octx.write_trailer().unwrap();

    drop(octx);
    drop(io);
    writer.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_fixture_shape() {
        let wav = mono_wav(8000, 0.25);
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 2000 * 2);
    }

    #[test]
    fn test_two_stream_fixture_is_nonempty() {
        let mkv = two_stream_matroska(44100);
        assert!(!mkv.is_empty());
    }
}
