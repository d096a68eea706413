//! Input negotiation: open the demuxer over the source buffer, verify the
//! single-audio-stream invariant and set up a matching decoder.

use std::marker::PhantomData;

use ffmpeg_next as ffmpeg;

use crate::error::{Result, TranscodeError};
use crate::io::{open_memory_input, AvioGuard, MemoryReader};

/// Demuxer opened over a caller-owned byte slice.
///
/// Field order matters: the format context must drop before the AVIO guard,
/// which must drop before the reader it points into.
pub struct InputContainer<'a> {
    ctx: ffmpeg::format::context::Input,
    _io: AvioGuard,
    _reader: Box<MemoryReader>,
    duration_secs: Option<f64>,
    _source: PhantomData<&'a [u8]>,
}

impl<'a> InputContainer<'a> {
    /// Open `source`, check that it holds exactly one audio stream and open a
    /// decoder for it.
    ///
    /// Fails with [`TranscodeError::UnsupportedStreamCount`] before any
    /// encoder or destination buffer exists when the stream layout is wrong.
    pub fn open(source: &'a [u8]) -> Result<(Self, ffmpeg::decoder::Audio)> {
        let reader = Box::new(MemoryReader::new(source));
        let (ctx, io, reader) = open_memory_input(reader)?;

        // Wrap immediately: every validation failure below must release the
        // format context before the AVIO guard before the reader, and the
        // field order encodes exactly that. Loose bindings would drop in
        // reverse on an early return.
        let mut container = Self {
            ctx,
            _io: io,
            _reader: reader,
            duration_secs: None,
            _source: PhantomData,
        };

        let stream_count = container.ctx.streams().count();
        if stream_count != 1 {
            return Err(TranscodeError::UnsupportedStreamCount(stream_count));
        }

        let stream = container
            .ctx
            .stream(0)
            .ok_or_else(|| TranscodeError::UnsupportedStreamCount(0))?;
        if stream.parameters().medium() != ffmpeg::media::Type::Audio {
            // A single non-audio stream counts as zero audio streams.
            return Err(TranscodeError::UnsupportedStreamCount(0));
        }

        let duration_secs = match stream.duration() {
            d if d > 0 => Some(d as f64 * f64::from(stream.time_base())),
            _ => None,
        };

        let codec_id = stream.parameters().id();
        let codec = ffmpeg::decoder::find(codec_id).ok_or_else(|| {
            TranscodeError::UnsupportedCodec(format!("no decoder for {:?}", codec_id))
        })?;

        let context =
            ffmpeg::codec::Context::from_parameters(stream.parameters()).map_err(|e| {
                TranscodeError::AllocationFailure(format!(
                    "could not allocate a decoding context: {e}"
                ))
            })?;

        let decoder = context
            .decoder()
            .open_as(codec)
            .and_then(|opened| opened.audio())
            .map_err(|e| {
                TranscodeError::CodecOpenFailure(format!("could not open input codec: {e}"))
            })?;

        container.duration_secs = duration_secs;

        tracing::debug!(
            codec = ?codec_id,
            rate = decoder.rate(),
            channels = decoder.channels(),
            format = ?decoder.format(),
            "opened input stream"
        );

        Ok((container, decoder))
    }

    /// Declared duration of the single stream, when the container knows it.
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    /// Iterate over demuxed packets; `None` means end of input.
    ///
    /// The iterator skips non-fatal read errors and stops at EOF. The memory
    /// reader behind it only ever reports data or EOF, never a transient
    /// failure, so the skip path cannot loop.
    pub fn packets(&mut self) -> ffmpeg::format::context::input::PacketIter<'_> {
        self.ctx.packets()
    }
}
