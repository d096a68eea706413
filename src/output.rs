//! Output negotiation: pick the encoder for the requested container kind and
//! reconcile channel layout, sample format, sample rate and bit rate against
//! the encoder's declared capability sets.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

use crate::error::{Result, TranscodeError};
use crate::io::{create_memory_output, AvioGuard, MemoryWriter};

/// Encoder frame size to fall back on when the codec reports none
/// (PCM-family encoders accept arbitrary frame sizes).
const FALLBACK_FRAME_SIZE: usize = 1024;

/// The input-side facts negotiation and conversion work from.
#[derive(Debug, Clone, Copy)]
pub struct InputProfile {
    pub rate: i32,
    pub format: Sample,
    pub channels: u16,
    pub channel_layout: ChannelLayout,
}

impl InputProfile {
    pub fn from_decoder(decoder: &ffmpeg::decoder::Audio) -> Self {
        // Raw PCM containers (e.g. wav/pcm_s16le) often carry no channel
        // layout; derive the default for the channel count instead of
        // aborting later in the resampler.
        let channel_layout = if decoder.channel_layout().bits() == 0 {
            ChannelLayout::default(decoder.channels() as i32)
        } else {
            decoder.channel_layout()
        };
        Self {
            rate: decoder.rate() as i32,
            format: decoder.format(),
            channels: decoder.channels(),
            channel_layout,
        }
    }
}

/// Output parameters fixed once, before any encoding.
#[derive(Debug, Clone, Copy)]
pub struct NegotiatedParams {
    pub rate: i32,
    pub format: Sample,
    pub channel_layout: ChannelLayout,
    pub channels: u16,
    pub bit_rate: Option<usize>,
}

/// Negotiate output parameters against the encoder's capability sets.
///
/// Layout has no fallback; an unsupported derived layout is a hard failure.
/// Format falls back silently to the encoder's first declared format. Rate
/// falls back to the first declared rate, warning only when the caller had
/// explicitly asked for one. Opus is always pinned to 48 kHz, which its
/// packetization assumes.
pub fn negotiate(
    encoder_codec: &codec::Audio,
    input: &InputProfile,
    requested_rate: Option<i32>,
    requested_bit_rate: Option<usize>,
) -> Result<NegotiatedParams> {
    let channels = input.channels;
    let channel_layout = ChannelLayout::default(channels as i32);

    if let Some(mut layouts) = encoder_codec.channel_layouts() {
        if !layouts.any(|l| l == channel_layout) {
            return Err(TranscodeError::NegotiationFailure(format!(
                "channel layout for {channels} channels is not supported by encoder {:?}",
                encoder_codec.id()
            )));
        }
    }

    let mut format = input.format;
    if let Some(mut formats) = encoder_codec.formats() {
        if !formats.any(|f| f == format) {
            if let Some(first) = encoder_codec.formats().and_then(|mut f| f.next()) {
                tracing::debug!(
                    encoder = ?encoder_codec.id(),
                    input_format = ?input.format,
                    chosen = ?first,
                    "input sample format not supported, falling back to the encoder's first format"
                );
                format = first;
            }
        }
    } else {
        tracing::warn!(
            encoder = ?encoder_codec.id(),
            "encoder declares no supported sample formats, keeping the input format; \
             the encoder may reject it"
        );
    }

    let candidate = requested_rate.unwrap_or(input.rate);
    let mut rate = candidate;
    if let Some(mut rates) = encoder_codec.rates() {
        if !rates.any(|r| r == candidate) {
            let first = encoder_codec
                .rates()
                .and_then(|mut r| r.next())
                .ok_or_else(|| {
                    TranscodeError::NegotiationFailure(format!(
                        "encoder {:?} declares an empty sample rate set",
                        encoder_codec.id()
                    ))
                })?;
            if requested_rate.is_some() {
                tracing::warn!(
                    encoder = ?encoder_codec.id(),
                    requested = candidate,
                    chosen = first,
                    "encoder does not support the requested sample rate, using its first declared rate"
                );
            }
            rate = first;
        }
    }

    if encoder_codec.id() == codec::Id::OPUS {
        rate = 48000;
    }

    Ok(NegotiatedParams {
        rate,
        format,
        channel_layout,
        channels,
        bit_rate: requested_bit_rate,
    })
}

/// Muxer streaming into a growable in-memory buffer, with one negotiated
/// audio stream.
///
/// Field order matters: the format context must drop before the AVIO guard,
/// which must drop before the writer it points into.
pub struct OutputContainer {
    ctx: ffmpeg::format::context::Output,
    _io: AvioGuard,
    writer: Box<MemoryWriter>,
    params: NegotiatedParams,
    frame_size: usize,
}

impl OutputContainer {
    /// Create the muxer for `container_kind`, pick its default audio encoder,
    /// negotiate parameters and open the encoder.
    ///
    /// `capacity` is the destination buffer's starting size estimate.
    pub fn open(
        container_kind: &str,
        input: &InputProfile,
        requested_rate: Option<i32>,
        requested_bit_rate: Option<usize>,
        capacity: usize,
    ) -> Result<(Self, ffmpeg::encoder::Audio)> {
        let (mut ctx, io, writer) = create_memory_output(container_kind, capacity)?;

        // On failure the format context must go before the AVIO guard, which
        // must go before the writer; loose bindings and `?` would drop them
        // back to front.
        let (params, encoder, frame_size) = match Self::configure(
            &mut ctx,
            container_kind,
            input,
            requested_rate,
            requested_bit_rate,
        ) {
            Ok(parts) => parts,
            Err(e) => {
                drop(ctx);
                drop(io);
                return Err(e);
            }
        };

        Ok((
            Self {
                ctx,
                _io: io,
                writer,
                params,
                frame_size,
            },
            encoder,
        ))
    }

    /// Pick the container's default audio encoder, negotiate parameters, open
    /// the encoder and create the stream.
    fn configure(
        ctx: &mut ffmpeg::format::context::Output,
        container_kind: &str,
        input: &InputProfile,
        requested_rate: Option<i32>,
        requested_bit_rate: Option<usize>,
    ) -> Result<(NegotiatedParams, ffmpeg::encoder::Audio, usize)> {
        // Container -> default audio codec mapping.
        let codec_id = ctx.format().codec("", ffmpeg::media::Type::Audio);
        if codec_id == codec::Id::None {
            return Err(TranscodeError::UnsupportedCodec(format!(
                "container {container_kind:?} has no default audio codec"
            )));
        }
        let encoder_codec = ffmpeg::encoder::find(codec_id).ok_or_else(|| {
            TranscodeError::UnsupportedCodec(format!("no encoder for {codec_id:?}"))
        })?;
        let audio_codec = encoder_codec.audio().map_err(|e| {
            TranscodeError::UnsupportedCodec(format!("{codec_id:?} is not an audio encoder: {e}"))
        })?;

        let params = negotiate(&audio_codec, input, requested_rate, requested_bit_rate)?;

        let mut context = codec::Context::new_with_codec(encoder_codec);
        context.set_time_base(ffmpeg::Rational::new(1, params.rate));

        let mut audio_enc = context.encoder().audio().map_err(|e| {
            TranscodeError::AllocationFailure(format!(
                "could not allocate an encoding context: {e}"
            ))
        })?;

        audio_enc.set_rate(params.rate);
        audio_enc.set_format(params.format);
        audio_enc.set_channel_layout(params.channel_layout);
        if let Some(bit_rate) = params.bit_rate {
            audio_enc.set_bit_rate(bit_rate);
        }

        // Some containers (e.g. MP4) need codec extradata in the container
        // header; the encoder must know before it is opened.
        if ctx
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER)
        {
            audio_enc.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let encoder = audio_enc.open_as(encoder_codec).map_err(|e| {
            TranscodeError::CodecOpenFailure(format!("could not open output codec: {e}"))
        })?;

        let mut stream = ctx.add_stream(encoder_codec).map_err(|e| {
            TranscodeError::AllocationFailure(format!("could not create new stream: {e}"))
        })?;
        stream.set_time_base(ffmpeg::Rational::new(1, params.rate));
        stream.set_parameters(&encoder);

        let frame_size = match encoder.frame_size() as usize {
            0 => FALLBACK_FRAME_SIZE,
            n => n,
        };

        tracing::debug!(
            container = container_kind,
            codec = ?codec_id,
            rate = params.rate,
            format = ?params.format,
            channels = params.channels,
            frame_size,
            "opened output stream"
        );

        Ok((params, encoder, frame_size))
    }

    pub fn params(&self) -> &NegotiatedParams {
        &self.params
    }

    /// Samples per channel the encoder wants per frame.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Time base of the muxed stream; valid once the stream exists, which
    /// `open` guarantees.
    pub fn stream_time_base(&self) -> ffmpeg::Rational {
        self.ctx
            .stream(0)
            .map(|s| s.time_base())
            .unwrap_or_else(|| ffmpeg::Rational::new(1, self.params.rate))
    }

    pub fn write_header(&mut self) -> Result<()> {
        self.ctx.write_header().map_err(|e| {
            TranscodeError::ContainerWriteFailure(format!("could not write header: {e}"))
        })
    }

    pub fn write_packet(&mut self, packet: &mut ffmpeg::Packet) -> Result<()> {
        packet.write_interleaved(&mut self.ctx).map_err(|e| {
            TranscodeError::ContainerWriteFailure(format!("could not write packet: {e}"))
        })
    }

    pub fn write_trailer(&mut self) -> Result<()> {
        self.ctx.write_trailer().map_err(|e| {
            TranscodeError::ContainerWriteFailure(format!("could not write trailer: {e}"))
        })
    }

    /// Consume the container and hand the written bytes to the caller.
    ///
    /// Only meaningful after a successful trailer write; the muxer context is
    /// released before the writer is unwrapped.
    pub fn into_bytes(self) -> Vec<u8> {
        let Self {
            ctx, _io, writer, ..
        } = self;
        drop(ctx);
        drop(_io);
        writer.into_inner()
    }
}
