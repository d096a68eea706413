//! End-to-end transcoding scenarios over in-memory fixtures.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;

use super::fixtures;
use crate::{transcode, TranscodeError, TranscodeOptions};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_transcode=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn aac_available() -> bool {
    crate::ensure_initialized();
    ffmpeg::encoder::find(codec::Id::AAC).is_some()
}

#[test]
fn test_wav_to_wav_roundtrip() {
    init_logging();
    let source = fixtures::mono_wav(44100, 0.5);

    let out = transcode(&source, &TranscodeOptions::new("wav")).unwrap();

    assert!(!out.data.is_empty());
    assert_eq!(&out.data[..4], b"RIFF");
    assert!((out.duration - 0.5).abs() < 0.05, "duration {}", out.duration);
    assert!(out.bit_rate > 0);
    assert_eq!(out.bit_rate % 1000, 0);
}

#[test]
fn test_wav_resampled_to_22050() {
    init_logging();
    let source = fixtures::mono_wav(44100, 0.5);

    let mut options = TranscodeOptions::new("wav");
    options.sample_rate = Some(22050);
    let out = transcode(&source, &options).unwrap();

    // Up to one resampler delay of samples may be left behind at end of
    // stream; the duration still has to land near the source's.
    assert!((out.duration - 0.5).abs() < 0.05, "duration {}", out.duration);
    // Half the rate, same seconds: roughly half the PCM payload.
    assert!(out.data.len() < source.len() * 3 / 4);
}

#[test]
fn test_wav_to_adts_aac() {
    init_logging();
    if !aac_available() {
        return;
    }
    let source = fixtures::mono_wav(44100, 0.5);

    let out = transcode(&source, &TranscodeOptions::new("adts")).unwrap();

    assert!(!out.data.is_empty());
    // ADTS frames start with a 12-bit syncword.
    assert_eq!(out.data[0], 0xff);
    assert_eq!(out.data[1] & 0xf0, 0xf0);
    assert!((out.duration - 0.5).abs() < 0.15, "duration {}", out.duration);
    assert_eq!(out.bit_rate % 1000, 0);
}

#[test]
fn test_wav_to_mp3() {
    init_logging();
    crate::ensure_initialized();
    if ffmpeg::encoder::find(codec::Id::MP3).is_none() {
        return;
    }
    let source = fixtures::mono_wav(44100, 0.5);

    let out = transcode(&source, &TranscodeOptions::new("mp3")).unwrap();

    assert!(!out.data.is_empty());
    assert!((out.duration - 0.5).abs() < 0.15, "duration {}", out.duration);
    assert_eq!(out.bit_rate % 1000, 0);
}

#[test]
fn test_requested_bit_rate_is_reported_floored() {
    init_logging();
    if !aac_available() {
        return;
    }
    let source = fixtures::mono_wav(44100, 2.0);

    let mut options = TranscodeOptions::new("adts");
    options.bit_rate = Some(64_000);
    let out = transcode(&source, &options).unwrap();

    assert_eq!(out.bit_rate % 1000, 0);
    // Within encoder granularity of the request.
    assert!(
        (16_000..=160_000).contains(&out.bit_rate),
        "bit rate {}",
        out.bit_rate
    );
}

#[test]
fn test_two_audio_streams_rejected() {
    init_logging();
    let source = fixtures::two_stream_matroska(44100);

    let err = transcode(&source, &TranscodeOptions::new("wav")).unwrap_err();
    assert!(matches!(err, TranscodeError::UnsupportedStreamCount(2)));
}

#[test]
fn test_unknown_container_rejected() {
    init_logging();
    let source = fixtures::mono_wav(44100, 0.1);

    let err = transcode(&source, &TranscodeOptions::new("no-such-container")).unwrap_err();
    assert!(matches!(err, TranscodeError::UnsupportedCodec(_)));
}

#[test]
fn test_garbage_source_rejected() {
    init_logging();
    let source = vec![0x42u8; 256];

    assert!(transcode(&source, &TranscodeOptions::new("wav")).is_err());
}
