use thiserror::Error;

/// Main error type for an in-memory transcoding call.
///
/// Every stage of the pipeline reports failure through one of these variants;
/// any failure is fatal to the whole call and no partial output is returned.
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("allocation failed: {0}")]
    AllocationFailure(String),

    #[error("expected exactly one audio input stream, found {0}")]
    UnsupportedStreamCount(usize),

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("parameter negotiation failed: {0}")]
    NegotiationFailure(String),

    #[error("could not open codec: {0}")]
    CodecOpenFailure(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("codec processing failed: {0}")]
    CodecProcessingFailure(String),

    #[error("container write failed: {0}")]
    ContainerWriteFailure(String),

    #[error("non-positive output duration ({0} s), cannot derive a bit rate")]
    InvalidDuration(f64),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TranscodeError>;
