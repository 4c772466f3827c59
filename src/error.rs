//! Error types for the voice pipeline

use thiserror::Error;

/// Result type alias for voice pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Malformed audio buffer (bad WAV header, odd byte count, wrong format)
    #[error("invalid audio: {0}")]
    InvalidAudio(String),

    /// Voice activity detection error
    #[error("vad error: {0}")]
    Vad(String),

    /// Model loading or inference error
    #[error("model error: {0}")]
    Model(String),

    /// Feature extraction error
    #[error("feature extraction error: {0}")]
    Features(String),

    /// Input rejected before doing any work
    #[error("validation error: {0}")]
    Validation(String),

    /// Audio carries no usable signal (silence or zero-norm embedding)
    #[error("degenerate audio: {0}")]
    DegenerateAudio(String),

    /// Embedding network returned a vector of the wrong size
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Identification attempted against an empty registry
    #[error("no speakers registered")]
    NoSpeakersRegistered,

    /// Best registry match fell below the identification threshold
    #[error(
        "low confidence match: best {speaker_id} at {confidence:.3} below threshold {threshold:.3}"
    )]
    LowConfidenceMatch {
        speaker_id: String,
        speaker_name: String,
        confidence: f32,
        threshold: f32,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV encoding/decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether this error is one of the expected speaker identification outcomes
    ///
    /// Callers branch on these explicitly; everything else is a real failure.
    #[must_use]
    pub const fn is_identification_miss(&self) -> bool {
        matches!(
            self,
            Self::NoSpeakersRegistered | Self::LowConfidenceMatch { .. }
        )
    }
}
