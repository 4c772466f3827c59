//! Speaker identification
//!
//! Enrollment and identification share one embedding model. An utterance is
//! turned into log mel features ([`FeatureExtractor`]), embedded into a unit
//! vector ([`SpeakerEmbeddingModel`]) and compared by cosine similarity
//! against every enrolled speaker ([`SpeakerRegistry`]).

mod embedding;
mod fbank;
mod registry;

pub use embedding::{
    DEFAULT_EMBEDDING_DIM, EmbeddingNetwork, SpeakerEmbedding, SpeakerEmbeddingModel,
};
pub use fbank::{FFT_SIZE, FRAME_LENGTH, FRAME_SHIFT, FbankFeatures, FeatureExtractor, NUM_MEL_BINS};
pub use registry::{DEFAULT_IDENTIFICATION_THRESHOLD, SpeakerMatch, SpeakerRegistry};
