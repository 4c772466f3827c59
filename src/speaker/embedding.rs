//! Speaker embeddings from finished utterances

use std::sync::Mutex;

use super::fbank::{FbankFeatures, FeatureExtractor};
use crate::voice::{pcm_payload, pcm_to_f32};
use crate::{Error, Result};

/// Embedding length produced by the bundled speaker model
pub const DEFAULT_EMBEDDING_DIM: usize = 256;

/// Norms below this are treated as zero
const MIN_NORM: f32 = 1e-6;

/// A network mapping fbank features to a raw speaker vector
pub trait EmbeddingNetwork: Send {
    /// Run one `[1 x frames x bins]` inference
    ///
    /// # Errors
    ///
    /// Returns error if inference fails
    fn infer(&mut self, features: &FbankFeatures) -> Result<Vec<f32>>;
}

/// L2-normalized speaker vector
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerEmbedding(Vec<f32>);

impl SpeakerEmbedding {
    /// Normalize a raw network output to unit length
    ///
    /// # Errors
    ///
    /// Returns error if the vector is empty, non-finite or has ~zero norm
    pub fn normalized(mut values: Vec<f32>) -> Result<Self> {
        let norm = l2_norm(&values);
        if !norm.is_finite() || norm < MIN_NORM {
            return Err(Error::DegenerateAudio(format!(
                "embedding norm {norm} cannot be normalized"
            )));
        }
        for v in &mut values {
            *v /= norm;
        }
        Ok(Self(values))
    }

    /// Decode little-endian f32 bytes, renormalizing
    ///
    /// # Errors
    ///
    /// Returns error if the length is not a multiple of 4 or the vector is
    /// degenerate
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(Error::Validation(format!(
                "embedding blob of {} bytes is not f32 aligned",
                bytes.len()
            )));
        }
        let values = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Self::normalized(values)
    }

    /// Serialize as little-endian f32 bytes
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Cosine similarity with another embedding
    ///
    /// Both sides are unit length, so this is their dot product.
    #[must_use]
    pub fn similarity(&self, other: &Self) -> f32 {
        self.0.iter().zip(&other.0).map(|(a, b)| a * b).sum()
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn norm(&self) -> f32 {
        l2_norm(&self.0)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// Turns utterance WAV buffers into [`SpeakerEmbedding`]s
///
/// One network handle shared by all callers behind a mutex.
pub struct SpeakerEmbeddingModel {
    network: Mutex<Box<dyn EmbeddingNetwork>>,
    extractor: FeatureExtractor,
    dimension: usize,
}

impl SpeakerEmbeddingModel {
    #[must_use]
    pub fn new(network: Box<dyn EmbeddingNetwork>, dimension: usize) -> Self {
        Self {
            network: Mutex::new(network),
            extractor: FeatureExtractor::new(),
            dimension,
        }
    }

    /// Expected embedding length
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed a canonical WAV utterance
    ///
    /// # Errors
    ///
    /// Returns error if the audio is malformed, silent or too short, if
    /// inference fails, or if the network returns the wrong dimension
    pub fn extract(&self, wav: &[u8]) -> Result<SpeakerEmbedding> {
        let pcm = pcm_payload(wav)?;
        if pcm.iter().all(|b| *b == 0) {
            return Err(Error::DegenerateAudio("utterance is silent".to_string()));
        }

        let samples = pcm_to_f32(pcm);
        let features = self.extractor.extract(&samples)?;

        let raw = {
            let mut network = self
                .network
                .lock()
                .map_err(|_| Error::Model("embedding network lock poisoned".to_string()))?;
            network.infer(&features)?
        };

        if raw.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: raw.len(),
            });
        }

        let embedding = SpeakerEmbedding::normalized(raw)?;
        tracing::debug!(frames = features.num_frames(), "speaker embedding extracted");
        Ok(embedding)
    }
}
