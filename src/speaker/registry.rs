//! Enrolled speaker registry and identification

use std::sync::Arc;

use super::embedding::{SpeakerEmbedding, SpeakerEmbeddingModel};
use crate::db::{SpeakerRepo, StoredSpeaker};
use crate::{Error, Result};

/// Default minimum cosine similarity for a match
pub const DEFAULT_IDENTIFICATION_THRESHOLD: f32 = 0.6;

/// Registries larger than this are scored on several threads
const PARALLEL_THRESHOLD: usize = 64;

/// Best enrollment for a query utterance
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerMatch {
    pub speaker_id: String,
    pub speaker_name: String,
    /// Cosine similarity in [-1.0, 1.0]
    pub confidence: f32,
}

/// Persists enrollments and identifies utterances against them
pub struct SpeakerRegistry {
    repo: SpeakerRepo,
    model: Arc<SpeakerEmbeddingModel>,
    threshold: f32,
}

impl SpeakerRegistry {
    #[must_use]
    pub const fn new(repo: SpeakerRepo, model: Arc<SpeakerEmbeddingModel>, threshold: f32) -> Self {
        Self {
            repo,
            model,
            threshold,
        }
    }

    /// Minimum similarity accepted by [`Self::identify`]
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Enroll or re-enroll a speaker from a WAV utterance
    ///
    /// # Errors
    ///
    /// Returns error if any input is empty, the audio cannot be embedded, or
    /// the write fails
    pub fn register(&self, speaker_id: &str, speaker_name: &str, wav: &[u8]) -> Result<()> {
        if speaker_id.trim().is_empty() {
            return Err(Error::Validation("speaker id is empty".to_string()));
        }
        if speaker_name.trim().is_empty() {
            return Err(Error::Validation("speaker name is empty".to_string()));
        }
        if wav.is_empty() {
            return Err(Error::Validation("enrollment audio is empty".to_string()));
        }

        let embedding = self.model.extract(wav)?;
        self.register_embedding(speaker_id, speaker_name, &embedding)
    }

    /// Store a precomputed embedding
    ///
    /// # Errors
    ///
    /// Returns error if the embedding has the wrong dimension or the write fails
    pub fn register_embedding(
        &self,
        speaker_id: &str,
        speaker_name: &str,
        embedding: &SpeakerEmbedding,
    ) -> Result<()> {
        if embedding.dimension() != self.model.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.model.dimension(),
                actual: embedding.dimension(),
            });
        }
        self.repo.upsert(speaker_id, speaker_name, embedding)
    }

    /// Whether identification has anything to compare against
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be queried
    pub fn has_any(&self) -> Result<bool> {
        self.repo.exists_any()
    }

    /// Identify who spoke a WAV utterance
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSpeakersRegistered`] for an empty registry,
    /// [`Error::LowConfidenceMatch`] when the best score is below the
    /// threshold, or any embedding/database error
    pub fn identify(&self, wav: &[u8]) -> Result<SpeakerMatch> {
        if !self.has_any()? {
            return Err(Error::NoSpeakersRegistered);
        }
        let query = self.model.extract(wav)?;
        self.identify_embedding(&query)
    }

    /// Identify a precomputed embedding
    ///
    /// # Errors
    ///
    /// Same as [`Self::identify`] minus embedding errors
    pub fn identify_embedding(&self, query: &SpeakerEmbedding) -> Result<SpeakerMatch> {
        let speakers = self.repo.all(self.model.dimension())?;
        let Some((best, confidence)) = best_match(query, &speakers) else {
            return Err(Error::NoSpeakersRegistered);
        };

        if confidence < self.threshold {
            tracing::debug!(
                speaker_id = %best.speaker_id,
                confidence,
                threshold = self.threshold,
                "best speaker match below threshold"
            );
            return Err(Error::LowConfidenceMatch {
                speaker_id: best.speaker_id.clone(),
                speaker_name: best.speaker_name.clone(),
                confidence,
                threshold: self.threshold,
            });
        }

        tracing::info!(speaker_id = %best.speaker_id, confidence, "speaker identified");
        Ok(SpeakerMatch {
            speaker_id: best.speaker_id.clone(),
            speaker_name: best.speaker_name.clone(),
            confidence,
        })
    }

    /// Remove an enrollment; unknown ids are ignored
    ///
    /// # Errors
    ///
    /// Returns error if the write fails
    pub fn delete(&self, speaker_id: &str) -> Result<()> {
        self.repo.delete(speaker_id).map(|_| ())
    }

    /// `(speaker_id, speaker_name)` for every enrollment
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be queried
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        self.repo.list()
    }
}

/// Highest-similarity enrollment, scoring large registries in parallel
fn best_match<'a>(
    query: &SpeakerEmbedding,
    speakers: &'a [StoredSpeaker],
) -> Option<(&'a StoredSpeaker, f32)> {
    if speakers.len() <= PARALLEL_THRESHOLD {
        return best_of(query, speakers);
    }

    let workers = std::thread::available_parallelism().map_or(2, std::num::NonZeroUsize::get);
    let per_worker = speakers.len().div_ceil(workers);

    std::thread::scope(|scope| {
        let handles: Vec<_> = speakers
            .chunks(per_worker)
            .map(|slice| scope.spawn(move || best_of(query, slice)))
            .collect();

        handles
            .into_iter()
            .filter_map(|h| h.join().ok().flatten())
            .max_by(|a, b| a.1.total_cmp(&b.1))
    })
}

fn best_of<'a>(
    query: &SpeakerEmbedding,
    speakers: &'a [StoredSpeaker],
) -> Option<(&'a StoredSpeaker, f32)> {
    speakers
        .iter()
        .map(|s| (s, query.similarity(&s.embedding)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn stored(id: &str, values: &[f32]) -> StoredSpeaker {
        StoredSpeaker {
            speaker_id: id.to_string(),
            speaker_name: id.to_uppercase(),
            embedding: SpeakerEmbedding::normalized(values.to_vec()).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_best_of_picks_highest() {
        let speakers = vec![stored("a", &[1.0, 0.0]), stored("b", &[0.6, 0.8])];
        let query = SpeakerEmbedding::normalized(vec![0.0, 1.0]).unwrap();
        let (best, score) = best_of(&query, &speakers).unwrap();
        assert_eq!(best.speaker_id, "b");
        assert!((score - 0.8).abs() < 1e-6);
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_parallel_matches_sequential() {
        let speakers: Vec<StoredSpeaker> = (0..300)
            .map(|i| {
                let angle = i as f32 * 0.01;
                stored(&format!("s{i}"), &[angle.cos(), angle.sin()])
            })
            .collect();
        let query = SpeakerEmbedding::normalized(vec![1.5f32.cos(), 1.5f32.sin()]).unwrap();

        let (parallel, _) = best_match(&query, &speakers).unwrap();
        let (sequential, _) = best_of(&query, &speakers).unwrap();
        assert_eq!(parallel.speaker_id, sequential.speaker_id);
        assert_eq!(parallel.speaker_id, "s150");
    }

    #[test]
    fn test_empty_has_no_match() {
        let query = SpeakerEmbedding::normalized(vec![1.0]).unwrap();
        assert!(best_match(&query, &[]).is_none());
    }
}
