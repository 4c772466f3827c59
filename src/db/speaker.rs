//! Speaker repository for enrolled voice embeddings

use chrono::{DateTime, Utc};

use super::{DbPool, with_busy_retry};
use crate::speaker::SpeakerEmbedding;
use crate::{Error, Result};

/// An enrolled speaker
#[derive(Debug, Clone)]
pub struct StoredSpeaker {
    pub speaker_id: String,
    pub speaker_name: String,
    pub embedding: SpeakerEmbedding,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Speaker repository for CRUD operations on enrollments
#[derive(Clone)]
pub struct SpeakerRepo {
    pool: DbPool,
}

impl SpeakerRepo {
    /// Create a new speaker repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a speaker's embedding
    ///
    /// `created_at` survives re-enrollment; `updated_at` does not.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn upsert(
        &self,
        speaker_id: &str,
        speaker_name: &str,
        embedding: &SpeakerEmbedding,
    ) -> Result<()> {
        let blob = embedding.to_bytes();
        let now = Utc::now().to_rfc3339();

        with_busy_retry(|| {
            let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
            conn.execute(
                r"
                INSERT INTO speakers (speaker_id, speaker_name, embedding, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?4)
                ON CONFLICT(speaker_id) DO UPDATE SET
                    speaker_name = excluded.speaker_name,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                ",
                rusqlite::params![speaker_id, speaker_name, blob, now],
            )?;
            Ok(())
        })?;

        tracing::info!(speaker_id, speaker_name, "speaker enrolled");
        Ok(())
    }

    /// Whether any speaker is enrolled
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn exists_any(&self) -> Result<bool> {
        with_busy_retry(|| {
            let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
            let exists: bool =
                conn.query_row("SELECT EXISTS(SELECT 1 FROM speakers)", [], |row| row.get(0))?;
            Ok(exists)
        })
    }

    /// Get a speaker by id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails or the stored embedding is
    /// corrupt
    pub fn get(&self, speaker_id: &str) -> Result<Option<StoredSpeaker>> {
        let row = with_busy_retry(|| {
            let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
            let result = conn.query_row(
                r"
                SELECT speaker_id, speaker_name, embedding, created_at, updated_at
                FROM speakers
                WHERE speaker_id = ?1
                ",
                rusqlite::params![speaker_id],
                RawSpeaker::from_row,
            );

            match result {
                Ok(raw) => Ok(Some(raw)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })?;

        row.map(RawSpeaker::into_speaker).transpose()
    }

    /// Load every enrollment with a usable embedding of `dimension` values
    ///
    /// Corrupt rows are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn all(&self, dimension: usize) -> Result<Vec<StoredSpeaker>> {
        let rows = with_busy_retry(|| {
            let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
            let mut stmt = conn.prepare(
                r"
                SELECT speaker_id, speaker_name, embedding, created_at, updated_at
                FROM speakers
                ",
            )?;
            let rows = stmt.query_map([], RawSpeaker::from_row)?;

            let mut raw = Vec::new();
            for row in rows {
                raw.push(row?);
            }
            Ok(raw)
        })?;

        let mut speakers = Vec::with_capacity(rows.len());
        for raw in rows {
            let speaker_id = raw.speaker_id.clone();
            match raw.into_speaker() {
                Ok(speaker) if speaker.embedding.dimension() == dimension => speakers.push(speaker),
                Ok(speaker) => tracing::warn!(
                    speaker_id = %speaker_id,
                    dimension = speaker.embedding.dimension(),
                    expected = dimension,
                    "skipping enrollment with wrong embedding size"
                ),
                Err(e) => tracing::warn!(speaker_id = %speaker_id, error = %e, "skipping corrupt enrollment"),
            }
        }

        Ok(speakers)
    }

    /// List `(speaker_id, speaker_name)` pairs ordered by name
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        with_busy_retry(|| {
            let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
            let mut stmt = conn.prepare(
                "SELECT speaker_id, speaker_name FROM speakers ORDER BY speaker_name, speaker_id",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

            let mut speakers = Vec::new();
            for row in rows {
                speakers.push(row?);
            }
            Ok(speakers)
        })
    }

    /// Delete a speaker; deleting an unknown id is not an error
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete(&self, speaker_id: &str) -> Result<bool> {
        let rows = with_busy_retry(|| {
            let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
            Ok(conn.execute(
                "DELETE FROM speakers WHERE speaker_id = ?1",
                rusqlite::params![speaker_id],
            )?)
        })?;

        if rows > 0 {
            tracing::info!(speaker_id, "speaker deleted");
        }

        Ok(rows > 0)
    }
}

/// A row before its embedding blob is decoded
struct RawSpeaker {
    speaker_id: String,
    speaker_name: String,
    embedding: Vec<u8>,
    created_at: String,
    updated_at: String,
}

impl RawSpeaker {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            speaker_id: row.get(0)?,
            speaker_name: row.get(1)?,
            embedding: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    fn into_speaker(self) -> Result<StoredSpeaker> {
        Ok(StoredSpeaker {
            embedding: SpeakerEmbedding::from_bytes(&self.embedding)?,
            speaker_id: self.speaker_id,
            speaker_name: self.speaker_name,
            created_at: parse_datetime(&self.created_at),
            updated_at: parse_datetime(&self.updated_at),
        })
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
