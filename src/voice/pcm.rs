//! 16-bit PCM chunks as delivered by the capture device

use std::time::Duration;

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Bytes per 16-bit mono sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Convert a duration in milliseconds to a sample count at [`SAMPLE_RATE`]
#[must_use]
pub const fn ms_to_samples(ms: u32) -> usize {
    (ms as usize) * (SAMPLE_RATE as usize) / 1000
}

/// A buffer of 16-bit little-endian mono samples at 16kHz
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PcmChunk {
    bytes: Vec<u8>,
}

impl PcmChunk {
    /// Wrap raw little-endian bytes
    ///
    /// # Errors
    ///
    /// Returns error if the byte count is not a whole number of samples
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() % BYTES_PER_SAMPLE != 0 {
            return Err(Error::InvalidAudio(format!(
                "pcm chunk has odd byte length {}",
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    /// Build a chunk from signed samples
    #[must_use]
    pub fn from_samples(samples: &[i16]) -> Self {
        Self {
            bytes: samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
        }
    }

    /// Build a chunk from normalized float samples, clamping to the i16 range
    #[must_use]
    pub fn from_f32(samples: &[f32]) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let bytes = samples
            .iter()
            .flat_map(|&s| ((s * 32767.0).clamp(-32768.0, 32767.0) as i16).to_le_bytes())
            .collect();
        Self { bytes }
    }

    /// Raw little-endian bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the chunk, returning its bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Iterate over the decoded samples
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
    }

    /// Number of samples in the chunk
    #[must_use]
    pub fn len_samples(&self) -> usize {
        self.bytes.len() / BYTES_PER_SAMPLE
    }

    /// Whether the chunk holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Playback duration of the chunk
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.len_samples() as u64 * 1_000_000 / u64::from(SAMPLE_RATE))
    }

    /// Samples normalized to [-1.0, 1.0]
    #[must_use]
    pub fn to_f32(&self) -> Vec<f32> {
        pcm_to_f32(&self.bytes)
    }

    /// RMS level of the chunk in [0.0, 1.0]
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn rms(&self) -> f32 {
        let n = self.len_samples();
        if n == 0 {
            return 0.0;
        }
        let sum_squares: f64 = self
            .samples()
            .map(|s| {
                let v = f64::from(s) / 32768.0;
                v * v
            })
            .sum();
        (sum_squares / n as f64).sqrt() as f32
    }
}

/// Convert little-endian 16-bit PCM bytes to floats in [-1.0, 1.0]
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn pcm_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_samples_roundtrip() {
        let chunk = PcmChunk::from_samples(&[0, 1, -1, i16::MAX, i16::MIN]);
        assert_eq!(chunk.len_samples(), 5);
        assert_eq!(
            chunk.samples().collect::<Vec<_>>(),
            vec![0, 1, -1, i16::MAX, i16::MIN]
        );
    }

    #[test]
    fn test_odd_length_rejected() {
        assert!(PcmChunk::from_bytes(vec![0, 1, 2]).is_err());
        assert!(PcmChunk::from_bytes(vec![0, 1]).is_ok());
    }

    #[test]
    fn test_duration() {
        let chunk = PcmChunk::from_samples(&[0; 800]);
        assert_eq!(chunk.duration(), Duration::from_millis(50));
        assert_eq!(ms_to_samples(50), 800);
        assert_eq!(ms_to_samples(100), 1600);
    }

    #[test]
    fn test_normalization() {
        let floats = pcm_to_f32(&PcmChunk::from_samples(&[i16::MIN, 0]).into_bytes());
        assert!((floats[0] + 1.0).abs() < f32::EPSILON);
        assert!(floats[1].abs() < f32::EPSILON);
    }

    #[test]
    fn test_rms() {
        assert!(PcmChunk::from_samples(&[0; 100]).rms() < 1e-6);
        assert!(PcmChunk::from_samples(&[16384; 100]).rms() > 0.49);
    }
}
