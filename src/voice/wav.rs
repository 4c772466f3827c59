//! Canonical 44-byte-header WAV buffers and utterance accumulation

use std::path::Path;
use std::time::Duration;

use super::pcm::{BYTES_PER_SAMPLE, PcmChunk, SAMPLE_RATE};
use crate::{Error, Result};

/// Length of the canonical PCM WAV header
pub const WAV_HEADER_LEN: usize = 44;

/// Write a canonical mono 16-bit 16kHz header for `data_len` payload bytes
#[allow(clippy::cast_possible_truncation)]
fn write_header(buf: &mut [u8], data_len: u32) {
    let byte_rate = SAMPLE_RATE * BYTES_PER_SAMPLE as u32;
    buf[0..4].copy_from_slice(b"RIFF");
    buf[4..8].copy_from_slice(&(36 + data_len).to_le_bytes());
    buf[8..12].copy_from_slice(b"WAVE");
    buf[12..16].copy_from_slice(b"fmt ");
    buf[16..20].copy_from_slice(&16u32.to_le_bytes());
    buf[20..22].copy_from_slice(&1u16.to_le_bytes());
    buf[22..24].copy_from_slice(&1u16.to_le_bytes());
    buf[24..28].copy_from_slice(&SAMPLE_RATE.to_le_bytes());
    buf[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    buf[32..34].copy_from_slice(&(BYTES_PER_SAMPLE as u16).to_le_bytes());
    buf[34..36].copy_from_slice(&16u16.to_le_bytes());
    buf[36..40].copy_from_slice(b"data");
    buf[40..44].copy_from_slice(&data_len.to_le_bytes());
}

/// Return the PCM payload of a canonical WAV buffer
///
/// # Errors
///
/// Returns error if the buffer is shorter than a header or is not RIFF/WAVE
pub fn pcm_payload(wav: &[u8]) -> Result<&[u8]> {
    if wav.len() < WAV_HEADER_LEN {
        return Err(Error::InvalidAudio(format!(
            "wav buffer of {} bytes is shorter than its header",
            wav.len()
        )));
    }
    if &wav[0..4] != b"RIFF" || &wav[8..12] != b"WAVE" {
        return Err(Error::InvalidAudio("missing RIFF/WAVE signature".to_string()));
    }
    Ok(&wav[WAV_HEADER_LEN..])
}

/// One captured utterance: a WAV header followed by PCM audio
///
/// The header sizes stay zero while the utterance is open and are patched
/// by [`Utterance::finalize`].
#[derive(Debug, Clone)]
pub struct Utterance {
    bytes: Vec<u8>,
}

impl Default for Utterance {
    fn default() -> Self {
        Self::new()
    }
}

impl Utterance {
    /// Open an empty utterance
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes: vec![0; WAV_HEADER_LEN],
        }
    }

    /// Open an utterance seeded with pre-roll audio
    #[must_use]
    pub fn seeded<'a>(chunks: impl IntoIterator<Item = &'a PcmChunk>) -> Self {
        let mut utterance = Self::new();
        for chunk in chunks {
            utterance.append(chunk);
        }
        utterance
    }

    /// Append a chunk of audio
    pub fn append(&mut self, chunk: &PcmChunk) {
        self.bytes.extend_from_slice(chunk.as_bytes());
    }

    /// Drop up to `samples` samples from the end of the audio
    pub fn trim_end(&mut self, samples: usize) {
        let keep = self.pcm().len().saturating_sub(samples * BYTES_PER_SAMPLE);
        self.bytes.truncate(WAV_HEADER_LEN + keep);
    }

    /// PCM bytes captured so far
    #[must_use]
    pub fn pcm(&self) -> &[u8] {
        &self.bytes[WAV_HEADER_LEN..]
    }

    /// Captured duration
    #[must_use]
    pub fn duration(&self) -> Duration {
        let samples = self.pcm().len() / BYTES_PER_SAMPLE;
        Duration::from_micros(samples as u64 * 1_000_000 / u64::from(SAMPLE_RATE))
    }

    /// Patch the header sizes and return the complete WAV file
    #[must_use]
    pub fn finalize(mut self) -> Vec<u8> {
        #[allow(clippy::cast_possible_truncation)]
        let data_len = self.pcm().len().min(u32::MAX as usize - 36) as u32;
        write_header(&mut self.bytes, data_len);
        self.bytes
    }
}

/// Wrap raw PCM bytes in a canonical WAV header
#[must_use]
pub fn pcm_to_wav(pcm: &[u8]) -> Vec<u8> {
    let mut utterance = Utterance::new();
    utterance.bytes.extend_from_slice(pcm);
    utterance.finalize()
}

/// Convert i16 samples to WAV bytes with hound
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16]) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Read a WAV file from disk into a canonical 16kHz mono 16-bit buffer
///
/// # Errors
///
/// Returns error if the file cannot be read or is not 16kHz mono 16-bit PCM
pub fn read_wav_file(path: &Path) -> Result<Vec<u8>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    if spec.channels != 1
        || spec.sample_rate != SAMPLE_RATE
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(Error::InvalidAudio(format!(
            "{} must be 16kHz mono 16-bit PCM (got {} Hz, {} channels, {} bits)",
            path.display(),
            spec.sample_rate,
            spec.channels,
            spec.bits_per_sample
        )));
    }

    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    tracing::debug!(path = %path.display(), samples = samples.len(), "read wav file");
    Ok(pcm_to_wav(PcmChunk::from_samples(&samples).as_bytes()))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_finalized_header_is_readable() {
        let mut utterance = Utterance::new();
        utterance.append(&PcmChunk::from_samples(&[1, 2, 3]));
        utterance.append(&PcmChunk::from_samples(&[4, 5]));
        let wav = utterance.finalize();

        assert_eq!(wav.len(), WAV_HEADER_LEN + 10);
        let reader = hound::WavReader::new(Cursor::new(&wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_seeded_from_chunks() {
        let chunks = [
            PcmChunk::from_samples(&[0; 800]),
            PcmChunk::from_samples(&[0; 800]),
        ];
        let utterance = Utterance::seeded(chunks.iter());
        assert_eq!(utterance.duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_trim_end_never_touches_header() {
        let mut utterance = Utterance::seeded([&PcmChunk::from_samples(&[7; 10])]);
        utterance.trim_end(4);
        assert_eq!(utterance.pcm().len(), 12);

        utterance.trim_end(100);
        assert!(utterance.pcm().is_empty());
        assert_eq!(utterance.finalize().len(), WAV_HEADER_LEN);
    }

    #[test]
    fn test_pcm_payload() {
        let wav = pcm_to_wav(&[1, 0, 2, 0]);
        assert_eq!(pcm_payload(&wav).unwrap(), &[1, 0, 2, 0]);
        assert!(pcm_payload(&wav[..10]).is_err());
        assert!(pcm_payload(&[0u8; 48]).is_err());
    }

    #[test]
    fn test_hound_writer_output_decodes() {
        let wav = samples_to_wav(&[100, -100]).unwrap();
        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.len(), 2);
    }
}
