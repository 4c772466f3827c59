//! Bounded ring of recent audio prepended to each utterance

use std::collections::VecDeque;

use super::pcm::{PcmChunk, ms_to_samples};

/// Default pre-roll duration
pub const DEFAULT_PRE_ROLL_MS: u32 = 500;

/// Keeps the last `cap` worth of audio so speech onsets are not clipped
///
/// Whole chunks are evicted oldest-first until the buffered duration fits
/// within the cap.
#[derive(Debug, Clone)]
pub struct PreRollBuffer {
    chunks: VecDeque<PcmChunk>,
    buffered_samples: usize,
    cap_samples: usize,
}

impl PreRollBuffer {
    /// Create a buffer holding at most `cap_ms` of audio
    #[must_use]
    pub fn new(cap_ms: u32) -> Self {
        Self {
            chunks: VecDeque::new(),
            buffered_samples: 0,
            cap_samples: ms_to_samples(cap_ms),
        }
    }

    /// Append a chunk, evicting from the front until within the cap
    pub fn push(&mut self, chunk: &PcmChunk) {
        self.buffered_samples += chunk.len_samples();
        self.chunks.push_back(chunk.clone());

        while self.buffered_samples > self.cap_samples {
            let Some(evicted) = self.chunks.pop_front() else {
                break;
            };
            self.buffered_samples -= evicted.len_samples();
        }
    }

    /// Buffered chunks in chronological order; the buffer is left intact
    pub fn drain(&self) -> impl Iterator<Item = &PcmChunk> {
        self.chunks.iter()
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.buffered_samples = 0;
    }

    /// Number of buffered samples
    #[must_use]
    pub const fn buffered_samples(&self) -> usize {
        self.buffered_samples
    }

    /// Capacity in samples
    #[must_use]
    pub const fn cap_samples(&self) -> usize {
        self.cap_samples
    }
}

impl Default for PreRollBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_PRE_ROLL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(value: i16) -> PcmChunk {
        PcmChunk::from_samples(&[value; 800])
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut buffer = PreRollBuffer::new(100);
        buffer.push(&chunk(1));
        buffer.push(&chunk(2));
        buffer.push(&chunk(3));

        let firsts: Vec<i16> = buffer
            .drain()
            .filter_map(|c| c.samples().next())
            .collect();
        assert_eq!(firsts, vec![2, 3]);
        assert_eq!(buffer.buffered_samples(), 1600);
    }

    #[test]
    fn test_drain_does_not_clear() {
        let mut buffer = PreRollBuffer::new(500);
        buffer.push(&chunk(1));
        assert_eq!(buffer.drain().count(), 1);
        assert_eq!(buffer.drain().count(), 1);

        buffer.clear();
        assert_eq!(buffer.drain().count(), 0);
        assert_eq!(buffer.buffered_samples(), 0);
    }

    #[test]
    fn test_never_exceeds_cap() {
        let mut buffer = PreRollBuffer::new(120);
        for i in 0..50 {
            buffer.push(&PcmChunk::from_samples(&vec![0; 100 + i * 37]));
            assert!(buffer.buffered_samples() <= buffer.cap_samples());
        }
    }
}
