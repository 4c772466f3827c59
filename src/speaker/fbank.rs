//! Log mel filterbank features for speaker embedding
//!
//! Kaldi-style front-end: 25ms Hamming-windowed frames every 10ms, 512-point
//! power spectrum, 80 triangular mel filters spanning 0-8000 Hz, natural log,
//! then per-bin mean normalization across the utterance.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::voice::SAMPLE_RATE;
use crate::{Error, Result};

/// Samples per analysis frame (25ms)
pub const FRAME_LENGTH: usize = 400;

/// Samples between frame starts (10ms)
pub const FRAME_SHIFT: usize = 160;

/// FFT size, frames are zero-padded to this length
pub const FFT_SIZE: usize = 512;

/// Number of mel bins per frame
pub const NUM_MEL_BINS: usize = 80;

/// Lower edge of the mel filterbank
const LOW_FREQ: f32 = 0.0;

/// Upper edge of the mel filterbank (Nyquist at 16kHz)
const HIGH_FREQ: f32 = 8000.0;

/// Floor applied before taking the log
const ENERGY_FLOOR: f32 = 1e-10;

/// Row-major `[num_frames x num_bins]` feature matrix
#[derive(Debug, Clone, PartialEq)]
pub struct FbankFeatures {
    data: Vec<f32>,
    num_frames: usize,
    num_bins: usize,
}

impl FbankFeatures {
    /// Wrap a row-major matrix
    ///
    /// # Errors
    ///
    /// Returns error if `data` is not `num_frames * num_bins` long
    pub fn new(data: Vec<f32>, num_frames: usize, num_bins: usize) -> Result<Self> {
        if data.len() != num_frames * num_bins {
            return Err(Error::Features(format!(
                "feature matrix has {} values, expected {num_frames} x {num_bins}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            num_frames,
            num_bins,
        })
    }

    #[must_use]
    pub const fn num_frames(&self) -> usize {
        self.num_frames
    }

    #[must_use]
    pub const fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// Flat row-major values
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// One frame's bins
    #[must_use]
    pub fn frame(&self, index: usize) -> &[f32] {
        &self.data[index * self.num_bins..(index + 1) * self.num_bins]
    }

    /// Consume into the flat row-major values
    #[must_use]
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Periodic-free Hamming window of length `n`
#[allow(clippy::cast_precision_loss)]
fn hamming_window(n: usize) -> Vec<f32> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f32;
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * std::f32::consts::PI * i as f32 / denom).cos())
        .collect()
}

/// Triangular mel filters as sparse `(first_bin, weights)` rows
#[allow(clippy::cast_precision_loss)]
fn mel_filter_bank(num_bins: usize, fft_size: usize, sample_rate: u32) -> Vec<(usize, Vec<f32>)> {
    let half_fft = fft_size / 2 + 1;
    let bin_hz = sample_rate as f32 / fft_size as f32;

    let low_mel = hz_to_mel(LOW_FREQ);
    let high_mel = hz_to_mel(HIGH_FREQ);
    let delta = (high_mel - low_mel) / (num_bins + 1) as f32;

    (0..num_bins)
        .map(|m| {
            let left = low_mel + m as f32 * delta;
            let center = left + delta;
            let right = center + delta;

            let weights: Vec<(usize, f32)> = (0..half_fft)
                .filter_map(|k| {
                    let mel = hz_to_mel(k as f32 * bin_hz);
                    if mel <= left || mel >= right {
                        return None;
                    }
                    let w = if mel <= center {
                        (mel - left) / (center - left)
                    } else {
                        (right - mel) / (right - center)
                    };
                    Some((k, w))
                })
                .collect();

            let first = weights.first().map_or(0, |(k, _)| *k);
            (first, weights.into_iter().map(|(_, w)| w).collect())
        })
        .collect()
}

/// Computes [`FbankFeatures`] from 16kHz mono samples
///
/// Window, filterbank and FFT plan are built once; `extract` is pure and
/// deterministic.
pub struct FeatureExtractor {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    mel_bank: Vec<(usize, Vec<f32>)>,
}

impl FeatureExtractor {
    #[must_use]
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(FFT_SIZE),
            window: hamming_window(FRAME_LENGTH),
            mel_bank: mel_filter_bank(NUM_MEL_BINS, FFT_SIZE, SAMPLE_RATE),
        }
    }

    /// Number of frames produced for `num_samples` of input
    #[must_use]
    pub const fn frames_for(num_samples: usize) -> usize {
        if num_samples < FRAME_LENGTH {
            0
        } else {
            (num_samples - FRAME_LENGTH) / FRAME_SHIFT + 1
        }
    }

    /// Extract mean-normalized log mel features
    ///
    /// # Errors
    ///
    /// Returns error if the input is shorter than one frame
    pub fn extract(&self, samples: &[f32]) -> Result<FbankFeatures> {
        let num_frames = Self::frames_for(samples.len());
        if num_frames == 0 {
            return Err(Error::Features(format!(
                "need at least {FRAME_LENGTH} samples, got {}",
                samples.len()
            )));
        }

        let mut data = Vec::with_capacity(num_frames * NUM_MEL_BINS);
        let mut buffer = vec![Complex::new(0.0f32, 0.0); FFT_SIZE];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.fft.get_inplace_scratch_len()];
        let mut power = vec![0.0f32; FFT_SIZE / 2 + 1];

        for t in 0..num_frames {
            let frame = &samples[t * FRAME_SHIFT..t * FRAME_SHIFT + FRAME_LENGTH];

            for (slot, (s, w)) in buffer.iter_mut().zip(frame.iter().zip(&self.window)) {
                *slot = Complex::new(s * w, 0.0);
            }
            for slot in &mut buffer[FRAME_LENGTH..] {
                *slot = Complex::new(0.0, 0.0);
            }

            self.fft.process_with_scratch(&mut buffer, &mut scratch);

            for (p, c) in power.iter_mut().zip(&buffer) {
                *p = c.norm_sqr();
            }

            data.extend(self.mel_bank.iter().map(|(first, weights)| {
                let energy: f32 = weights
                    .iter()
                    .zip(&power[*first..])
                    .map(|(w, p)| w * p)
                    .sum();
                energy.max(ENERGY_FLOOR).ln()
            }));
        }

        subtract_mean(&mut data, num_frames, NUM_MEL_BINS);
        tracing::trace!(frames = num_frames, "fbank features extracted");

        FbankFeatures::new(data, num_frames, NUM_MEL_BINS)
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Cepstral mean normalization: zero the mean of every bin across frames
#[allow(clippy::cast_precision_loss)]
fn subtract_mean(data: &mut [f32], num_frames: usize, num_bins: usize) {
    for bin in 0..num_bins {
        let mean: f64 = (0..num_frames)
            .map(|t| f64::from(data[t * num_bins + bin]))
            .sum::<f64>()
            / num_frames as f64;
        #[allow(clippy::cast_possible_truncation)]
        let mean = mean as f32;
        for t in 0..num_frames {
            data[t * num_bins + bin] -= mean;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_precision_loss)]
    fn sine(freq: f32, samples: usize) -> Vec<f32> {
        (0..samples)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / 16000.0).sin())
            .collect()
    }

    #[test]
    fn test_frame_count() {
        let extractor = FeatureExtractor::new();
        let features = extractor.extract(&sine(440.0, 16000)).unwrap();
        // (16000 - 400) / 160 + 1
        assert_eq!(features.num_frames(), 98);
        assert_eq!(features.num_bins(), NUM_MEL_BINS);
        assert!(features.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_short_input_is_error() {
        let extractor = FeatureExtractor::new();
        assert!(matches!(
            extractor.extract(&[0.0; FRAME_LENGTH - 1]),
            Err(Error::Features(_))
        ));
        assert_eq!(extractor.extract(&[0.1; FRAME_LENGTH]).unwrap().num_frames(), 1);
    }

    #[test]
    fn test_columns_have_zero_mean() {
        let extractor = FeatureExtractor::new();
        let features = extractor.extract(&sine(300.0, 8000)).unwrap();
        for bin in 0..features.num_bins() {
            let mean: f32 = (0..features.num_frames())
                .map(|t| features.frame(t)[bin])
                .sum::<f32>()
                / features.num_frames() as f32;
            assert!(mean.abs() < 1e-3, "bin {bin} mean {mean}");
        }
    }

    #[test]
    fn test_deterministic() {
        let extractor = FeatureExtractor::new();
        let audio = sine(1000.0, 4000);
        assert_eq!(
            extractor.extract(&audio).unwrap(),
            extractor.extract(&audio).unwrap()
        );
    }

    #[test]
    fn test_filters_cover_spectrum() {
        let bank = mel_filter_bank(NUM_MEL_BINS, FFT_SIZE, SAMPLE_RATE);
        assert_eq!(bank.len(), NUM_MEL_BINS);
        assert!(bank.iter().all(|(_, weights)| !weights.is_empty()));
        assert!(bank.windows(2).all(|pair| pair[0].0 <= pair[1].0));
    }
}
