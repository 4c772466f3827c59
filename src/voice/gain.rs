//! Linear microphone gain with saturation

use std::borrow::Cow;

use super::pcm::PcmChunk;

/// Lowest accepted gain factor
pub const MIN_GAIN: f32 = 0.1;

/// Highest accepted gain factor
pub const MAX_GAIN: f32 = 10.0;

/// Amplify a chunk by `gain`, saturating each sample to the i16 range
///
/// `gain` is clamped to [`MIN_GAIN`, `MAX_GAIN`]. A unity gain returns the
/// input unchanged without allocating.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn apply_gain(chunk: &PcmChunk, gain: f32) -> Cow<'_, PcmChunk> {
    let gain = if gain.is_nan() {
        1.0
    } else {
        gain.clamp(MIN_GAIN, MAX_GAIN)
    };

    if gain == 1.0 {
        return Cow::Borrowed(chunk);
    }

    let samples: Vec<i16> = chunk
        .samples()
        .map(|s| saturate(f32::from(s) * gain))
        .collect();

    Cow::Owned(PcmChunk::from_samples(&samples))
}

#[allow(clippy::cast_possible_truncation)]
fn saturate(value: f32) -> i16 {
    value.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_unity_gain_borrows() {
        let chunk = PcmChunk::from_samples(&[1, -2, 3]);
        let out = apply_gain(&chunk, 1.0);
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out.as_bytes(), chunk.as_bytes());
    }

    #[test]
    fn test_saturates_instead_of_wrapping() {
        let chunk = PcmChunk::from_samples(&[20000, -20000, 100]);
        let out = apply_gain(&chunk, 2.0);
        assert_eq!(out.samples().collect::<Vec<_>>(), vec![32767, -32768, 200]);
    }

    #[test]
    fn test_gain_is_clamped() {
        let chunk = PcmChunk::from_samples(&[100]);
        assert_eq!(apply_gain(&chunk, 100.0).samples().next(), Some(1000));
        assert_eq!(apply_gain(&chunk, 0.0).samples().next(), Some(10));
    }

    proptest! {
        #[test]
        fn prop_output_stays_in_range(
            samples in prop::collection::vec(any::<i16>(), 0..256),
            gain in 0.0f32..20.0,
        ) {
            let chunk = PcmChunk::from_samples(&samples);
            let out = apply_gain(&chunk, gain);
            prop_assert_eq!(out.len_samples(), samples.len());
            for (input, output) in samples.iter().zip(out.samples()) {
                let expected = (f32::from(*input) * gain.clamp(MIN_GAIN, MAX_GAIN)).round();
                if expected >= 32767.0 {
                    prop_assert_eq!(output, i16::MAX);
                } else if expected <= -32768.0 {
                    prop_assert_eq!(output, i16::MIN);
                }
            }
        }

        #[test]
        fn prop_unity_gain_is_bit_identical(samples in prop::collection::vec(any::<i16>(), 0..256)) {
            let chunk = PcmChunk::from_samples(&samples);
            let gained = apply_gain(&chunk, 1.0);
            prop_assert_eq!(gained.as_bytes(), chunk.as_bytes());
        }
    }
}
