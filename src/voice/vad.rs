//! Voice activity detection over fixed 32ms windows
//!
//! Audio is buffered until a full 512-sample window is available, each window
//! is scored by a recurrent [`SpeechClassifier`], and a hangover counter turns
//! the per-window decisions into speech start/end edges.

use super::pcm::{PcmChunk, ms_to_samples};
use crate::Result;

/// Samples per VAD window (32ms at 16kHz)
pub const VAD_WINDOW_SAMPLES: usize = 512;

/// Size of the recurrent state tensor: 2 * 1 * 128
pub const VAD_STATE_LEN: usize = 256;

/// Default speech probability threshold
pub const DEFAULT_VAD_THRESHOLD: f32 = 0.5;

/// Default silence needed to close a speech segment
pub const DEFAULT_MIN_SILENCE_MS: u32 = 100;

/// Output of one classifier step
#[derive(Debug, Clone)]
pub struct VadPrediction {
    /// Probability that the window contains speech
    pub probability: f32,
    /// Updated recurrent state, [`VAD_STATE_LEN`] values
    pub state: Vec<f32>,
}

/// A recurrent speech/non-speech classifier
///
/// The classifier holds no sequence state of its own: the detector passes the
/// previous hidden state in and commits the returned one only on success.
pub trait SpeechClassifier: Send {
    /// Score one window of exactly [`VAD_WINDOW_SAMPLES`] samples
    ///
    /// # Errors
    ///
    /// Returns error if inference fails
    fn predict(&mut self, window: &[f32], state: &[f32]) -> Result<VadPrediction>;
}

/// Detector thresholds
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Probability at or above which a window counts as speech
    pub threshold: f32,
    /// Silence that must be exceeded before speech is considered over
    pub min_silence_duration_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_VAD_THRESHOLD,
            min_silence_duration_ms: DEFAULT_MIN_SILENCE_MS,
        }
    }
}

/// Result of feeding one buffer of audio
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VadOutcome {
    /// Whether the detector is inside a speech segment after this call
    pub triggered: bool,
    /// A speech segment started during this call
    pub speech_started: bool,
    /// A speech segment ended during this call
    pub speech_ended: bool,
    /// On `speech_ended`, how many samples at the end of this call follow
    /// the last speech window
    pub trailing_silence_samples: usize,
}

/// Streaming voice activity detector
pub struct VoiceActivityDetector {
    classifier: Box<dyn SpeechClassifier>,
    threshold: f32,
    min_silence_samples: usize,
    hidden: Vec<f32>,
    pending: Vec<f32>,
    triggered: bool,
    samples_since_last_speech: usize,
    last_probability: f32,
    consecutive_failures: u32,
}

impl VoiceActivityDetector {
    /// Create a detector around a classifier
    #[must_use]
    pub fn new(classifier: Box<dyn SpeechClassifier>, config: VadConfig) -> Self {
        Self {
            classifier,
            threshold: config.threshold,
            min_silence_samples: ms_to_samples(config.min_silence_duration_ms),
            hidden: vec![0.0; VAD_STATE_LEN],
            pending: Vec::with_capacity(VAD_WINDOW_SAMPLES * 4),
            triggered: false,
            samples_since_last_speech: 0,
            last_probability: 0.0,
            consecutive_failures: 0,
        }
    }

    /// Feed normalized samples of any length
    ///
    /// Complete windows are classified immediately; the remainder waits for
    /// the next call.
    pub fn process_audio(&mut self, samples: &[f32]) -> VadOutcome {
        let mut outcome = VadOutcome::default();
        self.pending.extend_from_slice(samples);

        let mut offset = 0;
        let mut ended_at = None;
        while self.pending.len() - offset >= VAD_WINDOW_SAMPLES {
            let window: Vec<f32> = self.pending[offset..offset + VAD_WINDOW_SAMPLES].to_vec();
            offset += VAD_WINDOW_SAMPLES;

            let is_speech = self.classify(&window);
            if self.advance(is_speech, &mut outcome) {
                ended_at = Some(offset);
            }
        }
        if let Some(end) = ended_at {
            outcome.trailing_silence_samples += self.pending.len() - end;
        }
        self.pending.drain(..offset);

        outcome.triggered = self.triggered;
        outcome
    }

    /// Feed a PCM chunk
    pub fn process_chunk(&mut self, chunk: &PcmChunk) -> VadOutcome {
        self.process_audio(&chunk.to_f32())
    }

    /// Run one window through the classifier, committing state only on success
    fn classify(&mut self, window: &[f32]) -> bool {
        match self.classifier.predict(window, &self.hidden) {
            Ok(prediction)
                if prediction.state.len() == VAD_STATE_LEN
                    && prediction.probability.is_finite() =>
            {
                self.hidden = prediction.state;
                self.last_probability = prediction.probability;
                self.consecutive_failures = 0;
                prediction.probability >= self.threshold
            }
            Ok(prediction) => {
                self.note_failure(&format!(
                    "malformed prediction (probability {}, state len {})",
                    prediction.probability,
                    prediction.state.len()
                ));
                false
            }
            Err(e) => {
                self.note_failure(&e.to_string());
                false
            }
        }
    }

    fn note_failure(&mut self, reason: &str) {
        self.consecutive_failures += 1;
        self.last_probability = 0.0;
        if self.consecutive_failures == 1 {
            tracing::warn!(error = reason, "vad inference failed, treating window as silence");
        } else {
            tracing::debug!(
                error = reason,
                failures = self.consecutive_failures,
                "vad inference failed again"
            );
        }
    }

    /// Apply one window decision to the hangover state machine
    ///
    /// Returns true when this window closed a speech segment.
    fn advance(&mut self, is_speech: bool, outcome: &mut VadOutcome) -> bool {
        if is_speech {
            self.samples_since_last_speech = 0;
            if !self.triggered {
                self.triggered = true;
                outcome.speech_started = true;
                tracing::debug!(probability = self.last_probability, "speech start");
            }
            return false;
        }

        if self.triggered {
            self.samples_since_last_speech += VAD_WINDOW_SAMPLES;
            if self.samples_since_last_speech > self.min_silence_samples {
                self.triggered = false;
                outcome.speech_ended = true;
                outcome.trailing_silence_samples = self.samples_since_last_speech;
                self.samples_since_last_speech = 0;
                tracing::debug!("speech end");
                return true;
            }
        }
        false
    }

    /// Zero hidden state, counters, and any buffered remainder
    pub fn reset(&mut self) {
        self.hidden.iter_mut().for_each(|v| *v = 0.0);
        self.pending.clear();
        self.triggered = false;
        self.samples_since_last_speech = 0;
        self.last_probability = 0.0;
        self.consecutive_failures = 0;
    }

    /// Whether the detector is inside a speech segment
    #[must_use]
    pub const fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Probability produced by the most recent window
    #[must_use]
    pub const fn last_probability(&self) -> f32 {
        self.last_probability
    }

    /// Samples waiting for a full window
    #[must_use]
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Current recurrent state
    #[must_use]
    pub fn hidden_state(&self) -> &[f32] {
        &self.hidden
    }
}
