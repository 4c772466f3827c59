//! Voice processing module
//!
//! Handles audio capture, voice activity detection, utterance framing,
//! wake word gating and speech-to-text.

mod capture;
mod event;
mod gain;
mod pcm;
mod pipeline;
mod pre_roll;
mod session;
mod stt;
mod vad;
mod wake_word;
mod wav;

pub use capture::{AudioCaptureSource, AudioSource, ChunkSink, DEFAULT_CHUNK_MS, DeviceErrorSink};
pub use event::VoiceEvent;
pub use gain::{MAX_GAIN, MIN_GAIN, apply_gain};
pub use pcm::{BYTES_PER_SAMPLE, PcmChunk, SAMPLE_RATE, ms_to_samples, pcm_to_f32};
pub use pipeline::{SpeakerIdentification, VoicePipeline};
pub use pre_roll::{DEFAULT_PRE_ROLL_MS, PreRollBuffer};
pub use session::{DEFAULT_ACTIVE_TIMEOUT_MS, SessionConfig, VoiceSession, VoiceSessionState};
pub use stt::{AmiVoiceStt, NullStt, SpeechToText, SttError, WhisperStt, from_config as stt_from_config};
pub use vad::{
    DEFAULT_MIN_SILENCE_MS, DEFAULT_VAD_THRESHOLD, SpeechClassifier, VAD_STATE_LEN,
    VAD_WINDOW_SAMPLES, VadConfig, VadOutcome, VadPrediction, VoiceActivityDetector,
};
pub use wake_word::WakeWordDetector;
pub use wav::{
    Utterance, WAV_HEADER_LEN, pcm_payload, pcm_to_wav, read_wav_file, samples_to_wav,
};
