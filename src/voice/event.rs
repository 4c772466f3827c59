//! Events raised by the voice pipeline

use super::session::VoiceSessionState;

/// Notification broadcast to pipeline subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    /// An utterance was accepted by the session
    RecognizedText(String),

    /// Session state changed
    StateChanged(VoiceSessionState),

    /// Input level of the latest chunk
    VoiceLevel {
        /// RMS level in [0.0, 1.0]
        level: f32,
        /// Whether the VAD considered the chunk speech
        is_above_threshold: bool,
    },

    /// Utterance attributed to an enrolled speaker
    SpeakerIdentified {
        speaker_id: String,
        speaker_name: String,
        confidence: f32,
    },

    /// The capture device reported an error
    DeviceError(String),
}
