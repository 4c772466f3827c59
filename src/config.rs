//! Configuration for the voice pipeline
//!
//! Values come from environment variables with built-in defaults. Numbers
//! outside their accepted range are clamped with a warning rather than
//! rejected.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::speaker::{DEFAULT_EMBEDDING_DIM, DEFAULT_IDENTIFICATION_THRESHOLD};
use crate::voice::{
    DEFAULT_ACTIVE_TIMEOUT_MS, DEFAULT_CHUNK_MS, DEFAULT_MIN_SILENCE_MS, DEFAULT_PRE_ROLL_MS,
    DEFAULT_VAD_THRESHOLD, SessionConfig, VadConfig, WakeWordDetector,
};
use crate::{Error, Result};

/// Voice pipeline configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (speaker database, models)
    pub data_dir: PathBuf,

    /// Capture, VAD and session settings
    pub voice: VoiceConfig,

    /// Speaker identification settings
    pub speaker: SpeakerConfig,

    /// Speech-to-text backend
    pub stt: SttConfig,

    /// Model file locations
    pub models: ModelConfig,
}

/// Capture, VAD and session configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Speech probability threshold, 0.0 to 1.0
    pub vad_threshold: f32,

    /// Silence that ends an utterance
    pub silence_timeout_ms: u32,

    /// Idle time before an active session sleeps
    pub active_timeout_ms: u64,

    /// Wake phrases, already split
    pub wake_words: Vec<String>,

    /// Linear microphone gain, 0.1 to 10.0
    pub microphone_gain: f32,

    /// Start active and never sleep (manual toggle)
    pub start_active: bool,

    /// Audio kept ahead of each detected speech start
    pub pre_roll_ms: u32,

    /// Size of chunks delivered by the capture device
    pub chunk_ms: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            vad_threshold: DEFAULT_VAD_THRESHOLD,
            silence_timeout_ms: DEFAULT_MIN_SILENCE_MS,
            active_timeout_ms: DEFAULT_ACTIVE_TIMEOUT_MS,
            wake_words: Vec::new(),
            microphone_gain: 1.0,
            start_active: false,
            pre_roll_ms: DEFAULT_PRE_ROLL_MS,
            chunk_ms: DEFAULT_CHUNK_MS,
        }
    }
}

impl VoiceConfig {
    /// VAD thresholds
    #[must_use]
    pub const fn vad(&self) -> VadConfig {
        VadConfig {
            threshold: self.vad_threshold,
            min_silence_duration_ms: self.silence_timeout_ms,
        }
    }

    /// Session state machine settings
    #[must_use]
    pub const fn session(&self) -> SessionConfig {
        SessionConfig {
            active_timeout: Duration::from_millis(self.active_timeout_ms),
            start_active: self.start_active,
        }
    }

    /// Wake word detector for the configured phrases
    #[must_use]
    pub fn wake_word_detector(&self) -> WakeWordDetector {
        WakeWordDetector::new(&self.wake_words)
    }
}

/// What to do with an utterance whose speaker cannot be identified
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdentificationFailurePolicy {
    /// Drop the utterance
    Abort,
    /// Transcribe it without a speaker tag
    #[default]
    ProceedUntagged,
}

impl FromStr for IdentificationFailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "proceed" | "untagged" | "proceed-untagged" => Ok(Self::ProceedUntagged),
            other => Err(Error::Config(format!(
                "unknown identification failure policy: {other}"
            ))),
        }
    }
}

/// Speaker identification configuration
#[derive(Debug, Clone)]
pub struct SpeakerConfig {
    /// Run identification when a speaker model is available
    pub enabled: bool,

    /// Minimum cosine similarity for a match
    pub threshold: f32,

    /// Policy for unidentified utterances
    pub on_failure: IdentificationFailurePolicy,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: DEFAULT_IDENTIFICATION_THRESHOLD,
            on_failure: IdentificationFailurePolicy::default(),
        }
    }
}

/// Speech-to-text backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    /// `OpenAI` Whisper
    Whisper,
    /// `AmiVoice` Cloud Platform
    AmiVoice,
    /// No transcription
    Null,
}

impl SttProvider {
    /// Model or engine used when none is configured
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Whisper => "whisper-1",
            Self::AmiVoice => "-a-general",
            Self::Null => "",
        }
    }
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "amivoice" => Ok(Self::AmiVoice),
            "null" | "none" | "off" => Ok(Self::Null),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Speech-to-text configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub provider: SttProvider,

    /// API key for the selected provider
    pub api_key: Option<SecretString>,

    /// Model (Whisper) or grammar (`AmiVoice`) name
    pub model: String,

    /// Request timeout
    pub timeout_secs: u64,
}

/// Model file locations
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Silero VAD ONNX model
    pub vad_model: PathBuf,

    /// Speaker embedding ONNX model; identification is off without one
    pub speaker_model: Option<PathBuf>,

    /// Expected speaker embedding length
    pub embedding_dim: usize,
}

impl Config {
    /// Load configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through a variable lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = get("COCORO_DATA_DIR").map_or_else(default_data_dir, PathBuf::from);

        let voice = VoiceConfig {
            vad_threshold: clamped(
                "COCORO_VAD_THRESHOLD",
                parse(get("COCORO_VAD_THRESHOLD"), "COCORO_VAD_THRESHOLD")?
                    .unwrap_or(DEFAULT_VAD_THRESHOLD),
                0.0,
                1.0,
            ),
            silence_timeout_ms: clamped(
                "COCORO_SILENCE_TIMEOUT_MS",
                parse(get("COCORO_SILENCE_TIMEOUT_MS"), "COCORO_SILENCE_TIMEOUT_MS")?
                    .unwrap_or(DEFAULT_MIN_SILENCE_MS),
                0,
                5_000,
            ),
            active_timeout_ms: clamped(
                "COCORO_ACTIVE_TIMEOUT_MS",
                parse(get("COCORO_ACTIVE_TIMEOUT_MS"), "COCORO_ACTIVE_TIMEOUT_MS")?
                    .unwrap_or(DEFAULT_ACTIVE_TIMEOUT_MS),
                100,
                86_400_000,
            ),
            wake_words: get("COCORO_WAKE_WORDS")
                .map(|list| split_list(&list))
                .unwrap_or_default(),
            microphone_gain: clamped(
                "COCORO_MIC_GAIN",
                parse(get("COCORO_MIC_GAIN"), "COCORO_MIC_GAIN")?.unwrap_or(1.0),
                crate::voice::MIN_GAIN,
                crate::voice::MAX_GAIN,
            ),
            start_active: parse_bool(get("COCORO_START_ACTIVE")),
            pre_roll_ms: clamped(
                "COCORO_PRE_ROLL_MS",
                parse(get("COCORO_PRE_ROLL_MS"), "COCORO_PRE_ROLL_MS")?
                    .unwrap_or(DEFAULT_PRE_ROLL_MS),
                0,
                5_000,
            ),
            chunk_ms: clamped(
                "COCORO_CHUNK_MS",
                parse(get("COCORO_CHUNK_MS"), "COCORO_CHUNK_MS")?.unwrap_or(DEFAULT_CHUNK_MS),
                10,
                500,
            ),
        };

        let speaker = SpeakerConfig {
            enabled: get("COCORO_SPEAKER_ID").is_none_or(|v| parse_bool(Some(v))),
            threshold: clamped(
                "COCORO_SPEAKER_THRESHOLD",
                parse(get("COCORO_SPEAKER_THRESHOLD"), "COCORO_SPEAKER_THRESHOLD")?
                    .unwrap_or(DEFAULT_IDENTIFICATION_THRESHOLD),
                0.0,
                1.0,
            ),
            on_failure: get("COCORO_SPEAKER_ON_FAILURE")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or_default(),
        };

        let openai_key = get("OPENAI_API_KEY");
        let amivoice_key = get("AMIVOICE_API_KEY");
        let provider = match get("COCORO_STT_PROVIDER") {
            Some(name) => name.parse()?,
            None if openai_key.is_some() => SttProvider::Whisper,
            None if amivoice_key.is_some() => SttProvider::AmiVoice,
            None => {
                tracing::warn!("no STT API key found, transcription disabled");
                SttProvider::Null
            }
        };
        let stt = SttConfig {
            provider,
            api_key: match provider {
                SttProvider::Whisper => openai_key,
                SttProvider::AmiVoice => amivoice_key,
                SttProvider::Null => None,
            }
            .map(SecretString::from),
            model: get("COCORO_STT_MODEL")
                .unwrap_or_else(|| provider.default_model().to_string()),
            timeout_secs: clamped(
                "COCORO_STT_TIMEOUT_SECS",
                parse(get("COCORO_STT_TIMEOUT_SECS"), "COCORO_STT_TIMEOUT_SECS")?.unwrap_or(30),
                1,
                300,
            ),
        };

        let models_dir = data_dir.join("models");
        let models = ModelConfig {
            vad_model: get("COCORO_VAD_MODEL")
                .map_or_else(|| models_dir.join("silero_vad.onnx"), PathBuf::from),
            speaker_model: get("COCORO_SPEAKER_MODEL").map(PathBuf::from).or_else(|| {
                let path = models_dir.join("speaker_embedding.onnx");
                path.exists().then_some(path)
            }),
            embedding_dim: parse(get("COCORO_EMBEDDING_DIM"), "COCORO_EMBEDDING_DIM")?
                .unwrap_or(DEFAULT_EMBEDDING_DIM),
        };

        Ok(Self {
            data_dir,
            voice,
            speaker,
            stt,
            models,
        })
    }

    /// Path of the speaker database
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("speakers.db")
    }
}

/// Platform data directory, falling back to the working directory
fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "cocoro", "cocoro")
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("voice"))
}

/// Split a comma-separated list, dropping empty entries
fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse<T: FromStr>(value: Option<String>, key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|e| Error::Config(format!("invalid {key}={v}: {e}")))
        })
        .transpose()
}

fn parse_bool(value: Option<String>) -> bool {
    value.is_some_and(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

/// Clamp `value` into `[min, max]`, warning when it moves
fn clamped<T: PartialOrd + Copy + std::fmt::Display>(key: &str, value: T, min: T, max: T) -> T {
    let result = if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    };
    if result != value {
        tracing::warn!(key, requested = %value, using = %result, "config value out of range, clamped");
    }
    result
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("COCORO_DATA_DIR", "/tmp/cocoro")]).unwrap();
        assert!((config.voice.vad_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.voice.silence_timeout_ms, 100);
        assert_eq!(config.voice.active_timeout_ms, 60_000);
        assert!(config.voice.wake_words.is_empty());
        assert!(!config.voice.start_active);
        assert!((config.speaker.threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.stt.provider, SttProvider::Null);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/cocoro/speakers.db"));
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let config = load(&[
            ("COCORO_DATA_DIR", "/tmp/cocoro"),
            ("COCORO_MIC_GAIN", "50"),
            ("COCORO_VAD_THRESHOLD", "-1"),
        ])
        .unwrap();
        assert!((config.voice.microphone_gain - 10.0).abs() < f32::EPSILON);
        assert!(config.voice.vad_threshold.abs() < f32::EPSILON);
    }

    #[test]
    fn test_zero_silence_timeout_is_kept() {
        let config = load(&[
            ("COCORO_DATA_DIR", "/tmp/cocoro"),
            ("COCORO_SILENCE_TIMEOUT_MS", "0"),
        ])
        .unwrap();
        assert_eq!(config.voice.silence_timeout_ms, 0);
        assert_eq!(config.voice.vad().min_silence_duration_ms, 0);
    }

    #[test]
    fn test_provider_follows_available_key() {
        let config = load(&[("COCORO_DATA_DIR", "/tmp/x"), ("AMIVOICE_API_KEY", "k")]).unwrap();
        assert_eq!(config.stt.provider, SttProvider::AmiVoice);
        assert_eq!(config.stt.model, "-a-general");
        assert_eq!(
            config.stt.api_key.as_ref().map(ExposeSecret::expose_secret),
            Some("k")
        );
    }

    #[test]
    fn test_wake_words_split() {
        let config = load(&[
            ("COCORO_DATA_DIR", "/tmp/x"),
            ("COCORO_WAKE_WORDS", "hey cocoro, cocoro ,"),
        ])
        .unwrap();
        assert_eq!(config.voice.wake_words, vec!["hey cocoro", "cocoro"]);
    }

    #[test]
    fn test_invalid_number_is_error() {
        assert!(matches!(
            load(&[("COCORO_DATA_DIR", "/tmp/x"), ("COCORO_CHUNK_MS", "abc")]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "abort".parse::<IdentificationFailurePolicy>().unwrap(),
            IdentificationFailurePolicy::Abort
        );
        assert!("later".parse::<IdentificationFailurePolicy>().is_err());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = load(&[("COCORO_DATA_DIR", "/tmp/x"), ("OPENAI_API_KEY", "sk-secret")]).unwrap();
        let debug = format!("{:?}", config.stt);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("REDACTED"));
    }
}
