//! Speech-to-text (STT) gateways
//!
//! A gateway takes one finished WAV utterance and returns its transcript.
//! The backend is chosen once from configuration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{SttConfig, SttProvider};
use crate::{Error, Result};

/// Failure modes of a transcription call
#[derive(Debug, Clone, thiserror::Error)]
pub enum SttError {
    /// Backend unreachable or refusing work
    #[error("STT backend unavailable: {0}")]
    Unavailable(String),

    /// Audio contained nothing recognizable
    #[error("STT result below confidence")]
    LowConfidence,

    /// Backend did not answer in time
    #[error("STT request timed out")]
    Timeout,

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for SttError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Unavailable(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }
}

/// Transcribes finished utterances
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe a canonical 16kHz mono 16-bit WAV buffer
    ///
    /// Silent audio yields an empty string or [`SttError::LowConfidence`],
    /// never a panic.
    async fn recognize(&self, wav: &[u8]) -> std::result::Result<String, SttError>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Build the gateway selected by configuration
///
/// # Errors
///
/// Returns error if a networked provider has no API key
pub fn from_config(config: &SttConfig) -> Result<Arc<dyn SpeechToText>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let api_key = config
        .api_key
        .clone()
        .unwrap_or_else(|| SecretString::from(String::new()));

    let gateway: Arc<dyn SpeechToText> = match config.provider {
        SttProvider::Whisper => Arc::new(WhisperStt::new(api_key, config.model.clone(), timeout)?),
        SttProvider::AmiVoice => {
            Arc::new(AmiVoiceStt::new(api_key, config.model.clone(), timeout)?)
        }
        SttProvider::Null => Arc::new(NullStt),
    };

    tracing::info!(provider = gateway.name(), "speech-to-text gateway ready");
    Ok(gateway)
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))
}

/// Map a non-success HTTP status to an STT error
fn status_error(backend: &str, status: reqwest::StatusCode, body: &str) -> SttError {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        SttError::Unavailable(format!("{backend} API error {status}"))
    } else {
        SttError::Other(format!("{backend} API error {status}: {body}"))
    }
}

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes with `OpenAI` Whisper
pub struct WhisperStt {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl WhisperStt {
    /// API endpoint
    const URL: &'static str = "https://api.openai.com/v1/audio/transcriptions";

    /// Create a new Whisper gateway
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, model: String, timeout: Duration) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl SpeechToText for WhisperStt {
    async fn recognize(&self, wav: &[u8]) -> std::result::Result<String, SttError> {
        tracing::debug!(audio_bytes = wav.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(Self::URL)
            .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(status_error("Whisper", status, &body));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    fn name(&self) -> &'static str {
        "whisper"
    }
}

/// Response from the `AmiVoice` recognize API
#[derive(serde::Deserialize)]
struct AmiVoiceResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Transcribes with the `AmiVoice` Cloud Platform
pub struct AmiVoiceStt {
    client: reqwest::Client,
    api_key: SecretString,
    engine: String,
}

impl AmiVoiceStt {
    /// API endpoint (no-log variant, audio is not retained)
    const URL: &'static str = "https://acp-api.amivoice.com/v1/nolog/recognize";

    /// Create a new `AmiVoice` gateway
    ///
    /// `engine` is the grammar file name, e.g. `-a-general`.
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, engine: String, timeout: Duration) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("AmiVoice API key required".to_string()));
        }

        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            engine,
        })
    }

    /// Interpret an `AmiVoice` result code
    fn interpret(response: AmiVoiceResponse) -> std::result::Result<String, SttError> {
        match response.code.as_str() {
            "" => Ok(response.text),
            // "+": no audio, "-": no speech detected
            "+" | "-" => Err(SttError::LowConfidence),
            "o" | "b" | "c" => Err(SttError::Unavailable(response.message)),
            code => Err(SttError::Other(format!("AmiVoice code {code}: {}", response.message))),
        }
    }
}

#[async_trait]
impl SpeechToText for AmiVoiceStt {
    async fn recognize(&self, wav: &[u8]) -> std::result::Result<String, SttError> {
        tracing::debug!(audio_bytes = wav.len(), "starting AmiVoice transcription");

        let form = reqwest::multipart::Form::new()
            .text("u", self.api_key.expose_secret().to_string())
            .text("d", format!("grammarFileNames={}", self.engine))
            .part(
                "a",
                reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")?,
            );

        let response = self
            .client
            .post(Self::URL)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "AmiVoice request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "AmiVoice API error");
            return Err(status_error("AmiVoice", status, &body));
        }

        let result: AmiVoiceResponse = response.json().await?;
        let transcript = Self::interpret(result)?;

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }

    fn name(&self) -> &'static str {
        "amivoice"
    }
}

/// Gateway that never recognizes anything
///
/// Used when no STT backend is configured; the pipeline still runs VAD and
/// speaker identification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStt;

#[async_trait]
impl SpeechToText for NullStt {
    async fn recognize(&self, _wav: &[u8]) -> std::result::Result<String, SttError> {
        Ok(String::new())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}
