//! Model handles shared by the pipeline
//!
//! [`ModelPool`] is built once at startup. It hands out a fresh VAD
//! classifier for every capture session and one shared speaker embedding
//! model.

#[cfg(feature = "onnx")]
mod embedding;
#[cfg(feature = "onnx")]
mod silero;

use std::sync::Arc;

#[cfg(feature = "onnx")]
pub use embedding::OnnxEmbeddingNetwork;
#[cfg(feature = "onnx")]
pub use silero::SileroClassifier;

use crate::Result;
use crate::config::ModelConfig;
use crate::speaker::SpeakerEmbeddingModel;
use crate::voice::SpeechClassifier;

/// Creates a VAD classifier for a new capture session
pub type ClassifierFactory = Arc<dyn Fn() -> Result<Box<dyn SpeechClassifier>> + Send + Sync>;

/// Loaded models
#[derive(Clone)]
pub struct ModelPool {
    vad: ClassifierFactory,
    speaker: Option<Arc<SpeakerEmbeddingModel>>,
}

impl ModelPool {
    /// Assemble a pool from a classifier factory and an optional speaker model
    pub fn new<F>(vad: F, speaker: Option<Arc<SpeakerEmbeddingModel>>) -> Self
    where
        F: Fn() -> Result<Box<dyn SpeechClassifier>> + Send + Sync + 'static,
    {
        Self {
            vad: Arc::new(vad),
            speaker,
        }
    }

    /// A classifier with fresh recurrent state
    ///
    /// # Errors
    ///
    /// Returns error if the classifier cannot be created
    pub fn create_classifier(&self) -> Result<Box<dyn SpeechClassifier>> {
        (self.vad)()
    }

    /// Shared speaker embedding model, if one is loaded
    #[must_use]
    pub fn speaker_model(&self) -> Option<Arc<SpeakerEmbeddingModel>> {
        self.speaker.clone()
    }

    /// Load the ONNX models named in `config`
    ///
    /// The VAD model bytes are read once and a trial session is built so a
    /// broken model fails here rather than at the first `listen`.
    ///
    /// # Errors
    ///
    /// Returns error if a model file cannot be read or loaded
    #[cfg(feature = "onnx")]
    pub fn onnx(config: &ModelConfig) -> Result<Self> {
        let vad_bytes: Arc<[u8]> = read_model(&config.vad_model)?.into();
        SileroClassifier::from_memory(&vad_bytes)?;
        tracing::info!(path = %config.vad_model.display(), "vad model loaded");

        let speaker = load_speaker_model(config)?;
        if speaker.is_none() {
            tracing::info!("no speaker model configured, identification disabled");
        }

        Ok(Self::new(
            move || Ok(Box::new(SileroClassifier::from_memory(&vad_bytes)?) as Box<dyn SpeechClassifier>),
            speaker,
        ))
    }

    /// ONNX support is compiled out
    ///
    /// # Errors
    ///
    /// Always returns a configuration error
    #[cfg(not(feature = "onnx"))]
    pub fn onnx(_config: &ModelConfig) -> Result<Self> {
        Err(crate::Error::Config(
            "built without the onnx feature, no models available".to_string(),
        ))
    }
}

/// Load only the speaker embedding model, if one is configured
///
/// # Errors
///
/// Returns error if the model file cannot be read or loaded
#[cfg(feature = "onnx")]
pub fn load_speaker_model(config: &ModelConfig) -> Result<Option<Arc<SpeakerEmbeddingModel>>> {
    let Some(path) = &config.speaker_model else {
        return Ok(None);
    };
    let network = OnnxEmbeddingNetwork::from_memory(&read_model(path)?)?;
    tracing::info!(path = %path.display(), dimension = config.embedding_dim, "speaker model loaded");
    Ok(Some(Arc::new(SpeakerEmbeddingModel::new(
        Box::new(network),
        config.embedding_dim,
    ))))
}

/// ONNX support is compiled out
///
/// # Errors
///
/// Always returns a configuration error
#[cfg(not(feature = "onnx"))]
pub fn load_speaker_model(_config: &ModelConfig) -> Result<Option<Arc<SpeakerEmbeddingModel>>> {
    Err(crate::Error::Config(
        "built without the onnx feature, no models available".to_string(),
    ))
}

#[cfg(feature = "onnx")]
fn read_model(path: &std::path::Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| crate::Error::Model(format!("failed to read {}: {e}", path.display())))
}
