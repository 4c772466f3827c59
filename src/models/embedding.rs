//! Speaker embedding network backed by ONNX Runtime
//!
//! The graph takes one `[1, frames, 80]` fbank tensor and returns a
//! `[1, dim]` embedding. Input and output names are read from the model.

use ort::session::Session;
use ort::value::Value;

use crate::speaker::{EmbeddingNetwork, FbankFeatures};
use crate::{Error, Result};

fn model_error(e: impl std::fmt::Display) -> Error {
    Error::Model(e.to_string())
}

/// ONNX speaker embedding extractor
pub struct OnnxEmbeddingNetwork {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OnnxEmbeddingNetwork {
    /// Build a session from model bytes
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot be loaded or has no inputs/outputs
    pub fn from_memory(model: &[u8]) -> Result<Self> {
        let session = Session::builder()
            .map_err(model_error)?
            .commit_from_memory(model)
            .map_err(model_error)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| Error::Model("speaker model has no inputs".to_string()))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| Error::Model("speaker model has no outputs".to_string()))?;

        tracing::info!(input = %input_name, output = %output_name, "speaker embedding model loaded");

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }
}

impl EmbeddingNetwork for OnnxEmbeddingNetwork {
    fn infer(&mut self, features: &FbankFeatures) -> Result<Vec<f32>> {
        let shape = [1, features.num_frames(), features.num_bins()];
        let input = Value::from_array((shape, features.as_slice().to_vec()))
            .map_err(model_error)?
            .into();

        let inputs: Vec<(&str, Value)> = vec![(self.input_name.as_str(), input)];
        let outputs = self.session.run(inputs).map_err(model_error)?;

        let (_, embedding) = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| Error::Model(format!("no '{}' tensor in results", self.output_name)))?
            .try_extract_tensor::<f32>()
            .map_err(model_error)?;

        Ok(embedding.to_vec())
    }
}
