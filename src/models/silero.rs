//! Silero VAD classifier backed by ONNX Runtime
//!
//! Inputs: `input` `[1, 512]` f32, `state` `[2, 1, 128]` f32, `sr` `[1]` i64.
//! Outputs: `output` `[1, 1]` speech probability, `stateN` `[2, 1, 128]`.

use ort::session::Session;
use ort::value::Value;

use crate::voice::{SAMPLE_RATE, SpeechClassifier, VAD_STATE_LEN, VAD_WINDOW_SAMPLES, VadPrediction};
use crate::{Error, Result};

/// State tensor shape: layers/directions, batch, hidden size
const STATE_SHAPE: [usize; 3] = [2, 1, 128];

fn model_error(e: impl std::fmt::Display) -> Error {
    Error::Model(e.to_string())
}

/// One Silero session, owned by a single detector
pub struct SileroClassifier {
    session: Session,
}

impl SileroClassifier {
    /// Build a session from model bytes
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot be loaded or lacks the expected
    /// inputs
    pub fn from_memory(model: &[u8]) -> Result<Self> {
        let session = Session::builder()
            .map_err(model_error)?
            .commit_from_memory(model)
            .map_err(model_error)?;

        if session.inputs.len() < 3 {
            return Err(Error::Model(format!(
                "silero model has {} inputs, expected input, state and sr",
                session.inputs.len()
            )));
        }

        tracing::debug!(
            inputs = ?session.inputs.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            "silero vad session created"
        );

        Ok(Self { session })
    }
}

impl SpeechClassifier for SileroClassifier {
    fn predict(&mut self, window: &[f32], state: &[f32]) -> Result<VadPrediction> {
        if window.len() != VAD_WINDOW_SAMPLES || state.len() != VAD_STATE_LEN {
            return Err(Error::Vad(format!(
                "silero expects {VAD_WINDOW_SAMPLES} samples and {VAD_STATE_LEN} state values, got {} and {}",
                window.len(),
                state.len()
            )));
        }

        let input_value = Value::from_array(([1, VAD_WINDOW_SAMPLES], window.to_vec()))
            .map_err(model_error)?
            .into();
        let state_value = Value::from_array((STATE_SHAPE, state.to_vec()))
            .map_err(model_error)?
            .into();
        let sr_value = Value::from_array(([1], vec![i64::from(SAMPLE_RATE)]))
            .map_err(model_error)?
            .into();

        let inputs: Vec<(&str, Value)> = vec![
            ("input", input_value),
            ("state", state_value),
            ("sr", sr_value),
        ];

        let outputs = self.session.run(inputs).map_err(model_error)?;

        let (_, probability) = outputs
            .get("output")
            .ok_or_else(|| Error::Model("no 'output' tensor in silero results".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(model_error)?;
        let probability = probability
            .first()
            .copied()
            .ok_or_else(|| Error::Model("empty silero output".to_string()))?;

        let (_, next_state) = outputs
            .get("stateN")
            .ok_or_else(|| Error::Model("no 'stateN' tensor in silero results".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(model_error)?;

        Ok(VadPrediction {
            probability,
            state: next_state.to_vec(),
        })
    }
}
