//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use cocoro_voice::db::{self, SpeakerRepo};
use cocoro_voice::speaker::{EmbeddingNetwork, FbankFeatures};
use cocoro_voice::voice::{
    AudioSource, ChunkSink, DeviceErrorSink, PcmChunk, SAMPLE_RATE, SpeechClassifier,
    SpeechToText, SttError, VadPrediction, VoiceEvent,
};
use cocoro_voice::{ModelPool, Result, SpeakerEmbeddingModel, SpeakerRegistry};

/// Samples per 50ms capture chunk
pub const CHUNK_SAMPLES: usize = 800;

/// Scores a window by its energy
pub struct EnergyClassifier;

impl SpeechClassifier for EnergyClassifier {
    #[allow(clippy::cast_precision_loss)]
    fn predict(&mut self, window: &[f32], state: &[f32]) -> Result<VadPrediction> {
        let rms = (window.iter().map(|s| s * s).sum::<f32>() / window.len() as f32).sqrt();
        Ok(VadPrediction {
            probability: if rms > 0.02 { 0.9 } else { 0.05 },
            state: state.to_vec(),
        })
    }
}

/// A model pool whose VAD is [`EnergyClassifier`]
pub fn energy_models(speaker: Option<Arc<SpeakerEmbeddingModel>>) -> ModelPool {
    ModelPool::new(
        || Ok(Box::new(EnergyClassifier) as Box<dyn SpeechClassifier>),
        speaker,
    )
}

/// Mean absolute value per mel bin, tiled to the output size
pub struct BinProfile {
    pub dimension: usize,
}

impl EmbeddingNetwork for BinProfile {
    #[allow(clippy::cast_precision_loss)]
    fn infer(&mut self, features: &FbankFeatures) -> Result<Vec<f32>> {
        let bins = features.num_bins();
        let mut profile = vec![0.0f32; bins];
        for t in 0..features.num_frames() {
            for (p, v) in profile.iter_mut().zip(features.frame(t)) {
                *p += v.abs();
            }
        }
        let frames = features.num_frames() as f32;
        Ok((0..self.dimension)
            .map(|i| profile[i % bins] / frames + 1.0)
            .collect())
    }
}

/// Speaker model backed by [`BinProfile`]
pub fn profile_model(dimension: usize) -> Arc<SpeakerEmbeddingModel> {
    Arc::new(SpeakerEmbeddingModel::new(
        Box::new(BinProfile { dimension }),
        dimension,
    ))
}

/// Registry over an in-memory database
pub fn memory_registry(dimension: usize, threshold: f32) -> SpeakerRegistry {
    let pool = db::init_memory().expect("failed to init test db");
    SpeakerRegistry::new(SpeakerRepo::new(pool), profile_model(dimension), threshold)
}

/// Sine tone as 16-bit samples
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn tone(frequency: f32, duration_ms: u32, amplitude: f32) -> Vec<i16> {
    let n = (SAMPLE_RATE as usize * duration_ms as usize) / 1000;
    (0..n)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            (amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin() * 32767.0) as i16
        })
        .collect()
}

/// Digital silence
pub fn silence(duration_ms: u32) -> Vec<i16> {
    vec![0; (SAMPLE_RATE as usize * duration_ms as usize) / 1000]
}

/// Split samples into 50ms chunks; a short tail becomes its own chunk
pub fn chunks(samples: &[i16]) -> Vec<PcmChunk> {
    samples
        .chunks(CHUNK_SAMPLES)
        .map(PcmChunk::from_samples)
        .collect()
}

/// One utterance surrounded by silence
pub fn spoken(lead_ms: u32, speech_ms: u32, tail_ms: u32) -> Vec<i16> {
    let mut samples = silence(lead_ms);
    samples.extend(tone(220.0, speech_ms, 0.3));
    samples.extend(silence(tail_ms));
    samples
}

type SharedSink = Arc<Mutex<Option<ChunkSink>>>;

/// Audio source driven by the test
pub struct ManualSource {
    sink: SharedSink,
    pub fail_start: bool,
}

/// Test-side handle that delivers chunks to a [`ManualSource`]
#[derive(Clone)]
pub struct ManualFeed {
    sink: SharedSink,
}

impl ManualSource {
    pub fn pair() -> (Self, ManualFeed) {
        let sink: SharedSink = Arc::new(Mutex::new(None));
        (
            Self {
                sink: Arc::clone(&sink),
                fail_start: false,
            },
            ManualFeed { sink },
        )
    }
}

impl AudioSource for ManualSource {
    fn start(&mut self, on_chunk: ChunkSink, _on_error: DeviceErrorSink) -> Result<()> {
        if self.fail_start {
            return Err(cocoro_voice::Error::Audio("no input device".to_string()));
        }
        *self.sink.lock().unwrap() = Some(on_chunk);
        Ok(())
    }

    fn stop(&mut self) {
        self.sink.lock().unwrap().take();
    }
}

impl ManualFeed {
    /// Deliver chunks as the capture thread would; returns false once stopped
    pub fn push_all(&self, chunks: &[PcmChunk]) -> bool {
        let mut sink = self.sink.lock().unwrap();
        let Some(sink) = sink.as_mut() else {
            return false;
        };
        for chunk in chunks {
            sink(chunk.clone());
        }
        true
    }
}

/// Replies with scripted transcripts in call order and records every request
#[derive(Clone, Default)]
pub struct ScriptedStt {
    replies: Arc<Mutex<VecDeque<std::result::Result<String, SttError>>>>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    delay: Duration,
}

impl ScriptedStt {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Arc::new(Mutex::new(
                replies.into_iter().map(|s| Ok(s.into())).collect(),
            )),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push_error(&self, error: SttError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    /// WAV buffers received so far
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechToText for ScriptedStt {
    async fn recognize(&self, wav: &[u8]) -> std::result::Result<String, SttError> {
        self.requests.lock().unwrap().push(wav.to_vec());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        reply
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Collect events until the session leaves `Processing`, skipping level meters
pub async fn until_settled(events: &mut broadcast::Receiver<VoiceEvent>) -> Vec<VoiceEvent> {
    use cocoro_voice::VoiceSessionState;

    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let mut processing = false;

    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("timed out waiting for the session to settle")
            .expect("event channel closed");

        match &event {
            VoiceEvent::VoiceLevel { .. } => continue,
            VoiceEvent::StateChanged(VoiceSessionState::Processing) => processing = true,
            VoiceEvent::StateChanged(_) if processing => {
                seen.push(event);
                break;
            }
            _ => {}
        }
        seen.push(event);
    }

    // Text follows the state change within the same emission
    while let Ok(event) = events.try_recv() {
        if !matches!(event, VoiceEvent::VoiceLevel { .. }) {
            seen.push(event);
        }
    }
    seen
}

/// Recognized transcripts in `events`
pub fn texts(events: &[VoiceEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            VoiceEvent::RecognizedText(t) => Some(t.clone()),
            _ => None,
        })
        .collect()
}
