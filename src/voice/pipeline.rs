//! Pipeline controller
//!
//! Wires capture, gain, VAD, pre-roll and utterance framing together on the
//! capture thread, then hands each finished utterance to a tokio task for
//! speaker identification and transcription.
//!
//! ```text
//! capture ─► gain ─► VAD ─┬─► pre-roll
//!                         └─► utterance ─(speech end)─► task: identify + STT ─► session
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::broadcast;

use super::capture::AudioSource;
use super::event::VoiceEvent;
use super::gain::apply_gain;
use super::pcm::PcmChunk;
use super::pre_roll::PreRollBuffer;
use super::session::{VoiceSession, VoiceSessionState};
use super::stt::{SpeechToText, SttError};
use super::vad::{VadConfig, VoiceActivityDetector};
use super::wav::Utterance;
use crate::config::{IdentificationFailurePolicy, VoiceConfig};
use crate::models::ModelPool;
use crate::speaker::{SpeakerMatch, SpeakerRegistry};
use crate::{Error, Result};

/// Event channel capacity
const EVENT_CAPACITY: usize = 256;

/// Speaker identification wiring
#[derive(Clone)]
pub struct SpeakerIdentification {
    pub registry: Arc<SpeakerRegistry>,
    pub policy: IdentificationFailurePolicy,
}

/// State touched by every chunk, guarded by one mutex
struct Frontend {
    vad: Option<VoiceActivityDetector>,
    pre_roll: PreRollBuffer,
    utterance: Option<Utterance>,
}

impl Frontend {
    fn clear(&mut self) {
        if let Some(vad) = self.vad.as_mut() {
            vad.reset();
        }
        self.pre_roll.clear();
        self.utterance = None;
    }
}

struct PipelineShared {
    gain: f32,
    frontend: Mutex<Frontend>,
    listening: AtomicBool,
    session: VoiceSession,
    stt: Arc<dyn SpeechToText>,
    speaker: Option<SpeakerIdentification>,
    events: broadcast::Sender<VoiceEvent>,
    runtime: Handle,
    utterances: AtomicU64,
    /// Bumped on every stop; results from an older value are discarded
    generation: AtomicU64,
}

impl PipelineShared {
    fn frontend(&self) -> MutexGuard<'_, Frontend> {
        self.frontend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether results from `generation` may still reach the session
    fn is_current(&self, generation: u64) -> bool {
        self.listening.load(Ordering::Acquire)
            && self.generation.load(Ordering::Acquire) == generation
    }

    /// Run one captured chunk through the front-end
    fn process_chunk(self: &Arc<Self>, chunk: &PcmChunk) {
        if !self.listening.load(Ordering::Acquire) {
            return;
        }
        let generation = self.generation.load(Ordering::Acquire);

        let chunk = apply_gain(chunk, self.gain);
        let level = chunk.rms();

        let (triggered, finished) = {
            let mut frontend = self.frontend();
            let Frontend {
                vad,
                pre_roll,
                utterance,
            } = &mut *frontend;
            let Some(vad) = vad.as_mut() else {
                return;
            };

            let outcome = vad.process_chunk(&chunk);

            // Pre-roll holds only audio from before this chunk
            let open = |pre_roll: &PreRollBuffer| {
                let mut opened = Utterance::seeded(pre_roll.drain());
                opened.append(&chunk);
                opened
            };
            let close = |current: Option<Utterance>, pre_roll: &PreRollBuffer| {
                let mut closed = match current {
                    Some(mut current) => {
                        current.append(&chunk);
                        current
                    }
                    None => open(pre_roll),
                };
                closed.trim_end(outcome.trailing_silence_samples);
                closed
            };

            let mut finished = None;
            match (outcome.speech_started, outcome.speech_ended) {
                (true, true) if outcome.triggered => {
                    // Previous segment closed and a new one opened in this chunk
                    if let Some(current) = utterance.take() {
                        finished = Some(close(Some(current), pre_roll));
                    }
                    *utterance = Some(open(pre_roll));
                }
                (true, true) => {
                    finished = Some(close(utterance.take(), pre_roll));
                }
                (true, false) => {
                    *utterance = Some(open(pre_roll));
                }
                (false, true) => {
                    if let Some(current) = utterance.take() {
                        finished = Some(close(Some(current), pre_roll));
                    }
                }
                (false, false) => {
                    if outcome.triggered {
                        if let Some(current) = utterance.as_mut() {
                            current.append(&chunk);
                        }
                    }
                }
            }
            pre_roll.push(&chunk);

            (outcome.triggered, finished)
        };

        let _ = self.events.send(VoiceEvent::VoiceLevel {
            level,
            is_above_threshold: triggered,
        });

        if let Some(utterance) = finished {
            self.dispatch(utterance, generation);
        }
    }

    /// Hand a finished utterance to a tokio task
    fn dispatch(self: &Arc<Self>, utterance: Utterance, generation: u64) {
        let id = self.utterances.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(utterance = id, duration = ?utterance.duration(), "utterance finished");

        let wav: Arc<[u8]> = utterance.finalize().into();
        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            shared.handle_utterance(id, generation, wav).await;
        });
    }

    async fn handle_utterance(self: Arc<Self>, id: u64, generation: u64, wav: Arc<[u8]>) {
        if !self.is_current(generation) {
            tracing::debug!(utterance = id, "listening stopped, utterance dropped");
            return;
        }

        self.session.begin_processing();

        let (identity, transcript) =
            tokio::join!(self.identify(Arc::clone(&wav)), self.stt.recognize(&wav));

        if !self.is_current(generation) {
            tracing::debug!(utterance = id, "listening stopped during processing");
            self.session.complete_processing(None);
            return;
        }

        match identity {
            Ok(Some(speaker)) => {
                let _ = self.events.send(VoiceEvent::SpeakerIdentified {
                    speaker_id: speaker.speaker_id,
                    speaker_name: speaker.speaker_name,
                    confidence: speaker.confidence,
                });
            }
            Ok(None) => {}
            Err(e) => {
                let policy = self
                    .speaker
                    .as_ref()
                    .map_or(IdentificationFailurePolicy::ProceedUntagged, |s| s.policy);
                if e.is_identification_miss() {
                    tracing::info!(utterance = id, reason = %e, ?policy, "speaker not identified");
                } else {
                    tracing::warn!(utterance = id, error = %e, ?policy, "speaker identification failed");
                }
                if policy == IdentificationFailurePolicy::Abort {
                    self.session.complete_processing(None);
                    return;
                }
            }
        }

        let text = match transcript {
            Ok(text) if text.trim().is_empty() => {
                tracing::debug!(utterance = id, "no speech recognized");
                None
            }
            Ok(text) => Some(text),
            Err(SttError::LowConfidence) => {
                tracing::debug!(utterance = id, "recognition below confidence");
                None
            }
            Err(e) => {
                tracing::warn!(utterance = id, provider = self.stt.name(), error = %e, "transcription failed");
                None
            }
        };

        self.session.complete_processing(text.as_deref());
    }

    /// Identify the speaker on the blocking pool
    ///
    /// `Ok(None)` means identification is disabled or nobody is enrolled.
    async fn identify(&self, wav: Arc<[u8]>) -> Result<Option<SpeakerMatch>> {
        let Some(speaker) = &self.speaker else {
            return Ok(None);
        };
        let registry = Arc::clone(&speaker.registry);

        tokio::task::spawn_blocking(move || {
            if !registry.has_any()? {
                return Ok(None);
            }
            registry.identify(&wav).map(Some)
        })
        .await
        .map_err(|e| Error::Model(format!("identification task failed: {e}")))?
    }
}

/// Real-time voice pipeline
pub struct VoicePipeline {
    shared: Arc<PipelineShared>,
    models: ModelPool,
    vad_config: VadConfig,
    source: Box<dyn AudioSource>,
}

impl VoicePipeline {
    /// Assemble a pipeline
    ///
    /// Must be called from within a tokio runtime; utterances are processed
    /// on it.
    ///
    /// # Errors
    ///
    /// Returns error if no tokio runtime is available
    pub fn new(
        config: &VoiceConfig,
        models: ModelPool,
        stt: Arc<dyn SpeechToText>,
        speaker: Option<SpeakerIdentification>,
        source: Box<dyn AudioSource>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::Config("voice pipeline requires a tokio runtime".to_string()))?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let session = VoiceSession::new(
            config.wake_word_detector(),
            config.session(),
            events.clone(),
        );

        tracing::info!(
            stt = stt.name(),
            speaker_identification = speaker.is_some(),
            start_active = config.start_active,
            "voice pipeline ready"
        );

        Ok(Self {
            shared: Arc::new(PipelineShared {
                gain: config.microphone_gain,
                frontend: Mutex::new(Frontend {
                    vad: None,
                    pre_roll: PreRollBuffer::new(config.pre_roll_ms),
                    utterance: None,
                }),
                listening: AtomicBool::new(false),
                session,
                stt,
                speaker,
                events,
                runtime,
                utterances: AtomicU64::new(0),
                generation: AtomicU64::new(0),
            }),
            models,
            vad_config: config.vad(),
            source,
        })
    }

    /// Subscribe to pipeline events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.shared.events.subscribe()
    }

    /// Current session state
    #[must_use]
    pub fn session_state(&self) -> VoiceSessionState {
        self.shared.session.state()
    }

    /// Whether audio is being processed
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::Acquire)
    }

    /// Start capturing with a fresh VAD classifier
    ///
    /// # Errors
    ///
    /// Returns error if the classifier cannot be created or the audio source
    /// fails to open; nothing is left running in that case
    pub fn start_listening(&mut self) -> Result<()> {
        if self.is_listening() {
            return Ok(());
        }

        let classifier = self.models.create_classifier()?;
        {
            let mut frontend = self.shared.frontend();
            frontend.vad = Some(VoiceActivityDetector::new(classifier, self.vad_config));
            frontend.pre_roll.clear();
            frontend.utterance = None;
        }
        self.shared.listening.store(true, Ordering::Release);

        let on_chunk = {
            let shared = Arc::clone(&self.shared);
            Box::new(move |chunk: PcmChunk| shared.process_chunk(&chunk))
        };
        let on_error = {
            let events = self.shared.events.clone();
            Box::new(move |message: String| {
                let _ = events.send(VoiceEvent::DeviceError(message));
            })
        };

        if let Err(e) = self.source.start(on_chunk, on_error) {
            self.shared.listening.store(false, Ordering::Release);
            self.shared.frontend().vad = None;
            tracing::error!(error = %e, "failed to start listening");
            return Err(e);
        }

        tracing::info!("listening");
        Ok(())
    }

    /// Stop capturing and discard all buffered audio
    ///
    /// Returns once no further chunk can be processed. Utterances already
    /// dispatched finish without delivering text, even if listening has
    /// restarted by then.
    pub fn stop_listening(&mut self) {
        if !self.shared.listening.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.source.stop();
        self.shared.frontend().clear();
        tracing::info!("stopped listening");
    }
}

impl Drop for VoicePipeline {
    fn drop(&mut self) {
        self.stop_listening();
    }
}
