//! Voice session state machine
//!
//! ```text
//!            wake word                idle timeout
//! Sleeping ────────────► Active ─────────────────► Sleeping
//!                          │  ▲
//!                begin STT │  │ last STT completes
//!                          ▼  │
//!                       Processing
//! ```
//!
//! All state lives behind one mutex. Events are collected while the lock is
//! held and sent after it is released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;

use super::event::VoiceEvent;
use super::wake_word::WakeWordDetector;

/// Default idle time before an active session goes back to sleep
pub const DEFAULT_ACTIVE_TIMEOUT_MS: u64 = 60_000;

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceSessionState {
    /// Waiting for a wake word
    Sleeping,
    /// Forwarding every utterance
    Active,
    /// At least one STT call is in flight
    Processing,
}

/// Session behaviour
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Idle time after which an active session sleeps
    pub active_timeout: Duration,
    /// Start in `Active` and never fall asleep on timeout
    pub start_active: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            active_timeout: Duration::from_millis(DEFAULT_ACTIVE_TIMEOUT_MS),
            start_active: false,
        }
    }
}

#[derive(Debug)]
struct SessionInner {
    /// Resting state, `Sleeping` or `Active`
    mode: VoiceSessionState,
    in_flight: usize,
    deadline: Option<Instant>,
    disposed: bool,
}

impl SessionInner {
    const fn observable(&self) -> VoiceSessionState {
        if self.in_flight > 0 {
            VoiceSessionState::Processing
        } else {
            self.mode
        }
    }
}

struct SessionShared {
    inner: Mutex<SessionInner>,
    wake_words: WakeWordDetector,
    config: SessionConfig,
    events: broadcast::Sender<VoiceEvent>,
    rearm: Arc<Notify>,
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, events: Vec<VoiceEvent>) {
        for event in events {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }

    /// Apply the Sleeping/Active rules to a transcript
    ///
    /// Returns the text to forward, if any.
    fn accept_text(&self, inner: &mut SessionInner, text: &str) -> Option<String> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        match inner.mode {
            VoiceSessionState::Active => {
                inner.deadline = Some(Instant::now() + self.config.active_timeout);
                Some(text.to_string())
            }
            _ => {
                if self.wake_words.contains_wake_word(text) {
                    inner.mode = VoiceSessionState::Active;
                    inner.deadline = Some(Instant::now() + self.config.active_timeout);
                    Some(text.to_string())
                } else {
                    tracing::debug!(transcript = text, "no wake word while sleeping, discarded");
                    None
                }
            }
        }
    }

    /// Handle an expired idle deadline
    fn poll_timeout(&self, now: Instant) {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            if inner.disposed || inner.mode != VoiceSessionState::Active {
                return;
            }
            let Some(deadline) = inner.deadline else {
                return;
            };
            if deadline > now {
                return;
            }

            if self.config.start_active || inner.in_flight > 0 {
                inner.deadline = Some(now + self.config.active_timeout);
                tracing::debug!(manual = self.config.start_active, "idle timeout re-armed");
            } else {
                inner.mode = VoiceSessionState::Sleeping;
                inner.deadline = None;
                tracing::info!("idle timeout, session sleeping");
                events.push(VoiceEvent::StateChanged(VoiceSessionState::Sleeping));
            }
        }
        self.emit(events);
    }
}

/// Owns the Sleeping/Active/Processing state of one voice session
pub struct VoiceSession {
    shared: Arc<SessionShared>,
    timer: Option<tokio::task::JoinHandle<()>>,
}

impl VoiceSession {
    /// Create a session
    ///
    /// When called inside a tokio runtime an idle timer task is spawned;
    /// otherwise timeouts only fire through [`Self::poll_timeout`].
    #[must_use]
    pub fn new(
        wake_words: WakeWordDetector,
        config: SessionConfig,
        events: broadcast::Sender<VoiceEvent>,
    ) -> Self {
        let (mode, deadline) = if config.start_active {
            (
                VoiceSessionState::Active,
                Some(Instant::now() + config.active_timeout),
            )
        } else {
            (VoiceSessionState::Sleeping, None)
        };

        let rearm = Arc::new(Notify::new());
        let shared = Arc::new(SessionShared {
            inner: Mutex::new(SessionInner {
                mode,
                in_flight: 0,
                deadline,
                disposed: false,
            }),
            wake_words,
            config,
            events,
            rearm: Arc::clone(&rearm),
        });

        let timer = match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(idle_timer(Arc::downgrade(&shared), rearm))),
            Err(_) => {
                tracing::debug!("no tokio runtime, idle timer disabled");
                None
            }
        };

        tracing::debug!(state = ?mode, timeout = ?config.active_timeout, "voice session created");

        Self { shared, timer }
    }

    /// Current observable state
    #[must_use]
    pub fn state(&self) -> VoiceSessionState {
        self.shared.lock().observable()
    }

    /// Subscribe to session events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.shared.events.subscribe()
    }

    /// Feed a transcript produced outside of a processing bracket
    ///
    /// Ignored while `Processing`.
    pub fn process_recognition_result(&self, text: &str) {
        let mut events = Vec::new();
        {
            let mut inner = self.shared.lock();
            if inner.disposed || inner.in_flight > 0 {
                return;
            }
            let before = inner.mode;
            if let Some(text) = self.shared.accept_text(&mut inner, text) {
                if inner.mode != before {
                    events.push(VoiceEvent::StateChanged(inner.mode));
                }
                events.push(VoiceEvent::RecognizedText(text));
            }
        }
        self.shared.rearm.notify_one();
        self.shared.emit(events);
    }

    /// Mark the start of an STT call
    pub fn begin_processing(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.shared.lock();
            if inner.disposed {
                return;
            }
            inner.in_flight += 1;
            if inner.in_flight == 1 {
                events.push(VoiceEvent::StateChanged(VoiceSessionState::Processing));
            }
        }
        self.shared.emit(events);
    }

    /// Mark the end of an STT call, applying its transcript if any
    ///
    /// The state leaves `Processing` only when the last overlapping call
    /// completes.
    pub fn complete_processing(&self, text: Option<&str>) {
        let mut events = Vec::new();
        {
            let mut inner = self.shared.lock();
            if inner.disposed {
                return;
            }
            inner.in_flight = inner.in_flight.saturating_sub(1);

            let accepted = text.and_then(|t| self.shared.accept_text(&mut inner, t));
            if inner.in_flight == 0 {
                events.push(VoiceEvent::StateChanged(inner.mode));
            }
            if let Some(text) = accepted {
                events.push(VoiceEvent::RecognizedText(text));
            }
        }
        self.shared.rearm.notify_one();
        self.shared.emit(events);
    }

    /// Check the idle deadline against the current time
    pub fn poll_timeout(&self) {
        self.shared.poll_timeout(Instant::now());
    }

    /// Stop the idle timer; no transitions happen afterwards
    pub fn dispose(&mut self) {
        {
            let mut inner = self.shared.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.deadline = None;
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.shared.rearm.notify_one();
        tracing::debug!("voice session disposed");
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Sleep until the idle deadline, re-checking it under the session lock
async fn idle_timer(shared: Weak<SessionShared>, rearm: Arc<Notify>) {
    loop {
        let deadline = {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let inner = shared.lock();
            if inner.disposed {
                return;
            }
            inner.deadline
        };

        match deadline {
            Some(deadline) => {
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => {
                        let Some(shared) = shared.upgrade() else {
                            return;
                        };
                        shared.poll_timeout(Instant::now());
                    }
                    () = rearm.notified() => {}
                }
            }
            None => rearm.notified().await,
        }
    }
}
