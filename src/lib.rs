//! Cocoro Voice - real-time voice pipeline for a desktop companion
//!
//! This library provides the listening side of the companion:
//! - Microphone capture, gain and voice activity detection
//! - Utterance framing with pre-roll
//! - Speaker enrollment and identification
//! - Wake word gating and speech-to-text
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Audio callback                      │
//! │   Capture  │  Gain  │  VAD  │  Pre-roll  │  Framing │
//! └────────────────────┬────────────────────────────────┘
//!                      │ finished utterance (WAV)
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Tokio runtime                       │
//! │   Speaker identification   │   Speech-to-text       │
//! └────────────────────┬────────────────────────────────┘
//!                      │ transcript
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Voice session                        │
//! │   Sleeping  │  Active  │  Processing  │  Events     │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod speaker;
pub mod voice;

pub use config::Config;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use models::ModelPool;
pub use speaker::{SpeakerEmbeddingModel, SpeakerMatch, SpeakerRegistry};
pub use voice::{SpeakerIdentification, VoiceEvent, VoicePipeline, VoiceSessionState};
