//! Audio capture from microphone
//!
//! The cpal stream lives on a dedicated thread for its whole lifetime. The
//! device callback converts whatever the device delivers into 16-bit mono
//! PCM and re-chunks it into fixed-size [`PcmChunk`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfigRange};

use super::pcm::{PcmChunk, SAMPLE_RATE, ms_to_samples};
use crate::{Error, Result};

/// Default chunk duration delivered to the pipeline
pub const DEFAULT_CHUNK_MS: u32 = 50;

/// Receives each captured chunk on the capture thread
pub type ChunkSink = Box<dyn FnMut(PcmChunk) + Send + 'static>;

/// Receives device errors reported while the stream runs
pub type DeviceErrorSink = Box<dyn FnMut(String) + Send + 'static>;

/// A source of fixed-size PCM chunks
pub trait AudioSource: Send {
    /// Begin delivering chunks; fails without partially starting
    ///
    /// # Errors
    ///
    /// Returns error if the source cannot be opened
    fn start(&mut self, on_chunk: ChunkSink, on_error: DeviceErrorSink) -> Result<()>;

    /// Stop delivering; no chunk arrives after this returns
    fn stop(&mut self);
}

/// Accumulates device buffers into fixed-size mono chunks
pub(crate) struct Rechunker {
    pending: Vec<i16>,
    chunk_samples: usize,
    channels: usize,
    active: Arc<AtomicBool>,
    sink: ChunkSink,
}

impl Rechunker {
    pub(crate) fn new(
        chunk_samples: usize,
        channels: usize,
        active: Arc<AtomicBool>,
        sink: ChunkSink,
    ) -> Self {
        Self {
            pending: Vec::with_capacity(chunk_samples * 2),
            chunk_samples: chunk_samples.max(1),
            channels: channels.max(1),
            active,
            sink,
        }
    }

    /// Feed interleaved i16 frames
    pub(crate) fn push_i16(&mut self, data: &[i16]) {
        if self.channels == 1 {
            self.pending.extend_from_slice(data);
        } else {
            self.pending
                .extend(data.chunks(self.channels).map(frame_mean));
        }
        self.flush();
    }

    /// Feed interleaved f32 frames in [-1.0, 1.0]
    pub(crate) fn push_f32(&mut self, data: &[f32]) {
        let converted = PcmChunk::from_f32(data);
        let samples: Vec<i16> = converted.samples().collect();
        self.push_i16(&samples);
    }

    fn flush(&mut self) {
        while self.pending.len() >= self.chunk_samples {
            let rest = self.pending.split_off(self.chunk_samples);
            let chunk = PcmChunk::from_samples(&self.pending);
            self.pending = rest;

            if self.active.load(Ordering::Acquire) {
                (self.sink)(chunk);
            }
        }
    }
}

/// Average one interleaved frame down to mono
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn frame_mean(frame: &[i16]) -> i16 {
    let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
    // The mean of i16 values always fits in i16
    (sum / frame.len() as i32) as i16
}

struct CaptureThread {
    active: Arc<AtomicBool>,
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Captures audio from the default input device
pub struct AudioCaptureSource {
    chunk_samples: usize,
    running: Option<CaptureThread>,
}

impl AudioCaptureSource {
    /// Create a capture source delivering `chunk_ms` chunks
    #[must_use]
    pub fn new(chunk_ms: u32) -> Self {
        Self {
            chunk_samples: ms_to_samples(chunk_ms),
            running: None,
        }
    }

    /// Open the device and start delivering chunks to `on_chunk`
    ///
    /// Returns only after the stream is playing. Device errors raised while
    /// running go to `on_error`.
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened or started
    pub fn start(&mut self, on_chunk: ChunkSink, on_error: DeviceErrorSink) -> Result<()> {
        if self.running.is_some() {
            tracing::warn!("audio capture already running");
            return Ok(());
        }

        let active = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let chunk_samples = self.chunk_samples;
        let thread_active = Arc::clone(&active);
        let handle = std::thread::Builder::new()
            .name("cocoro-capture".to_string())
            .spawn(move || {
                let stream = match open_stream(chunk_samples, thread_active, on_chunk, on_error) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Either an explicit stop or the owner going away
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stream dropped");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.running = Some(CaptureThread {
                    active,
                    stop_tx,
                    handle,
                });
                tracing::debug!("audio capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::Audio("capture thread exited during start".to_string()))
            }
        }
    }

    /// Stop capturing
    ///
    /// Blocks until the stream is dropped; no chunk is delivered after this
    /// returns.
    pub fn stop(&mut self) {
        if let Some(thread) = self.running.take() {
            thread.active.store(false, Ordering::Release);
            let _ = thread.stop_tx.send(());
            if thread.handle.join().is_err() {
                tracing::error!("audio capture thread panicked");
            }
            tracing::debug!("audio capture stopped");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.running.is_some()
    }

    /// Samples per delivered chunk
    #[must_use]
    pub const fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }
}

impl AudioSource for AudioCaptureSource {
    fn start(&mut self, on_chunk: ChunkSink, on_error: DeviceErrorSink) -> Result<()> {
        Self::start(self, on_chunk, on_error)
    }

    fn stop(&mut self) {
        Self::stop(self);
    }
}

impl Default for AudioCaptureSource {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_MS)
    }
}

impl Drop for AudioCaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Whether a device config can run at the capture rate
fn supports_rate(range: &SupportedStreamConfigRange) -> bool {
    range.min_sample_rate() <= SampleRate(SAMPLE_RATE)
        && range.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        && matches!(range.sample_format(), SampleFormat::F32 | SampleFormat::I16)
}

/// Open the default input device and build a playing stream
fn open_stream(
    chunk_samples: usize,
    active: Arc<AtomicBool>,
    on_chunk: ChunkSink,
    mut on_error: DeviceErrorSink,
) -> Result<Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let configs: Vec<SupportedStreamConfigRange> = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(supports_rate)
        .collect();

    // Prefer mono, fall back to downmixing
    let supported = configs
        .iter()
        .find(|c| c.channels() == 1)
        .or_else(|| configs.first())
        .cloned()
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?
        .with_sample_rate(SampleRate(SAMPLE_RATE));

    let format = supported.sample_format();
    let config: StreamConfig = supported.config();

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        channels = config.channels,
        format = ?format,
        "audio capture initialized"
    );

    let mut rechunker = Rechunker::new(chunk_samples, usize::from(config.channels), active, on_chunk);
    let err_fn = move |err: cpal::StreamError| {
        tracing::error!(error = %err, "audio capture error");
        on_error(err.to_string());
    };

    let stream = match format {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| rechunker.push_i16(data),
            err_fn,
            None,
        ),
        _ => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| rechunker.push_f32(data),
            err_fn,
            None,
        ),
    }
    .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}
