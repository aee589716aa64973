//! Microphone capture pipeline: device callback → fixed-size chunks → wire payloads.

use crate::audio::pcm::encode_pcm16_base64;
use crate::defaults;
use crate::error::{LiveError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Callback invoked by the audio hardware with mono `f32` samples in [-1, 1].
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Receives every encoded chunk. Runs on the hardware callback thread.
pub type ChunkSink = Box<dyn FnMut(OutboundChunk) -> Result<()> + Send + 'static>;

/// Trait for microphone devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
/// The lifecycle is `acquire` → `start` → `halt` → `release`.
pub trait AudioInput: Send {
    /// Open the device. Permission and device-not-found errors surface here.
    fn acquire(&mut self) -> Result<()>;

    /// Begin delivering samples at the configured rate to `on_samples`.
    fn start(&mut self, on_samples: SampleCallback) -> Result<()>;

    /// Stop the hardware callback. Safe to call when not started.
    fn halt(&mut self);

    /// Release the device. Safe to call when not acquired.
    fn release(&mut self);
}

/// One outbound window of captured audio, ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundChunk {
    /// Base64 little-endian 16-bit PCM.
    pub data: String,
    /// MIME descriptor, e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
    /// Number of samples encoded in `data`.
    pub samples: usize,
}

impl OutboundChunk {
    /// Encode a window of normalized samples.
    pub fn encode(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            data: encode_pcm16_base64(samples),
            mime_type: defaults::pcm_mime_type(sample_rate),
            samples: samples.len(),
        }
    }
}

/// Slices arbitrarily sized callback buffers into exact `frame_size` windows.
#[derive(Debug)]
pub struct ChunkFramer {
    frame_size: usize,
    pending: Vec<f32>,
}

impl ChunkFramer {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples and return every completed window, oldest first.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.frame_size {
                frames.push(std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_size),
                ));
            }
        }
        frames
    }

    /// Samples waiting for the next window.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureState {
    Released,
    Acquired,
    Streaming,
}

/// Owns the microphone for one session and turns its callbacks into chunks.
pub struct CapturePipeline {
    input: Box<dyn AudioInput>,
    frame_size: usize,
    sample_rate: u32,
    state: CaptureState,
    connected: Arc<AtomicBool>,
}

impl CapturePipeline {
    pub fn new(input: Box<dyn AudioInput>, frame_size: usize, sample_rate: u32) -> Self {
        Self {
            input,
            frame_size,
            sample_rate,
            state: CaptureState::Released,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acquire the input device. A no-op when already acquired.
    pub fn acquire(&mut self) -> Result<()> {
        if self.state == CaptureState::Released {
            self.input.acquire()?;
            self.state = CaptureState::Acquired;
        }
        Ok(())
    }

    /// Wire the device callback to `sink`.
    ///
    /// Every callback buffer is framed into `frame_size` windows; each window is
    /// encoded and handed to `sink`. A failing sink drops that chunk.
    pub fn start(&mut self, mut sink: ChunkSink) -> Result<()> {
        match self.state {
            CaptureState::Streaming => return Ok(()),
            CaptureState::Released => {
                return Err(LiveError::AudioCapture {
                    message: "input device not acquired".to_string(),
                });
            }
            CaptureState::Acquired => {}
        }

        self.connected = Arc::new(AtomicBool::new(true));
        let connected = Arc::clone(&self.connected);
        let sample_rate = self.sample_rate;
        let mut framer = ChunkFramer::new(self.frame_size);

        self.input.start(Box::new(move |samples: &[f32]| {
            if !connected.load(Ordering::Acquire) {
                return;
            }
            for frame in framer.push(samples) {
                let chunk = OutboundChunk::encode(&frame, sample_rate);
                if let Err(e) = sink(chunk) {
                    tracing::trace!("dropping captured chunk: {}", e);
                }
            }
        }))?;

        self.state = CaptureState::Streaming;
        Ok(())
    }

    /// Halt the callback, disconnect the framer, release the device.
    ///
    /// Idempotent: calling it on a stopped pipeline does nothing.
    pub fn stop(&mut self) {
        if self.state == CaptureState::Streaming {
            self.input.halt();
        }
        self.connected.store(false, Ordering::Release);
        if self.state != CaptureState::Released {
            self.input.release();
        }
        self.state = CaptureState::Released;
    }

    pub fn is_acquired(&self) -> bool {
        self.state != CaptureState::Released
    }

    pub fn is_streaming(&self) -> bool {
        self.state == CaptureState::Streaming
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Lifecycle call recorded by [`MockAudioInput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputCall {
    Acquire,
    Start,
    Halt,
    Release,
}

#[derive(Default)]
struct MockInputShared {
    calls: Vec<InputCall>,
    callback: Option<SampleCallback>,
}

/// Mock microphone for testing.
///
/// Samples are pushed through a [`MockInputHandle`] as if the hardware had
/// delivered them.
pub struct MockAudioInput {
    shared: Arc<Mutex<MockInputShared>>,
    acquire_error: Option<fn(String) -> LiveError>,
    should_fail_start: bool,
    error_message: String,
}

/// Test-side view of a [`MockAudioInput`].
#[derive(Clone)]
pub struct MockInputHandle {
    shared: Arc<Mutex<MockInputShared>>,
}

impl MockAudioInput {
    pub fn new() -> (Self, MockInputHandle) {
        let shared = Arc::new(Mutex::new(MockInputShared::default()));
        (
            Self {
                shared: Arc::clone(&shared),
                acquire_error: None,
                should_fail_start: false,
                error_message: "mock microphone error".to_string(),
            },
            MockInputHandle { shared },
        )
    }

    /// Configure the mock to fail on acquire, like a denied permission prompt
    pub fn with_acquire_failure(mut self) -> Self {
        self.acquire_error = Some(|message| LiveError::AudioPermission { message });
        self
    }

    /// Configure the mock to fail on acquire while building the stream, like
    /// a busy device or an unsupported sample format
    pub fn with_stream_failure(mut self) -> Self {
        self.acquire_error = Some(|message| LiveError::AudioCapture { message });
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    fn record(&self, call: InputCall) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.calls.push(call);
        }
    }
}

impl AudioInput for MockAudioInput {
    fn acquire(&mut self) -> Result<()> {
        self.record(InputCall::Acquire);
        if let Some(error) = self.acquire_error {
            return Err(error(self.error_message.clone()));
        }
        Ok(())
    }

    fn start(&mut self, on_samples: SampleCallback) -> Result<()> {
        self.record(InputCall::Start);
        if self.should_fail_start {
            return Err(LiveError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        if let Ok(mut shared) = self.shared.lock() {
            shared.callback = Some(on_samples);
        }
        Ok(())
    }

    fn halt(&mut self) {
        self.record(InputCall::Halt);
        if let Ok(mut shared) = self.shared.lock() {
            shared.callback = None;
        }
    }

    fn release(&mut self) {
        self.record(InputCall::Release);
    }
}

impl MockInputHandle {
    /// Deliver samples as the hardware would. Returns false when no callback is wired.
    pub fn feed(&self, samples: &[f32]) -> bool {
        let Ok(mut shared) = self.shared.lock() else {
            return false;
        };
        match shared.callback.as_mut() {
            Some(callback) => {
                callback(samples);
                true
            }
            None => false,
        }
    }

    /// Lifecycle calls seen so far, in order.
    pub fn calls(&self) -> Vec<InputCall> {
        self.shared
            .lock()
            .map(|shared| shared.calls.clone())
            .unwrap_or_default()
    }

    /// True while a hardware callback is installed.
    pub fn is_streaming(&self) -> bool {
        self.shared
            .lock()
            .map(|shared| shared.callback.is_some())
            .unwrap_or(false)
    }
}
