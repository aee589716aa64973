//! Real audio devices using CPAL (Cross-Platform Audio Library).

use crate::audio::capture::{AudioInput, SampleCallback};
use crate::audio::pcm::{downmix_to_mono, i16_to_f32, resample};
use crate::audio::playback::{AudioOutput, EndedCallback, SourceId};
use crate::error::{LiveError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL probes ALSA/JACK/PipeWire backends and they print harmless but noisy
/// messages while doing so.
///
/// Only the `devices` listing uses this. fd 2 is process-wide, so anything
/// another thread writes to stderr meanwhile is lost; the session path never
/// redirects it.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    // SAFETY: fd 2 is saved before redirection and restored afterwards; both
    // descriptors are checked before use.
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Input device name patterns that are never useful for voice.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

/// Available devices for one direction, preferred ones marked "\[recommended\]".
///
/// Surround channels, HDMI and S/PDIF endpoints are filtered from input listings.
fn list_devices(direction: Direction) -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        match direction {
            Direction::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
            Direction::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
        }
    })
    .map_err(|e| LiveError::AudioCapture {
        message: format!("Failed to enumerate {} devices: {}", direction.label(), e),
    })?;

    let mut names = Vec::new();
    for device in devices {
        let Ok(name) = device.name() else {
            continue;
        };
        if direction == Direction::Input && should_filter_device(&name) {
            continue;
        }
        if is_preferred_device(&name) {
            names.push(format!("{} [recommended]", name));
        } else {
            names.push(name);
        }
    }
    Ok(names)
}

pub fn list_input_devices() -> Result<Vec<String>> {
    list_devices(Direction::Input)
}

pub fn list_output_devices() -> Result<Vec<String>> {
    list_devices(Direction::Output)
}

/// Find a device by exact name, or the best default (PipeWire/Pulse first).
///
/// Runs on the session task, so backend probe noise is left on stderr.
fn find_device(direction: Direction, name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let devices = match direction {
        Direction::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
        Direction::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
    }
    .map_err(|e| LiveError::AudioCapture {
        message: format!("Failed to enumerate {} devices: {}", direction.label(), e),
    })?;

    if let Some(wanted) = name {
        return devices
            .into_iter()
            .find(|dev| dev.name().is_ok_and(|n| n == wanted))
            .ok_or_else(|| LiveError::AudioDeviceNotFound {
                device: wanted.to_string(),
            });
    }

    if let Some(device) = devices
        .into_iter()
        .find(|dev| dev.name().is_ok_and(|n| is_preferred_device(&n)))
    {
        return Ok(device);
    }

    let fallback = match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    };
    fallback.ok_or_else(|| LiveError::AudioDeviceNotFound {
        device: format!("default {}", direction.label()),
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is owned by exactly one device wrapper and only touched
/// from the task that owns the live session.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Callback installed by `start`; empty while the stream is paused.
type CallbackSlot = Arc<Mutex<Option<SampleCallback>>>;

fn deliver(slot: &CallbackSlot, samples: &[f32]) {
    if let Ok(mut slot) = slot.lock()
        && let Some(on_samples) = slot.as_mut()
    {
        on_samples(samples);
    }
}

/// Microphone input via CPAL, delivering 16 kHz mono `f32`.
///
/// Tries f32/16kHz/mono, then i16/16kHz/mono, then the device's native format
/// with software down-mix and resampling. The stream is built paused by
/// `acquire`, so format and permission failures surface before any connection
/// is made; `start` only installs the callback and plays it.
pub struct CpalInput {
    device_name: Option<String>,
    sample_rate: u32,
    stream: Option<SendableStream>,
    slot: CallbackSlot,
}

impl CpalInput {
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Self {
        Self {
            device_name: device_name.map(str::to_string),
            sample_rate,
            stream: None,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    fn build_stream(&self, device: &cpal::Device) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            tracing::error!("Audio input stream error: {}", err);
        };

        let slot = Arc::clone(&self.slot);
        if let Ok(stream) = device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| deliver(&slot, data),
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let slot = Arc::clone(&self.slot);
        if let Ok(stream) = device.build_input_stream(
            &preferred_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let converted: Vec<f32> = data.iter().map(|&s| i16_to_f32(s)).collect();
                deliver(&slot, &converted);
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native(device)
    }

    /// Capture at the device's native config and convert in software.
    fn build_stream_native(&self, device: &cpal::Device) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            device
                .default_input_config()
                .map_err(|e| LiveError::AudioCapture {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            "using native input format ({}ch/{}Hz/{:?}), converting in software",
            native_channels,
            native_rate,
            default_config.sample_format(),
        );

        let err_callback = |err| {
            tracing::error!("Audio input stream error: {}", err);
        };

        let slot = Arc::clone(&self.slot);
        let convert = move |samples: &[f32]| {
            let mono = downmix_to_mono(samples, native_channels);
            deliver(&slot, &resample(&mono, native_rate, target_rate));
        };

        match default_config.sample_format() {
            SampleFormat::F32 => device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| convert(data),
                    err_callback,
                    None,
                )
                .map_err(|e| LiveError::AudioCapture {
                    message: format!("Failed to build native f32 stream: {}", e),
                }),
            SampleFormat::I16 => device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let floats: Vec<f32> = data.iter().map(|&s| i16_to_f32(s)).collect();
                        convert(&floats);
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| LiveError::AudioCapture {
                    message: format!("Failed to build native i16 stream: {}", e),
                }),
            fmt => Err(LiveError::AudioCapture {
                message: format!(
                    "Unsupported native sample format: {:?}. \
                     Try specifying a device with --device.",
                    fmt
                ),
            }),
        }
    }
}

impl AudioInput for CpalInput {
    fn acquire(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let device = find_device(Direction::Input, self.device_name.as_deref())?;
        let stream = self.build_stream(&device)?;
        // Some backends start a stream as soon as it is built.
        if let Err(e) = stream.pause() {
            tracing::debug!("Input stream could not be paused after build: {}", e);
        }
        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn start(&mut self, on_samples: SampleCallback) -> Result<()> {
        let stream = self.stream.as_ref().ok_or_else(|| LiveError::AudioCapture {
            message: "input device not acquired".to_string(),
        })?;
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(on_samples);
        }
        stream.0.play().map_err(|e| LiveError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })
    }

    fn halt(&mut self) {
        if let Some(stream) = &self.stream
            && let Err(e) = stream.0.pause()
        {
            tracing::warn!("Failed to pause input stream: {}", e);
        }
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }

    fn release(&mut self) {
        self.stream = None;
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

struct MixerSource {
    id: SourceId,
    start_frame: u64,
    samples: Arc<[f32]>,
    gain: f32,
}

impl MixerSource {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sums scheduled chunks into the output buffer and keeps the output clock.
#[derive(Default)]
struct Mixer {
    frames_rendered: u64,
    sources: Vec<MixerSource>,
}

impl Mixer {
    /// Render `frames` frames of mono audio into `out` and return the ids of
    /// chunks that finished within this window.
    fn render(&mut self, out: &mut [f32]) -> Vec<SourceId> {
        let base = self.frames_rendered;
        let frames = out.len() as u64;
        out.fill(0.0);

        for source in &self.sources {
            if source.end_frame() <= base || source.start_frame >= base + frames {
                continue;
            }
            let first = source.start_frame.max(base);
            let last = source.end_frame().min(base + frames);
            for frame in first..last {
                let sample = source.samples[(frame - source.start_frame) as usize] * source.gain;
                out[(frame - base) as usize] += sample;
            }
        }
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.frames_rendered += frames;
        let now = self.frames_rendered;
        let mut finished = Vec::new();
        self.sources.retain(|source| {
            if source.end_frame() <= now {
                finished.push(source.id);
                false
            } else {
                true
            }
        });
        finished
    }
}

/// Frames a chunk occupies on the device clock, as `[start, end)`.
///
/// Both ends are floored from seconds, so a chunk placed at the previous
/// chunk's end starts on exactly the frame where that chunk stops.
fn frame_span(start_at: f64, duration: f64, device_rate: u32) -> (u64, u64) {
    let rate = device_rate as f64;
    let start = (start_at * rate).floor() as u64;
    let end = ((start_at + duration) * rate).floor() as u64;
    (start, end.max(start))
}

/// Speaker output via CPAL with a frame-counting clock.
///
/// Chunks arrive at the session's output rate and are resampled to the
/// device rate when the device does not run at it.
pub struct CpalOutput {
    device_name: Option<String>,
    mixer: Arc<Mutex<Mixer>>,
    stream: Option<SendableStream>,
    source_rate: u32,
    device_rate: u32,
}

impl CpalOutput {
    pub fn new(device_name: Option<&str>) -> Self {
        Self {
            device_name: device_name.map(str::to_string),
            mixer: Arc::new(Mutex::new(Mixer::default())),
            stream: None,
            source_rate: 0,
            device_rate: 0,
        }
    }

    fn build_stream(
        &self,
        device: &cpal::Device,
        config: cpal::StreamConfig,
        format: cpal::SampleFormat,
        on_ended: EndedCallback,
    ) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let channels = config.channels.max(1) as usize;
        let mixer = Arc::clone(&self.mixer);
        let mut mono = Vec::new();
        let mut render = move |frames: usize| -> Vec<f32> {
            mono.resize(frames, 0.0);
            let finished = match mixer.lock() {
                Ok(mut mixer) => mixer.render(&mut mono),
                Err(_) => Vec::new(),
            };
            for id in finished {
                on_ended(id);
            }
            mono.clone()
        };

        let err_callback = |err| {
            tracing::error!("Audio output stream error: {}", err);
        };

        match format {
            SampleFormat::F32 => device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mono = render(data.len() / channels);
                        for (frame, sample) in data.chunks_mut(channels).zip(mono) {
                            frame.fill(sample);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| LiveError::AudioPlayback {
                    message: format!("Failed to build f32 output stream: {}", e),
                }),
            SampleFormat::I16 => device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        let mono = render(data.len() / channels);
                        for (frame, sample) in data.chunks_mut(channels).zip(mono) {
                            frame.fill(crate::audio::pcm::f32_to_i16(sample));
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| LiveError::AudioPlayback {
                    message: format!("Failed to build i16 output stream: {}", e),
                }),
            fmt => Err(LiveError::AudioPlayback {
                message: format!("Unsupported output sample format: {:?}", fmt),
            }),
        }
    }
}

impl AudioOutput for CpalOutput {
    fn open(&mut self, sample_rate: u32, on_ended: EndedCallback) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let device = find_device(Direction::Output, self.device_name.as_deref())?;

        let default_config =
            device
                .default_output_config()
                .map_err(|e| LiveError::AudioPlayback {
                    message: format!("Failed to query default output config: {}", e),
                })?;

        // Prefer running the device at the stream rate; fall back to its native config.
        let preferred = cpal::StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let format = default_config.sample_format();

        if let Ok(mut mixer) = self.mixer.lock() {
            *mixer = Mixer::default();
        }

        let (stream, device_rate) =
            match self.build_stream(&device, preferred, format, Arc::clone(&on_ended)) {
                Ok(stream) => (stream, sample_rate),
                Err(e) => {
                    tracing::debug!("output at {}Hz unavailable ({}), using native rate", sample_rate, e);
                    let native_rate = default_config.sample_rate().0;
                    let stream =
                        self.build_stream(&device, default_config.into(), format, on_ended)?;
                    (stream, native_rate)
                }
            };

        stream.play().map_err(|e| LiveError::AudioPlayback {
            message: format!("Failed to start output stream: {}", e),
        })?;

        self.stream = Some(SendableStream(stream));
        self.source_rate = sample_rate;
        self.device_rate = device_rate;
        Ok(())
    }

    fn now(&self) -> f64 {
        if self.device_rate == 0 {
            return 0.0;
        }
        self.mixer
            .lock()
            .map(|mixer| mixer.frames_rendered as f64 / self.device_rate as f64)
            .unwrap_or(0.0)
    }

    fn play(&mut self, id: SourceId, start_at: f64, samples: Arc<[f32]>, gain: f32) -> Result<()> {
        if self.stream.is_none() {
            return Err(LiveError::AudioPlayback {
                message: "output device is not open".to_string(),
            });
        }
        let duration = samples.len() as f64 / self.source_rate as f64;
        let (start_frame, end_frame) = frame_span(start_at, duration, self.device_rate);
        let frames = (end_frame - start_frame) as usize;
        let samples: Arc<[f32]> = if samples.len() == frames {
            samples
        } else {
            let mut fitted = resample(&samples, self.source_rate, self.device_rate);
            let tail = fitted.last().copied().unwrap_or(0.0);
            fitted.resize(frames, tail);
            Arc::from(fitted)
        };

        let mut mixer = self.mixer.lock().map_err(|e| LiveError::AudioPlayback {
            message: format!("Failed to lock mixer: {}", e),
        })?;
        mixer.sources.push(MixerSource {
            id,
            start_frame,
            samples,
            gain,
        });
        Ok(())
    }

    fn stop_all(&mut self) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.sources.clear();
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take()
            && let Err(e) = stream.0.pause()
        {
            tracing::warn!("Failed to pause output stream: {}", e);
        }
        self.stop_all();
    }
}
