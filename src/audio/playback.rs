//! Gapless playback of inbound audio chunks.
//!
//! Chunks arrive with jitter. Each one is placed on the output timeline at
//! `max(cursor, now)` and the cursor moves to the end of that chunk, so
//! consecutive chunks play back-to-back in arrival order with no gap or
//! overlap.

use crate::error::{LiveError, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

/// Identifies one scheduled chunk on an output.
pub type SourceId = u64;

/// Called by the output when a chunk has finished playing. May run on an audio thread.
pub type EndedCallback = Arc<dyn Fn(SourceId) + Send + Sync + 'static>;

/// Trait for audio output devices with a sample-accurate clock.
pub trait AudioOutput: Send {
    /// Open the device at `sample_rate`. `on_ended` fires once per chunk that
    /// plays to completion; chunks removed by `stop_all` do not fire it.
    fn open(&mut self, sample_rate: u32, on_ended: EndedCallback) -> Result<()>;

    /// Current output clock in seconds since `open`.
    fn now(&self) -> f64;

    /// Play `samples` starting at `start_at` on the output clock.
    fn play(&mut self, id: SourceId, start_at: f64, samples: Arc<[f32]>, gain: f32) -> Result<()>;

    /// Silence every scheduled chunk immediately.
    fn stop_all(&mut self);

    /// Release the device. Safe to call when not open.
    fn close(&mut self);
}

/// The schedule cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackSchedule {
    next_start_time: f64,
}

impl PlaybackSchedule {
    /// Start time for a chunk arriving at output time `now`.
    pub fn start_for(&self, now: f64) -> f64 {
        self.next_start_time.max(now)
    }

    /// Move the cursor past a chunk that was placed at `start`.
    pub fn advance(&mut self, start: f64, duration: f64) {
        self.next_start_time = start + duration;
    }

    /// Place a chunk and return its start time.
    pub fn place(&mut self, now: f64, duration: f64) -> f64 {
        let start = self.start_for(now);
        self.advance(start, duration);
        start
    }

    pub fn cursor(&self) -> f64 {
        self.next_start_time
    }

    pub fn reset(&mut self) {
        self.next_start_time = 0.0;
    }
}

/// Where and for how long a chunk was scheduled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

/// Schedules decoded chunks on an [`AudioOutput`] and tracks which are in flight.
pub struct PlaybackPipeline {
    output: Box<dyn AudioOutput>,
    sample_rate: u32,
    gain: f32,
    schedule: PlaybackSchedule,
    active: HashSet<SourceId>,
    next_id: SourceId,
    open: bool,
}

impl PlaybackPipeline {
    pub fn new(output: Box<dyn AudioOutput>, sample_rate: u32, gain: f32) -> Self {
        Self {
            output,
            sample_rate,
            gain,
            schedule: PlaybackSchedule::default(),
            active: HashSet::new(),
            next_id: 0,
            open: false,
        }
    }

    /// Open the output device. The cursor restarts with the new output clock.
    pub fn open(&mut self, on_ended: EndedCallback) -> Result<()> {
        if self.open {
            return Ok(());
        }
        self.output.open(self.sample_rate, on_ended)?;
        self.schedule.reset();
        self.open = true;
        Ok(())
    }

    /// Schedule a decoded chunk right after the previous one.
    ///
    /// Returns `Ok(None)` for an empty chunk, which has nothing to play.
    /// When the output rejects the chunk the cursor is left where it was.
    pub fn enqueue(&mut self, samples: Vec<f32>) -> Result<Option<ScheduledChunk>> {
        if !self.open {
            return Err(LiveError::AudioPlayback {
                message: "output device is not open".to_string(),
            });
        }
        if samples.is_empty() {
            return Ok(None);
        }

        let duration = samples.len() as f64 / self.sample_rate as f64;
        let start_at = self.schedule.start_for(self.output.now());
        let id = self.next_id;

        self.output
            .play(id, start_at, Arc::from(samples), self.gain)?;

        self.next_id += 1;
        self.schedule.advance(start_at, duration);
        self.active.insert(id);
        Ok(Some(ScheduledChunk {
            id,
            start_at,
            duration,
        }))
    }

    /// Record that a chunk finished. Returns whether anything is still playing.
    pub fn finished(&mut self, id: SourceId) -> bool {
        self.active.remove(&id);
        self.is_speaking()
    }

    /// True iff at least one scheduled chunk has not finished.
    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn cursor(&self) -> f64 {
        self.schedule.cursor()
    }

    /// Drop everything in flight but keep the output open.
    pub fn interrupt(&mut self) {
        if self.open {
            self.output.stop_all();
        }
        self.active.clear();
        self.schedule.reset();
    }

    /// Halt every active chunk, clear the set, release the output. Idempotent.
    pub fn stop(&mut self) {
        if self.open {
            self.output.stop_all();
            self.output.close();
            self.open = false;
        }
        self.active.clear();
        self.schedule.reset();
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A `play` call recorded by [`MockAudioOutput`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlayedChunk {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
    pub gain: f32,
}

#[derive(Default)]
struct MockOutputShared {
    now: f64,
    sample_rate: u32,
    open: bool,
    opened: usize,
    closed: usize,
    stop_all_calls: usize,
    played: Vec<PlayedChunk>,
    pending: BTreeMap<SourceId, f64>,
    on_ended: Option<EndedCallback>,
    fail_next_play: bool,
}

/// Mock output device with a manually advanced clock.
pub struct MockAudioOutput {
    shared: Arc<Mutex<MockOutputShared>>,
    should_fail_open: bool,
}

/// Test-side view of a [`MockAudioOutput`].
#[derive(Clone)]
pub struct MockOutputHandle {
    shared: Arc<Mutex<MockOutputShared>>,
}

impl MockAudioOutput {
    pub fn new() -> (Self, MockOutputHandle) {
        let shared = Arc::new(Mutex::new(MockOutputShared::default()));
        (
            Self {
                shared: Arc::clone(&shared),
                should_fail_open: false,
            },
            MockOutputHandle { shared },
        )
    }

    /// Configure the mock to fail on open
    pub fn with_open_failure(mut self) -> Self {
        self.should_fail_open = true;
        self
    }
}

impl AudioOutput for MockAudioOutput {
    fn open(&mut self, sample_rate: u32, on_ended: EndedCallback) -> Result<()> {
        if self.should_fail_open {
            return Err(LiveError::AudioPlayback {
                message: "mock output error".to_string(),
            });
        }
        if let Ok(mut shared) = self.shared.lock() {
            shared.now = 0.0;
            shared.sample_rate = sample_rate;
            shared.open = true;
            shared.opened += 1;
            shared.on_ended = Some(on_ended);
        }
        Ok(())
    }

    fn now(&self) -> f64 {
        self.shared.lock().map(|shared| shared.now).unwrap_or(0.0)
    }

    fn play(&mut self, id: SourceId, start_at: f64, samples: Arc<[f32]>, gain: f32) -> Result<()> {
        let mut shared = self.shared.lock().map_err(|e| LiveError::AudioPlayback {
            message: format!("Failed to lock mock output: {}", e),
        })?;
        if std::mem::take(&mut shared.fail_next_play) {
            return Err(LiveError::AudioPlayback {
                message: "mock play failure".to_string(),
            });
        }
        let duration = samples.len() as f64 / shared.sample_rate.max(1) as f64;
        shared.played.push(PlayedChunk {
            id,
            start_at,
            duration,
            gain,
        });
        shared.pending.insert(id, start_at + duration);
        Ok(())
    }

    fn stop_all(&mut self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.stop_all_calls += 1;
            shared.pending.clear();
        }
    }

    fn close(&mut self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.open = false;
            shared.closed += 1;
            shared.pending.clear();
            shared.on_ended = None;
        }
    }
}

impl MockOutputHandle {
    /// Move the output clock to `t`, firing `on_ended` for every chunk that
    /// finishes by then, in id order.
    pub fn advance_to(&self, t: f64) {
        let (finished, callback) = {
            let Ok(mut shared) = self.shared.lock() else {
                return;
            };
            shared.now = t;
            let finished: Vec<SourceId> = shared
                .pending
                .iter()
                .filter(|&(_, &end)| end <= t + 1e-9)
                .map(|(&id, _)| id)
                .collect();
            for id in &finished {
                shared.pending.remove(id);
            }
            (finished, shared.on_ended.clone())
        };
        if let Some(callback) = callback {
            for id in finished {
                callback(id);
            }
        }
    }

    /// Make the next `play` call fail.
    pub fn fail_next_play(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.fail_next_play = true;
        }
    }

    pub fn played(&self) -> Vec<PlayedChunk> {
        self.shared
            .lock()
            .map(|shared| shared.played.clone())
            .unwrap_or_default()
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().map(|s| s.open).unwrap_or(false)
    }

    pub fn open_count(&self) -> usize {
        self.shared.lock().map(|s| s.opened).unwrap_or(0)
    }

    pub fn close_count(&self) -> usize {
        self.shared.lock().map(|s| s.closed).unwrap_or(0)
    }

    pub fn stop_all_count(&self) -> usize {
        self.shared.lock().map(|s| s.stop_all_calls).unwrap_or(0)
    }
}
