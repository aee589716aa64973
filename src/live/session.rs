//! Realtime voice session manager.
//!
//! One [`LiveSession`] owns the capture pipeline, the playback pipeline, the
//! turn tracker and at most one session link. Everything that happens
//! asynchronously (hardware callbacks, handshake completion, inbound frames,
//! caller commands) is posted as a [`SessionEvent`] into a single queue and
//! handled to completion, one event at a time, by the task running
//! [`LiveSession::run`].
//!
//! Each started session gets a new generation number and every asynchronous
//! result is tagged with the generation that produced it. Teardown bumps the
//! generation too, so late results from a torn-down session are recognized as
//! stale: a stale link is closed on arrival, any other stale event is dropped.

use crate::audio::capture::{AudioInput, CapturePipeline, OutboundChunk};
use crate::audio::pcm::decode_pcm16_base64;
use crate::audio::playback::{AudioOutput, EndedCallback, PlaybackPipeline, SourceId};
use crate::config::Config;
use crate::defaults;
use crate::error::{LiveError, Result};
use crate::live::protocol::{ServerEvent, SessionSetup};
use crate::live::state::{LiveState, SessionState};
use crate::live::transcript::{Direction, TurnSink, TurnTracker};
use crate::live::transport::{ChannelEvent, Connection, SessionLink, Transport};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Work item for the session task.
pub enum SessionEvent {
    /// Caller asks for a session. Answered once the handshake resolved.
    Start(oneshot::Sender<Result<()>>),
    /// Caller asks to end the session. Answered after teardown.
    Stop(oneshot::Sender<()>),
    /// Handshake finished.
    Connected {
        generation: u64,
        result: Result<Box<dyn SessionLink>>,
    },
    /// Inbound event from the link of `generation`.
    Channel {
        generation: u64,
        event: ChannelEvent,
    },
    /// Microphone chunk ready to send.
    Captured {
        generation: u64,
        chunk: OutboundChunk,
    },
    /// Output finished playing chunk `id`.
    PlaybackEnded { generation: u64, id: SourceId },
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::Start(_) => f.write_str("Start"),
            SessionEvent::Stop(_) => f.write_str("Stop"),
            SessionEvent::Connected { generation, result } => f
                .debug_struct("Connected")
                .field("generation", generation)
                .field("ok", &result.is_ok())
                .finish(),
            SessionEvent::Channel { generation, event } => f
                .debug_struct("Channel")
                .field("generation", generation)
                .field("event", event)
                .finish(),
            SessionEvent::Captured { generation, chunk } => f
                .debug_struct("Captured")
                .field("generation", generation)
                .field("samples", &chunk.samples)
                .finish(),
            SessionEvent::PlaybackEnded { generation, id } => f
                .debug_struct("PlaybackEnded")
                .field("generation", generation)
                .field("id", id)
                .finish(),
        }
    }
}

/// Hardware and network seams of a session.
pub struct SessionParts {
    pub input: Box<dyn AudioInput>,
    pub output: Box<dyn AudioOutput>,
    pub transport: Arc<dyn Transport>,
    pub turns: Box<dyn TurnSink>,
}

pub struct LiveSession {
    capture: CapturePipeline,
    playback: PlaybackPipeline,
    transport: Arc<dyn Transport>,
    setup: SessionSetup,
    stop_playback_on_interrupt: bool,
    tracker: TurnTracker,
    turns: Box<dyn TurnSink>,
    state: SessionState,
    generation: u64,
    link: Option<Box<dyn SessionLink>>,
    pending_start: Option<oneshot::Sender<Result<()>>>,
    events_tx: mpsc::WeakUnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    state_tx: watch::Sender<LiveState>,
}

impl LiveSession {
    /// Build an idle session and the sender that feeds it.
    ///
    /// The session only keeps a weak reference to its own queue: once every
    /// returned sender is dropped, [`LiveSession::run`] tears down and returns.
    pub fn new(config: &Config, parts: SessionParts) -> (Self, mpsc::UnboundedSender<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(LiveState::default());
        let gain = config.audio.output_gain.clamp(0.0, defaults::MAX_OUTPUT_GAIN);

        let session = Self {
            capture: CapturePipeline::new(
                parts.input,
                config.audio.capture_frame_size,
                config.audio.input_sample_rate,
            ),
            playback: PlaybackPipeline::new(parts.output, config.audio.output_sample_rate, gain),
            transport: parts.transport,
            setup: SessionSetup::from_config(&config.session),
            stop_playback_on_interrupt: config.session.stop_playback_on_interrupt,
            tracker: TurnTracker::new(),
            turns: parts.turns,
            state: SessionState::Idle,
            generation: 0,
            link: None,
            pending_start: None,
            events_tx: events_tx.downgrade(),
            events_rx,
            state_tx,
        };
        (session, events_tx)
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Handle events until every sender is gone, then tear down.
    pub async fn run(mut self) {
        while self.step().await {}
        self.teardown();
    }

    /// Wait for the next event and handle it. Returns false when the queue closed.
    pub async fn step(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.handle(event);
                true
            }
            None => false,
        }
    }

    pub fn handle(&mut self, event: SessionEvent) {
        tracing::trace!("session event: {:?}", event);
        match event {
            SessionEvent::Start(reply) => self.start(reply),
            SessionEvent::Stop(reply) => {
                self.teardown();
                let _ = reply.send(());
            }
            SessionEvent::Connected { generation, result } => {
                self.on_connected(generation, result)
            }
            SessionEvent::Channel { generation, event } => {
                if generation == self.generation {
                    self.on_channel(event);
                } else {
                    tracing::debug!("Dropping stale channel event: {:?}", event);
                }
            }
            SessionEvent::Captured { generation, chunk } => {
                self.on_captured(generation, chunk)
            }
            SessionEvent::PlaybackEnded { generation, id } => {
                if generation == self.generation {
                    self.playback.finished(id);
                    self.publish();
                }
            }
        }
    }

    fn start(&mut self, reply: oneshot::Sender<Result<()>>) {
        if self.state.is_busy() {
            tracing::debug!("Session already {}, ignoring start", self.state);
            let _ = reply.send(Ok(()));
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        self.tracker.reset();
        self.state = SessionState::Connecting;
        tracing::debug!("Session {} connecting", generation);
        self.publish();

        if let Err(e) = self.acquire_devices(generation) {
            tracing::warn!("Failed to start session: {}", e);
            self.teardown();
            let _ = reply.send(Err(e));
            return;
        }

        self.pending_start = Some(reply);
        self.spawn_connect(generation);
    }

    fn acquire_devices(&mut self, generation: u64) -> Result<()> {
        self.capture.acquire()?;

        let events = self.events_tx.clone();
        let on_ended: EndedCallback = Arc::new(move |id| {
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(SessionEvent::PlaybackEnded { generation, id });
            }
        });
        self.playback.open(on_ended)
    }

    /// Run the handshake off the session task, then pump the link's inbound
    /// events into the queue behind the `Connected` event.
    fn spawn_connect(&self, generation: u64) {
        let transport = Arc::clone(&self.transport);
        let setup = self.setup.clone();
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            let result = transport.connect(&setup).await;
            let Some(tx) = events.upgrade() else {
                return;
            };
            let mut inbound = match result {
                Ok(Connection { link, events }) => {
                    let _ = tx.send(SessionEvent::Connected {
                        generation,
                        result: Ok(link),
                    });
                    events
                }
                Err(e) => {
                    let _ = tx.send(SessionEvent::Connected {
                        generation,
                        result: Err(e),
                    });
                    return;
                }
            };
            drop(tx);

            while let Some(event) = inbound.recv().await {
                let last = matches!(event, ChannelEvent::Error(_) | ChannelEvent::Closed { .. });
                let Some(tx) = events.upgrade() else {
                    return;
                };
                if tx.send(SessionEvent::Channel { generation, event }).is_err() || last {
                    return;
                }
            }
        });
    }

    fn on_connected(&mut self, generation: u64, result: Result<Box<dyn SessionLink>>) {
        if generation != self.generation || self.state != SessionState::Connecting {
            if let Ok(mut link) = result {
                tracing::debug!("Closing stale link from session {}", generation);
                link.close();
            }
            return;
        }

        match result {
            Ok(link) => {
                tracing::debug!("Session {} connected, waiting for setup ack", generation);
                self.link = Some(link);
                if let Some(reply) = self.pending_start.take() {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(e) => {
                tracing::error!("Failed to connect live session: {}", e);
                let reply = self.pending_start.take();
                self.teardown();
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e));
                }
            }
        }
    }

    fn on_channel(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => self.on_opened(),
            ChannelEvent::Server(event) => {
                if self.state == SessionState::Open {
                    self.on_server_event(event);
                } else {
                    tracing::debug!("Ignoring server event while {}", self.state);
                }
            }
            ChannelEvent::Error(message) => {
                tracing::error!("Live session error: {}", message);
                self.teardown();
            }
            ChannelEvent::Closed { reason } => {
                match reason {
                    Some(reason) => tracing::info!("Live session closed: {}", reason),
                    None => tracing::info!("Live session closed"),
                }
                self.teardown();
            }
        }
    }

    fn on_opened(&mut self) {
        if self.state != SessionState::Connecting || self.link.is_none() {
            return;
        }

        let generation = self.generation;
        let events = self.events_tx.clone();
        let started = self.capture.start(Box::new(move |chunk| {
            let tx = events.upgrade().ok_or(LiveError::SessionClosed)?;
            tx.send(SessionEvent::Captured { generation, chunk })
                .map_err(|_| LiveError::SessionClosed)
        }));

        if let Err(e) = started {
            tracing::error!("Failed to start capture: {}", e);
            self.teardown();
            return;
        }

        self.state = SessionState::Open;
        tracing::debug!("Session {} open", generation);
        self.publish();
    }

    fn on_captured(&mut self, generation: u64, chunk: OutboundChunk) {
        if generation != self.generation || self.state != SessionState::Open {
            tracing::trace!("Dropping captured chunk outside an open session");
            return;
        }
        if let Some(link) = self.link.as_mut()
            && let Err(e) = link.send_audio(&chunk)
        {
            tracing::debug!("Failed to send audio chunk: {}", e);
        }
    }

    fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::InputTranscription(delta) => {
                self.tracker.push(Direction::Input, &delta);
            }
            ServerEvent::OutputTranscription(delta) => {
                self.tracker.push(Direction::Output, &delta);
            }
            ServerEvent::Audio(data) => self.play_audio(&data),
            ServerEvent::Interrupted => {
                if self.stop_playback_on_interrupt {
                    tracing::debug!("Interrupted, stopping {} chunks", self.playback.active_count());
                    self.playback.interrupt();
                }
            }
            ServerEvent::TurnComplete => {
                let turn = self.tracker.finish_turn();
                self.turns.turn_complete(&turn.user, &turn.model);
            }
        }
        self.publish();
    }

    fn play_audio(&mut self, data: &str) {
        let samples = match decode_pcm16_base64(data) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!("Dropping inbound audio chunk: {}", e);
                return;
            }
        };
        match self.playback.enqueue(samples) {
            Ok(Some(chunk)) => tracing::trace!(
                "Scheduled chunk {} at {:.3}s for {:.3}s",
                chunk.id,
                chunk.start_at,
                chunk.duration
            ),
            Ok(None) => {}
            Err(e) => tracing::warn!("Dropping inbound audio chunk: {}", e),
        }
    }

    /// Release everything the session holds and return to `Idle`.
    ///
    /// Shared by explicit stop, remote close and transport errors. Idempotent.
    pub fn teardown(&mut self) {
        if self.state != SessionState::Idle {
            tracing::debug!("Session {} closing", self.generation);
            self.state = SessionState::Closing;
        }
        self.generation += 1;

        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.capture.stop();
        self.playback.stop();
        self.tracker.reset();
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Err(LiveError::SessionClosed));
        }

        self.state = SessionState::Idle;
        self.publish();
    }

    fn publish(&self) {
        let next = LiveState {
            is_active: self.state == SessionState::Open,
            is_connecting: self.state == SessionState::Connecting,
            is_model_speaking: self.playback.is_speaking(),
            current_transcription: self.tracker.snapshot().clone(),
        };
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
