//! Session channel transport: the bidirectional connection to the live service.
//!
//! [`Transport::connect`] performs the handshake and returns a [`Connection`]:
//! a [`SessionLink`] for outbound audio plus the ordered stream of inbound
//! [`ChannelEvent`]s. The session task owns the link; the inbound stream is
//! pumped into the session queue by the task that called `connect`, so the
//! setup acknowledgement can never overtake the link itself.

use crate::audio::capture::OutboundChunk;
use crate::config::Config;
use crate::error::{LiveError, Result};
use crate::live::protocol::{ClientMessage, ServerEvent, ServerMessage, SessionSetup};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Inbound signal from the channel, in transport order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The service acknowledged the setup; audio may flow.
    Opened,
    Server(ServerEvent),
    /// Transport failure. The channel is unusable afterwards.
    Error(String),
    /// The remote end closed the channel.
    Closed { reason: Option<String> },
}

/// Outbound half of an established channel.
pub trait SessionLink: Send {
    /// Queue one captured chunk for sending.
    fn send_audio(&mut self, chunk: &OutboundChunk) -> Result<()>;

    /// Close the channel. Idempotent.
    fn close(&mut self);
}

/// An established channel.
pub struct Connection {
    pub link: Box<dyn SessionLink>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Opens channels to the live service.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, setup: &SessionSetup) -> Result<Connection>;
}

enum Outgoing {
    Frame(String),
    Close,
}

/// WebSocket transport for the `BidiGenerateContent` endpoint.
pub struct WebSocketTransport {
    endpoint: String,
    api_key: String,
}

impl WebSocketTransport {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        // Fails only when a provider is already installed
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    /// Build from session config. Fails when no API key is configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.api_key()?;
        Ok(Self::new(config.session.endpoint.clone(), api_key))
    }

    /// Endpoint URL with the API key as the `key` query parameter.
    fn url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, separator, self.api_key)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, setup: &SessionSetup) -> Result<Connection> {
        tracing::debug!("Connecting to {} (model {})", self.endpoint, setup.model);

        let (ws, _response) = connect_async(self.url())
            .await
            .map_err(|e| LiveError::Transport {
                message: format!("Failed to connect: {}", e),
            })?;
        let (mut sink, mut stream) = ws.split();

        let setup_frame = setup.to_message().to_json()?;
        sink.send(Message::Text(setup_frame.into()))
            .await
            .map_err(|e| LiveError::Transport {
                message: format!("Failed to send setup: {}", e),
            })?;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(outgoing) = out_rx.recv().await {
                match outgoing {
                    Outgoing::Frame(json) => {
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            tracing::warn!("Failed to send frame: {}", e);
                            break;
                        }
                    }
                    Outgoing::Close => break,
                }
            }
            if let Err(e) = sink.close().await {
                tracing::debug!("Websocket close: {}", e);
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let delivered = match message {
                    Ok(Message::Text(text)) => forward_frame(text.as_bytes(), &event_tx),
                    Ok(Message::Binary(data)) => forward_frame(&data, &event_tx),
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty());
                        // Receiver may already be gone after a local close
                        let _ = event_tx.send(ChannelEvent::Closed { reason });
                        return;
                    }
                    Ok(_) => true,
                    Err(e) => {
                        let _ = event_tx.send(ChannelEvent::Error(e.to_string()));
                        return;
                    }
                };
                if !delivered {
                    return;
                }
            }
            let _ = event_tx.send(ChannelEvent::Closed { reason: None });
        });

        Ok(Connection {
            link: Box::new(WebSocketLink {
                outgoing: Some(out_tx),
                reader,
            }),
            events: event_rx,
        })
    }
}

/// Decode one frame and forward its events. Returns false once nobody listens.
fn forward_frame(bytes: &[u8], events: &mpsc::UnboundedSender<ChannelEvent>) -> bool {
    let message = match ServerMessage::from_slice(bytes) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Skipping frame: {}", e);
            return !events.is_closed();
        }
    };

    if let Some(go_away) = &message.go_away {
        tracing::info!(
            "Server will close the session (time left: {})",
            go_away.time_left.as_deref().unwrap_or("unknown")
        );
    }
    if message.is_setup_complete() && events.send(ChannelEvent::Opened).is_err() {
        return false;
    }
    message
        .into_events()
        .into_iter()
        .all(|event| events.send(ChannelEvent::Server(event)).is_ok())
}

struct WebSocketLink {
    outgoing: Option<mpsc::UnboundedSender<Outgoing>>,
    reader: JoinHandle<()>,
}

impl SessionLink for WebSocketLink {
    fn send_audio(&mut self, chunk: &OutboundChunk) -> Result<()> {
        let frame = ClientMessage::audio(chunk).to_json()?;
        self.outgoing
            .as_ref()
            .ok_or(LiveError::SessionClosed)?
            .send(Outgoing::Frame(frame))
            .map_err(|_| LiveError::SessionClosed)
    }

    fn close(&mut self) {
        if let Some(outgoing) = self.outgoing.take() {
            let _ = outgoing.send(Outgoing::Close);
            self.reader.abort();
        }
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        self.close();
    }
}

struct MockConnection {
    setup: SessionSetup,
    sent: Vec<OutboundChunk>,
    close_calls: usize,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

#[derive(Default)]
struct MockTransportShared {
    connections: Vec<MockConnection>,
    hold: bool,
    manual_open: bool,
    fail_next: Option<String>,
    waiting: VecDeque<oneshot::Sender<std::result::Result<(), String>>>,
}

/// Mock transport for testing.
///
/// Every `connect` is recorded. By default the handshake succeeds at once and
/// the setup acknowledgement is queued right away; [`MockTransportHandle`]
/// can hold handshakes, fail them, and inject inbound events.
pub struct MockTransport {
    shared: Arc<Mutex<MockTransportShared>>,
}

/// Test-side view of a [`MockTransport`]. Connections are numbered from 0.
#[derive(Clone)]
pub struct MockTransportHandle {
    shared: Arc<Mutex<MockTransportShared>>,
}

impl MockTransport {
    pub fn new() -> (Self, MockTransportHandle) {
        let shared = Arc::new(Mutex::new(MockTransportShared::default()));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MockTransportHandle { shared },
        )
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockTransportShared>> {
        self.shared.lock().map_err(|e| LiveError::Transport {
            message: format!("Failed to lock mock transport: {}", e),
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, setup: &SessionSetup) -> Result<Connection> {
        let (index, events, gate, manual_open) = {
            let mut shared = self.lock()?;
            let index = shared.connections.len();
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            shared.connections.push(MockConnection {
                setup: setup.clone(),
                sent: Vec::new(),
                close_calls: 0,
                events: events_tx,
            });
            if let Some(message) = shared.fail_next.take() {
                return Err(LiveError::Transport { message });
            }
            let gate = if shared.hold {
                let (tx, rx) = oneshot::channel();
                shared.waiting.push_back(tx);
                Some(rx)
            } else {
                None
            };
            (index, events_rx, gate, shared.manual_open)
        };

        if let Some(gate) = gate {
            match gate.await {
                Ok(Ok(())) => {}
                Ok(Err(message)) => return Err(LiveError::Transport { message }),
                Err(_) => {
                    return Err(LiveError::Transport {
                        message: "handshake abandoned".to_string(),
                    });
                }
            }
        }

        if !manual_open {
            let shared = self.lock()?;
            if let Some(connection) = shared.connections.get(index) {
                let _ = connection.events.send(ChannelEvent::Opened);
            }
        }

        Ok(Connection {
            link: Box::new(MockLink {
                shared: Arc::clone(&self.shared),
                index,
            }),
            events,
        })
    }
}

struct MockLink {
    shared: Arc<Mutex<MockTransportShared>>,
    index: usize,
}

impl SessionLink for MockLink {
    fn send_audio(&mut self, chunk: &OutboundChunk) -> Result<()> {
        let mut shared = self.shared.lock().map_err(|_| LiveError::SessionClosed)?;
        let connection = shared
            .connections
            .get_mut(self.index)
            .ok_or(LiveError::SessionClosed)?;
        if connection.close_calls > 0 {
            return Err(LiveError::SessionClosed);
        }
        connection.sent.push(chunk.clone());
        Ok(())
    }

    fn close(&mut self) {
        if let Ok(mut shared) = self.shared.lock()
            && let Some(connection) = shared.connections.get_mut(self.index)
        {
            connection.close_calls += 1;
        }
    }
}

impl MockTransportHandle {
    /// Keep every following handshake pending until completed or failed.
    pub fn hold_handshakes(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.hold = true;
        }
    }

    /// Do not queue the setup acknowledgement automatically; see [`Self::open`].
    pub fn manual_open(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.manual_open = true;
        }
    }

    /// Make the next `connect` fail with a transport error.
    pub fn fail_next_connect(&self, message: &str) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.fail_next = Some(message.to_string());
        }
    }

    /// Let the oldest held handshake succeed. Returns false if none is waiting.
    pub fn complete_handshake(&self) -> bool {
        self.resolve_handshake(Ok(()))
    }

    /// Let the oldest held handshake fail.
    pub fn fail_handshake(&self, message: &str) -> bool {
        self.resolve_handshake(Err(message.to_string()))
    }

    fn resolve_handshake(&self, outcome: std::result::Result<(), String>) -> bool {
        let waiter = self
            .shared
            .lock()
            .ok()
            .and_then(|mut shared| shared.waiting.pop_front());
        waiter.is_some_and(|tx| tx.send(outcome).is_ok())
    }

    /// Inject an inbound event on connection `index`.
    pub fn emit(&self, index: usize, event: ChannelEvent) -> bool {
        self.shared
            .lock()
            .ok()
            .and_then(|shared| {
                shared
                    .connections
                    .get(index)
                    .map(|c| c.events.send(event).is_ok())
            })
            .unwrap_or(false)
    }

    /// Acknowledge the setup on connection `index`.
    pub fn open(&self, index: usize) -> bool {
        self.emit(index, ChannelEvent::Opened)
    }

    pub fn server_event(&self, index: usize, event: ServerEvent) -> bool {
        self.emit(index, ChannelEvent::Server(event))
    }

    pub fn connect_count(&self) -> usize {
        self.shared
            .lock()
            .map(|shared| shared.connections.len())
            .unwrap_or(0)
    }

    pub fn setup(&self, index: usize) -> Option<SessionSetup> {
        self.shared
            .lock()
            .ok()
            .and_then(|shared| shared.connections.get(index).map(|c| c.setup.clone()))
    }

    /// Chunks sent on connection `index`, in order.
    pub fn sent(&self, index: usize) -> Vec<OutboundChunk> {
        self.shared
            .lock()
            .ok()
            .and_then(|shared| shared.connections.get(index).map(|c| c.sent.clone()))
            .unwrap_or_default()
    }

    pub fn close_calls(&self, index: usize) -> usize {
        self.shared
            .lock()
            .ok()
            .and_then(|shared| shared.connections.get(index).map(|c| c.close_calls))
            .unwrap_or(0)
    }

    pub fn is_closed(&self, index: usize) -> bool {
        self.close_calls(index) > 0
    }
}
