//! Caller-facing handle to a running session task.

use crate::config::Config;
use crate::error::{LiveError, Result};
use crate::live::session::{LiveSession, SessionEvent, SessionParts};
use crate::live::state::LiveState;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Voice chat backed by a [`LiveSession`] running on its own task.
///
/// Dropping the handle ends the task, which tears down any open session.
pub struct VoiceChat {
    events: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Receiver<LiveState>,
    task: JoinHandle<()>,
}

impl VoiceChat {
    /// Spawn the session task. Must be called inside a tokio runtime.
    pub fn spawn(config: &Config, parts: SessionParts) -> Self {
        let (session, events) = LiveSession::new(config, parts);
        let state = session.subscribe();
        let task = tokio::spawn(session.run());
        Self {
            events,
            state,
            task,
        }
    }

    /// Open the microphone and the output, then connect.
    ///
    /// Resolves once the handshake finished; audio starts flowing when the
    /// service acknowledges the setup. A no-op while a session is connecting
    /// or open.
    pub async fn start_session(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(SessionEvent::Start(tx))
            .map_err(|_| LiveError::SessionClosed)?;
        rx.await.map_err(|_| LiveError::SessionClosed)?
    }

    /// Tear the session down. Safe to call at any time.
    pub async fn stop_session(&self) {
        let (tx, rx) = oneshot::channel();
        if self.events.send(SessionEvent::Stop(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> LiveState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<LiveState> {
        self.state.clone()
    }

    /// Stop any session and wait for the task to finish.
    pub async fn shutdown(self) {
        self.stop_session().await;
        let Self { events, task, .. } = self;
        drop(events);
        if let Err(e) = task.await {
            tracing::warn!("Session task failed: {}", e);
        }
    }
}
