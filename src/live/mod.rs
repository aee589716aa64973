//! Realtime voice session: wire protocol, transport, turn tracking and the
//! session manager that ties them to the audio pipelines.

pub mod handle;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transcript;
pub mod transport;

pub use handle::VoiceChat;
pub use protocol::{ServerEvent, SessionSetup};
pub use session::{LiveSession, SessionEvent, SessionParts};
pub use state::{LiveState, SessionState};
pub use transcript::{Direction, Transcription, Turn, TurnSink, TurnTracker};
pub use transport::{ChannelEvent, Connection, SessionLink, Transport, WebSocketTransport};
