//! Session manager behavior driven through the mock microphone, speaker and transport.

use papaya_voice::audio::capture::{InputCall, MockAudioInput, MockInputHandle, OutboundChunk};
use papaya_voice::audio::pcm::encode_pcm16_base64;
use papaya_voice::audio::playback::{MockAudioOutput, MockOutputHandle};
use papaya_voice::config::Config;
use papaya_voice::error::LiveError;
use papaya_voice::live::session::{LiveSession, SessionEvent, SessionParts};
use papaya_voice::live::state::{LiveState, SessionState};
use papaya_voice::live::transport::{ChannelEvent, MockTransport, MockTransportHandle};
use papaya_voice::live::{ServerEvent, VoiceChat};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

const OUTPUT_RATE: f64 = 24000.0;
const FRAME: usize = 4;

type TurnLog = Arc<Mutex<Vec<(String, String)>>>;

struct Harness {
    session: LiveSession,
    tx: mpsc::UnboundedSender<SessionEvent>,
    mic: MockInputHandle,
    speaker: MockOutputHandle,
    net: MockTransportHandle,
    turns: TurnLog,
    state: watch::Receiver<LiveState>,
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.audio.capture_frame_size = FRAME;
    config
}

fn harness() -> Harness {
    harness_with(test_config(), MockAudioInput::new(), MockAudioOutput::new())
}

fn harness_with(
    config: Config,
    (input, mic): (MockAudioInput, MockInputHandle),
    (output, speaker): (MockAudioOutput, MockOutputHandle),
) -> Harness {
    let (transport, net) = MockTransport::new();
    let turns: TurnLog = Arc::new(Mutex::new(Vec::new()));
    let sink_turns = Arc::clone(&turns);
    let (session, tx) = LiveSession::new(
        &config,
        SessionParts {
            input: Box::new(input),
            output: Box::new(output),
            transport: Arc::new(transport),
            turns: Box::new(move |user: &str, model: &str| {
                sink_turns
                    .lock()
                    .unwrap()
                    .push((user.to_string(), model.to_string()));
            }),
        },
    );
    let state = session.subscribe();
    Harness {
        session,
        tx,
        mic,
        speaker,
        net,
        turns,
        state,
    }
}

/// Audio payload lasting `seconds` at the output rate.
fn audio(seconds: f64) -> ServerEvent {
    let samples = vec![0.25f32; (seconds * OUTPUT_RATE) as usize];
    ServerEvent::Audio(encode_pcm16_base64(&samples))
}

impl Harness {
    fn start(&self) -> oneshot::Receiver<papaya_voice::Result<()>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(SessionEvent::Start(reply)).unwrap();
        rx
    }

    fn stop(&self) -> oneshot::Receiver<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(SessionEvent::Stop(reply)).unwrap();
        rx
    }

    /// Handle exactly one queued event, waiting for it if needed.
    async fn step(&mut self) {
        let handled = tokio::time::timeout(Duration::from_secs(2), self.session.step())
            .await
            .expect("no session event arrived");
        assert!(handled, "session queue closed");
    }

    /// Start, connect and receive the setup acknowledgement.
    async fn open(&mut self) {
        let reply = self.start();
        self.step().await; // Start
        self.step().await; // Connected
        reply.await.unwrap().unwrap();
        self.step().await; // Opened
        assert_eq!(self.session.state(), SessionState::Open);
    }

    async fn server(&mut self, event: ServerEvent) {
        let index = self.net.connect_count() - 1;
        assert!(self.net.server_event(index, event));
        self.step().await;
    }

    fn live(&self) -> LiveState {
        self.state.borrow().clone()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn open_session_streams_microphone_chunks() {
    let mut h = harness();
    h.open().await;

    assert!(h.live().is_active);
    assert!(!h.live().is_connecting);
    assert_eq!(h.net.setup(0).unwrap().voice, "Zephyr");

    assert!(h.mic.feed(&[0.1; FRAME * 2]));
    h.step().await;
    h.step().await;

    let sent = h.net.sent(0);
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|c| c.mime_type == "audio/pcm;rate=16000"));
    assert!(sent.iter().all(|c| c.samples == FRAME));
}

#[tokio::test]
async fn chunks_play_back_to_back_in_arrival_order() {
    let mut h = harness();
    h.open().await;

    h.server(audio(0.5)).await;
    h.speaker.advance_to(0.2);
    h.server(audio(0.25)).await;
    h.server(audio(0.5)).await;

    let played = h.speaker.played();
    assert_eq!(played.len(), 3);
    assert!((played[0].start_at - 0.0).abs() < 1e-9);
    for pair in played.windows(2) {
        let previous_end = pair[0].start_at + pair[0].duration;
        assert!((pair[1].start_at - previous_end).abs() < 1e-9, "gap or overlap");
    }

    // All three have ended: the three ended events arrive in order.
    h.speaker.advance_to(2.0);
    for _ in 0..3 {
        h.step().await;
    }
    assert!(!h.live().is_model_speaking);

    // A late chunk starts at the current time, not at the stale cursor.
    h.server(audio(0.1)).await;
    assert!((h.speaker.played()[3].start_at - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn speaking_flag_follows_active_chunks() {
    let mut h = harness();
    h.open().await;
    assert!(!h.live().is_model_speaking);

    h.server(audio(1.0)).await;
    h.server(audio(1.0)).await;
    assert!(h.live().is_model_speaking);

    h.speaker.advance_to(1.0);
    h.step().await;
    assert!(h.live().is_model_speaking, "second chunk still playing");

    h.speaker.advance_to(2.0);
    h.step().await;
    assert!(!h.live().is_model_speaking);
}

#[tokio::test]
async fn stop_twice_releases_everything_once() {
    let mut h = harness();
    h.open().await;
    h.server(audio(1.0)).await;

    let first = h.stop();
    h.step().await;
    first.await.unwrap();
    let second = h.stop();
    h.step().await;
    second.await.unwrap();

    assert_eq!(
        h.mic.calls(),
        vec![
            InputCall::Acquire,
            InputCall::Start,
            InputCall::Halt,
            InputCall::Release
        ]
    );
    assert_eq!(h.speaker.close_count(), 1);
    assert_eq!(h.speaker.stop_all_count(), 1);
    assert_eq!(h.net.close_calls(0), 1);
    assert_eq!(h.live(), LiveState::default());
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[tokio::test]
async fn stop_while_idle_is_harmless() {
    let mut h = harness();
    let reply = h.stop();
    h.step().await;
    reply.await.unwrap();

    assert!(h.mic.calls().is_empty());
    assert_eq!(h.speaker.close_count(), 0);
    assert_eq!(h.net.connect_count(), 0);
}

#[tokio::test]
async fn link_arriving_after_stop_is_closed_and_ignored() {
    let mut h = harness();
    h.net.hold_handshakes();

    let reply = h.start();
    h.step().await;
    wait_until(|| h.net.connect_count() == 1).await;

    let stop = h.stop();
    h.step().await;
    stop.await.unwrap();
    assert!(matches!(reply.await.unwrap(), Err(LiveError::SessionClosed)));

    assert!(h.net.complete_handshake());
    h.step().await; // stale Connected
    assert!(h.net.is_closed(0));
    assert_eq!(h.session.state(), SessionState::Idle);

    h.step().await; // stale Opened
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(!h.mic.calls().contains(&InputCall::Start));
    assert_eq!(h.live(), LiveState::default());
}

#[tokio::test]
async fn restart_after_stale_link_uses_only_the_new_connection() {
    let mut h = harness();
    h.net.hold_handshakes();

    let first = h.start();
    h.step().await;
    wait_until(|| h.net.connect_count() == 1).await;
    let stop = h.stop();
    h.step().await;
    stop.await.unwrap();
    assert!(first.await.unwrap().is_err());

    let second = h.start();
    h.step().await;
    wait_until(|| h.net.connect_count() == 2).await;

    // The old handshake resolves first, then the new one.
    assert!(h.net.complete_handshake());
    h.step().await; // stale Connected, closed
    h.step().await; // stale Opened, dropped
    assert_eq!(h.session.state(), SessionState::Connecting);

    assert!(h.net.complete_handshake());
    h.step().await;
    second.await.unwrap().unwrap();
    h.step().await;
    assert_eq!(h.session.state(), SessionState::Open);

    assert!(h.mic.feed(&[0.0; FRAME]));
    h.step().await;
    assert!(h.net.sent(0).is_empty());
    assert_eq!(h.net.sent(1).len(), 1);
    assert!(h.net.is_closed(0));
    assert!(!h.net.is_closed(1));
}

#[tokio::test]
async fn transcript_deltas_accumulate_per_direction() {
    let mut h = harness();
    h.open().await;

    h.server(ServerEvent::InputTranscription("Hel".into())).await;
    h.server(ServerEvent::InputTranscription("lo".into())).await;
    h.server(ServerEvent::OutputTranscription("Hi".into())).await;
    h.server(ServerEvent::OutputTranscription(" there".into())).await;

    let current = h.live().current_transcription;
    assert_eq!(current.user, "Hello");
    assert_eq!(current.model, "Hi there");
}

#[tokio::test]
async fn turn_complete_reports_turn_then_clears() {
    let mut h = harness();
    h.open().await;

    h.server(ServerEvent::InputTranscription("Hello".into())).await;
    h.server(ServerEvent::OutputTranscription("Hi".into())).await;
    h.server(ServerEvent::TurnComplete).await;

    assert_eq!(
        *h.turns.lock().unwrap(),
        vec![("Hello".to_string(), "Hi".to_string())]
    );
    assert!(h.live().current_transcription.is_empty());

    h.server(ServerEvent::InputTranscription("Again".into())).await;
    assert_eq!(h.live().current_transcription.user, "Again");
}

#[tokio::test]
async fn turn_sink_sees_text_before_state_is_cleared() {
    let (transport, net) = MockTransport::new();
    let (input, _mic) = MockAudioInput::new();
    let (output, _speaker) = MockAudioOutput::new();
    let seen: Arc<Mutex<Vec<LiveState>>> = Arc::new(Mutex::new(Vec::new()));
    let state_slot: Arc<Mutex<Option<watch::Receiver<LiveState>>>> = Arc::new(Mutex::new(None));

    let sink_seen = Arc::clone(&seen);
    let sink_slot = Arc::clone(&state_slot);
    let (mut session, tx) = LiveSession::new(
        &test_config(),
        SessionParts {
            input: Box::new(input),
            output: Box::new(output),
            transport: Arc::new(transport),
            turns: Box::new(move |_: &str, _: &str| {
                if let Some(state) = sink_slot.lock().unwrap().as_ref() {
                    sink_seen.lock().unwrap().push(state.borrow().clone());
                }
            }),
        },
    );
    *state_slot.lock().unwrap() = Some(session.subscribe());

    let (reply, rx) = oneshot::channel();
    tx.send(SessionEvent::Start(reply)).unwrap();
    for _ in 0..3 {
        session.step().await;
    }
    rx.await.unwrap().unwrap();

    net.server_event(0, ServerEvent::InputTranscription("Hi".into()));
    net.server_event(0, ServerEvent::TurnComplete);
    session.step().await;
    session.step().await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].current_transcription.user, "Hi");
}

#[tokio::test]
async fn second_start_while_open_is_a_noop() {
    let mut h = harness();
    h.open().await;

    let again = h.start();
    h.step().await;
    again.await.unwrap().unwrap();

    assert_eq!(h.net.connect_count(), 1);
    assert_eq!(
        h.mic.calls().iter().filter(|c| **c == InputCall::Acquire).count(),
        1
    );
    assert_eq!(h.speaker.open_count(), 1);
    assert_eq!(h.session.state(), SessionState::Open);
}

#[tokio::test]
async fn second_start_while_connecting_is_a_noop() {
    let mut h = harness();
    h.net.hold_handshakes();

    let _first = h.start();
    h.step().await;
    let again = h.start();
    h.step().await;
    again.await.unwrap().unwrap();

    wait_until(|| h.net.connect_count() == 1).await;
    tokio::task::yield_now().await;
    assert_eq!(h.net.connect_count(), 1);
    assert!(h.live().is_connecting);
}

#[tokio::test]
async fn denied_microphone_fails_start_without_connecting() {
    let mut h = harness_with(
        test_config(),
        {
            let (input, mic) = MockAudioInput::new();
            (input.with_acquire_failure(), mic)
        },
        MockAudioOutput::new(),
    );

    let reply = h.start();
    h.step().await;

    assert!(matches!(
        reply.await.unwrap(),
        Err(LiveError::AudioPermission { .. })
    ));
    assert_eq!(h.net.connect_count(), 0);
    assert_eq!(h.speaker.open_count(), 0);
    assert_eq!(h.live(), LiveState::default());
}

#[tokio::test]
async fn unusable_microphone_stream_fails_start_without_connecting() {
    let mut h = harness_with(
        test_config(),
        {
            let (input, mic) = MockAudioInput::new();
            (input.with_stream_failure(), mic)
        },
        MockAudioOutput::new(),
    );

    let reply = h.start();
    h.step().await;

    assert!(matches!(
        reply.await.unwrap(),
        Err(LiveError::AudioCapture { .. })
    ));
    assert_eq!(h.net.connect_count(), 0);
    assert_eq!(h.mic.calls(), vec![InputCall::Acquire]);
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.live(), LiveState::default());
}

#[tokio::test]
async fn microphone_failing_to_play_after_ack_closes_the_link() {
    let mut h = harness_with(
        test_config(),
        {
            let (input, mic) = MockAudioInput::new();
            (input.with_start_failure(), mic)
        },
        MockAudioOutput::new(),
    );

    let reply = h.start();
    h.step().await; // Start
    h.step().await; // Connected
    reply.await.unwrap().unwrap();
    h.step().await; // Opened, capture fails to play

    assert_eq!(
        h.mic.calls(),
        vec![InputCall::Acquire, InputCall::Start, InputCall::Release]
    );
    assert_eq!(h.net.close_calls(0), 1);
    assert_eq!(h.speaker.close_count(), 1);
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.live(), LiveState::default());
}

#[tokio::test]
async fn output_failure_releases_microphone() {
    let mut h = harness_with(
        test_config(),
        MockAudioInput::new(),
        {
            let (output, speaker) = MockAudioOutput::new();
            (output.with_open_failure(), speaker)
        },
    );

    let reply = h.start();
    h.step().await;

    assert!(matches!(
        reply.await.unwrap(),
        Err(LiveError::AudioPlayback { .. })
    ));
    assert_eq!(h.mic.calls(), vec![InputCall::Acquire, InputCall::Release]);
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[tokio::test]
async fn failed_handshake_tears_down() {
    let mut h = harness();
    h.net.fail_next_connect("connection refused");

    let reply = h.start();
    h.step().await;
    h.step().await;

    assert!(matches!(
        reply.await.unwrap(),
        Err(LiveError::Transport { .. })
    ));
    assert_eq!(h.mic.calls(), vec![InputCall::Acquire, InputCall::Release]);
    assert_eq!(h.speaker.close_count(), 1);
    assert_eq!(h.live(), LiveState::default());
}

#[tokio::test]
async fn remote_close_tears_down() {
    let mut h = harness();
    h.open().await;
    h.server(audio(1.0)).await;
    h.server(ServerEvent::InputTranscription("partial".into())).await;

    assert!(h.net.emit(
        0,
        ChannelEvent::Closed {
            reason: Some("session expired".into())
        }
    ));
    h.step().await;

    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.live(), LiveState::default());
    assert!(h.mic.calls().ends_with(&[InputCall::Halt, InputCall::Release]));
    assert_eq!(h.speaker.close_count(), 1);
    assert_eq!(h.net.close_calls(0), 1);
}

#[tokio::test]
async fn transport_error_tears_down() {
    let mut h = harness();
    h.open().await;

    assert!(h.net.emit(0, ChannelEvent::Error("reset by peer".into())));
    h.step().await;

    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(!h.mic.is_streaming());
}

#[tokio::test]
async fn error_from_a_stopped_connection_is_ignored() {
    let mut h = harness();
    h.open().await;
    h.server(audio(1.0)).await;

    let stop = h.stop();
    h.step().await;
    stop.await.unwrap();

    assert!(h.net.emit(0, ChannelEvent::Error("reset by peer".into())));
    h.step().await; // stale error

    assert_eq!(h.net.close_calls(0), 1);
    assert_eq!(h.speaker.stop_all_count(), 1);
    assert_eq!(h.speaker.close_count(), 1);
    assert_eq!(
        h.mic.calls(),
        vec![
            InputCall::Acquire,
            InputCall::Start,
            InputCall::Halt,
            InputCall::Release
        ]
    );
    assert_eq!(h.session.state(), SessionState::Idle);

    h.open().await;
    assert_eq!(h.net.close_calls(1), 0);
    assert!(h.live().is_active);
}

#[tokio::test]
async fn microphone_waits_for_setup_acknowledgement() {
    let mut h = harness();
    h.net.manual_open();

    let reply = h.start();
    h.step().await;
    h.step().await;
    reply.await.unwrap().unwrap();

    assert_eq!(h.session.state(), SessionState::Connecting);
    assert!(h.live().is_connecting);
    assert!(!h.mic.feed(&[0.0; FRAME]), "capture must not run before open");

    assert!(h.net.open(0));
    h.step().await;
    assert_eq!(h.session.state(), SessionState::Open);
    assert!(h.mic.feed(&[0.0; FRAME]));
}

#[tokio::test]
async fn chunks_from_an_older_session_are_not_sent() {
    let mut h = harness();
    h.open().await;
    let old_generation = h.session.generation();

    let stop = h.stop();
    h.step().await;
    stop.await.unwrap();
    h.open().await;

    h.tx.send(SessionEvent::Captured {
        generation: old_generation,
        chunk: OutboundChunk::encode(&[0.0; FRAME], 16000),
    })
    .unwrap();
    h.step().await;

    assert!(h.net.sent(0).is_empty());
    assert!(h.net.sent(1).is_empty());
}

#[tokio::test]
async fn undecodable_audio_is_dropped() {
    let mut h = harness();
    h.open().await;

    h.server(ServerEvent::Audio("%%% not base64 %%%".into())).await;
    h.server(ServerEvent::Audio("AA==".into())).await; // odd byte count
    assert!(h.speaker.played().is_empty());
    assert_eq!(h.session.state(), SessionState::Open);

    h.server(audio(0.1)).await;
    assert_eq!(h.speaker.played().len(), 1);
    assert_eq!(h.speaker.played()[0].start_at, 0.0);
}

#[tokio::test]
async fn interruption_silences_queued_audio() {
    let mut h = harness();
    h.open().await;
    h.server(audio(1.0)).await;
    h.server(audio(1.0)).await;

    h.speaker.advance_to(0.3);
    h.server(ServerEvent::Interrupted).await;

    assert_eq!(h.speaker.stop_all_count(), 1);
    assert!(!h.live().is_model_speaking);

    h.server(audio(0.5)).await;
    let played = h.speaker.played();
    assert!((played[2].start_at - 0.3).abs() < 1e-9);
}

#[tokio::test]
async fn interruption_can_be_ignored_by_config() {
    let mut config = test_config();
    config.session.stop_playback_on_interrupt = false;
    let mut h = harness_with(config, MockAudioInput::new(), MockAudioOutput::new());
    h.open().await;
    h.server(audio(1.0)).await;

    h.server(ServerEvent::Interrupted).await;

    assert_eq!(h.speaker.stop_all_count(), 0);
    assert!(h.live().is_model_speaking);
}

#[tokio::test]
async fn new_session_starts_with_fresh_cursor_and_transcript() {
    let mut h = harness();
    h.open().await;
    h.speaker.advance_to(5.0);
    h.server(audio(2.0)).await;
    h.server(ServerEvent::InputTranscription("leftover".into())).await;

    let stop = h.stop();
    h.step().await;
    stop.await.unwrap();
    h.open().await;

    assert!(h.live().current_transcription.is_empty());
    h.server(audio(0.1)).await;
    assert_eq!(h.speaker.played().last().unwrap().start_at, 0.0);
}

#[tokio::test]
async fn voice_chat_end_to_end() {
    let (input, mic) = MockAudioInput::new();
    let (output, speaker) = MockAudioOutput::new();
    let (transport, net) = MockTransport::new();
    let turns: TurnLog = Arc::new(Mutex::new(Vec::new()));
    let sink_turns = Arc::clone(&turns);

    let chat = VoiceChat::spawn(
        &test_config(),
        SessionParts {
            input: Box::new(input),
            output: Box::new(output),
            transport: Arc::new(transport),
            turns: Box::new(move |user: &str, model: &str| {
                sink_turns
                    .lock()
                    .unwrap()
                    .push((user.to_string(), model.to_string()));
            }),
        },
    );

    chat.start_session().await.unwrap();
    let mut state = chat.subscribe();
    tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| s.is_active))
        .await
        .unwrap()
        .unwrap();

    assert!(mic.feed(&[0.2; FRAME]));
    wait_until(|| net.sent(0).len() == 1).await;

    net.server_event(0, ServerEvent::InputTranscription("Add a border".into()));
    net.server_event(0, audio(0.5));
    tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| s.is_model_speaking))
        .await
        .unwrap()
        .unwrap();

    net.server_event(0, ServerEvent::OutputTranscription("Done".into()));
    net.server_event(0, ServerEvent::TurnComplete);
    wait_until(|| turns.lock().unwrap().len() == 1).await;
    assert_eq!(
        turns.lock().unwrap()[0],
        ("Add a border".to_string(), "Done".to_string())
    );

    speaker.advance_to(1.0);
    tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| !s.is_model_speaking))
        .await
        .unwrap()
        .unwrap();

    chat.stop_session().await;
    assert_eq!(chat.state(), LiveState::default());
    assert!(net.is_closed(0));
    chat.shutdown().await;
    assert!(!speaker.is_open());
}
