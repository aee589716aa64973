//! Talk command: run one voice support session on the default devices.
//!
//! Wires the cpal microphone and speaker, the websocket transport and a
//! conversation log to a [`VoiceChat`], then renders live state until the user
//! presses Ctrl+C, the time limit expires or the service ends the session.

use crate::audio::device::{CpalInput, CpalOutput};
use crate::chat::Conversation;
use crate::cli::TalkArgs;
use crate::config::Config;
use crate::error::Result;
use crate::live::transcript::{ChannelTurnSink, Turn};
use crate::live::{SessionParts, VoiceChat, WebSocketTransport};
use crate::output::{clear_line, print_message, render_live};
use std::sync::Arc;

/// Apply CLI overrides on top of the loaded configuration.
pub fn apply_talk_overrides(config: &mut Config, args: &TalkArgs) {
    if let Some(device) = &args.device {
        config.audio.input_device = Some(device.clone());
    }
    if let Some(device) = &args.output_device {
        config.audio.output_device = Some(device.clone());
    }
    if let Some(voice) = &args.voice {
        config.session.voice = voice.clone();
    }
    if let Some(model) = &args.model {
        config.session.model = model.clone();
    }
}

/// Run the talk command.
///
/// # Arguments
/// * `config` - Base configuration (overridden by CLI args)
/// * `args` - Device, voice, model and duration overrides
/// * `quiet` - Suppress status messages and the live line
pub async fn run_talk_command(mut config: Config, args: TalkArgs, quiet: bool) -> Result<()> {
    apply_talk_overrides(&mut config, &args);
    config.validate()?;
    let transport = WebSocketTransport::from_config(&config)?;

    let (turns, mut turn_rx) = ChannelTurnSink::new();
    let chat = VoiceChat::spawn(
        &config,
        SessionParts {
            input: Box::new(CpalInput::new(
                config.audio.input_device.as_deref(),
                config.audio.input_sample_rate,
            )),
            output: Box::new(CpalOutput::new(config.audio.output_device.as_deref())),
            transport: Arc::new(transport),
            turns: Box::new(turns),
        },
    );

    let mut conversation = Conversation::new();
    if !quiet {
        for message in conversation.messages() {
            print_message(message);
        }
        eprintln!("Connecting to {}...", config.session.model);
    }

    if let Err(e) = chat.start_session().await {
        note(&mut conversation, &format!("Connection error: {}", e), quiet);
        chat.shutdown().await;
        return Err(e);
    }
    if !quiet {
        eprintln!("Connected. Speak to PapayaBot, Ctrl+C to hang up.");
    }

    let mut state_rx = chat.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let max_duration = args.max_duration;
    let deadline = async move {
        match max_duration {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                break;
            }
            _ = &mut deadline => {
                tracing::info!("Session time limit reached");
                break;
            }
            Some(turn) = turn_rx.recv() => {
                record_turn(&mut conversation, turn, quiet);
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                if !state.is_active && !state.is_connecting {
                    note(&mut conversation, "Session ended by the service.", quiet);
                    break;
                }
                if !quiet {
                    render_live(&state);
                }
            }
        }
    }

    if !quiet {
        clear_line();
        eprintln!("Hanging up...");
    }
    chat.shutdown().await;
    while let Ok(turn) = turn_rx.try_recv() {
        record_turn(&mut conversation, turn, quiet);
    }

    if !quiet {
        eprintln!("{} turn(s) recorded.", conversation.turn_count());
    }
    Ok(())
}

/// Record a status line in the conversation and show it.
fn note(conversation: &mut Conversation, text: &str, quiet: bool) {
    conversation.push_system(text);
    if quiet {
        return;
    }
    clear_line();
    if let Some(message) = conversation.messages().last() {
        print_message(message);
    }
}

fn record_turn(conversation: &mut Conversation, turn: Turn, quiet: bool) {
    if !conversation.record_turn(&turn.user, &turn.model) {
        tracing::debug!("Skipping turn without user speech");
        return;
    }
    if !quiet {
        clear_line();
    }
    let recorded = conversation.messages();
    for message in &recorded[recorded.len().saturating_sub(2)..] {
        print_message(message);
    }
}
