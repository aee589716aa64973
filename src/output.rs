//! Terminal rendering for the talk command.
//!
//! Live state goes to stderr on a single rewritten line; finished turns go to
//! stdout so they can be piped or saved.

use crate::chat::{ChatMessage, Sender};
use crate::live::state::LiveState;

const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const MAGENTA: &str = "\x1b[35m";
const RESET: &str = "\x1b[0m";

/// Partial transcription shown on the live line is cut to this many chars.
const LIVE_TEXT_WIDTH: usize = 60;

/// Clear the current terminal line (replaces the live status line)
pub fn clear_line() {
    eprint!("\r\x1b[2K");
}

/// Keep the last `max` characters of `text`, prefixed with an ellipsis when cut.
fn tail(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let kept: String = text.chars().skip(count - max.saturating_sub(1)).collect();
    format!("…{}", kept)
}

/// Short status label for the session.
pub fn status_label(state: &LiveState) -> &'static str {
    if state.is_connecting {
        "connecting"
    } else if !state.is_active {
        "idle"
    } else if state.is_model_speaking {
        "speaking"
    } else {
        "listening"
    }
}

/// One-line rendering of the live state, without color.
pub fn format_live_line(state: &LiveState) -> String {
    let mut line = format!("[{}]", status_label(state));
    let current = &state.current_transcription;
    if !current.user.is_empty() {
        line.push_str(&format!(" you: {}", tail(current.user.trim(), LIVE_TEXT_WIDTH)));
    }
    if !current.model.is_empty() {
        line.push_str(&format!(" bot: {}", tail(current.model.trim(), LIVE_TEXT_WIDTH)));
    }
    line
}

/// Redraw the live status line on stderr.
pub fn render_live(state: &LiveState) {
    let color = if state.is_model_speaking {
        MAGENTA
    } else if state.is_active {
        GREEN
    } else {
        YELLOW
    };
    clear_line();
    eprint!("{color}{}{RESET}", format_live_line(state));
}

fn speaker(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "You",
        Sender::Bot => "PapayaBot",
        Sender::System => "System",
    }
}

/// Print one conversation message to stdout.
pub fn print_message(message: &ChatMessage) {
    match message.sender {
        Sender::System => println!("{DIM}{}: {}{RESET}", speaker(message.sender), message.text),
        sender => println!("{}: {}", speaker(sender), message.text),
    }
}
