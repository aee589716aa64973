//! Command-line interface for papaya-voice
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Realtime voice support chat for Papaya Stickers
#[derive(Parser, Debug)]
#[command(
    name = "papaya-voice",
    version,
    about = "Realtime voice support chat for Papaya Stickers"
)]
pub struct Cli {
    /// Subcommand to execute (default: talk)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress status output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug logs, -vv: trace logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(flatten)]
    pub talk: TalkArgs,
}

/// Options for a voice session
#[derive(clap::Args, Debug, Clone, Default)]
pub struct TalkArgs {
    /// Microphone device name
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Output device name
    #[arg(long, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Prebuilt voice the model answers with (e.g. Zephyr, Puck, Kore)
    #[arg(long, value_name = "VOICE")]
    pub voice: Option<String>,

    /// Live model name
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// End the session after this long. Examples: 90s, 5m, 1h30m
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub max_duration: Option<Duration>,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Talk to the support bot (default)
    Talk {
        #[command(flatten)]
        args: TalkArgs,
    },

    /// List available audio input and output devices
    Devices,

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (API key masked)
    Show,

    /// Print the configuration file path
    Path,
}
