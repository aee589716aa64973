use anyhow::Result;
use clap::Parser;
use owo_colors::OwoColorize;
use papaya_voice::app::run_talk_command;
use papaya_voice::audio::device::{list_input_devices, list_output_devices};
use papaya_voice::cli::{Cli, Commands, ConfigAction};
use papaya_voice::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);
    tracing::debug!("papaya-voice {}", papaya_voice::version_string());

    match cli.command {
        None => {
            let config = load_config(cli.config.as_deref())?;
            run_talk_command(config, cli.talk, cli.quiet).await?;
        }
        Some(Commands::Talk { args }) => {
            let config = load_config(cli.config.as_deref())?;
            run_talk_command(config, args, cli.quiet).await?;
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
    }

    Ok(())
}

/// Route library logs to stderr.
///
/// `RUST_LOG` wins when set; otherwise `-v` picks debug and `-vv` trace for
/// this crate, with warnings only in quiet mode.
fn init_tracing(quiet: bool, verbosity: u8) {
    let level = match (quiet, verbosity) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "papaya_voice=debug,warn",
        (false, _) => "papaya_voice=trace,info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/papaya-voice/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides())
}

/// List available audio input and output devices.
fn list_audio_devices() -> Result<()> {
    let inputs = list_input_devices()?;
    let outputs = list_output_devices()?;

    if inputs.is_empty() && outputs.is_empty() {
        eprintln!("No audio devices found");
        std::process::exit(1);
    }

    println!("{}", "Input devices:".bold());
    for (idx, device) in inputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }
    println!("{}", "Output devices:".bold());
    for (idx, device) in outputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&std::path::Path>,
) -> Result<()> {
    let config_path = custom_path
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            if let Err(e) = config.validate() {
                eprintln!("{} {}", "Warning:".yellow(), e);
            }
            print!("{}", config.to_display_toml()?);
        }
        ConfigAction::Path => {
            let exists = config_path.exists();
            println!("{}", config_path.display());
            if !exists {
                eprintln!("{}", "(file does not exist, using defaults)".dimmed());
            }
        }
    }

    Ok(())
}
