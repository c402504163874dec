//! Speedy - stream an audio track from a URL and adjust its position,
//! volume and speed while it plays

mod audio;
mod control;
mod error;
mod features;
mod ui;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use audio::{AudioOutput, RenderSource};
use control::{ControlSteps, Session, control_channel, load_track, spawn_input_poller, spawn_ticker};
use features::Settings;
use ui::{TerminalGuard, TerminalView};

/// Status refresh interval without user input
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "speedy")]
#[command(about = "Terminal player for remote audio with live seek, volume and speed control")]
#[command(version)]
struct Args {
    /// URL of the audio track
    #[arg(required_unless_present = "write_config")]
    url: Option<String>,

    /// Number of passes over the track (0 loops forever)
    #[arg(short, long)]
    loops: Option<u32>,

    /// Initial volume (1.0 = unchanged)
    #[arg(long, allow_negative_numbers = true)]
    volume: Option<f32>,

    /// Initial speed ratio
    #[arg(long)]
    speed: Option<f64>,

    /// Output device name
    #[arg(long)]
    device: Option<String>,

    /// Settings file to use instead of the default one
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log file (defaults to the platform data directory)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Write the effective settings to the settings file and exit
    #[arg(long)]
    write_config: bool,
}

impl Args {
    /// Command-line values take precedence over the settings file
    fn apply(&self, settings: &mut Settings) {
        if let Some(loops) = self.loops {
            settings.playback.loop_count = loops;
        }
        if let Some(volume) = self.volume {
            settings.playback.initial_gain = volume;
        }
        if let Some(speed) = self.speed {
            settings.playback.initial_speed = speed;
        }
        if let Some(device) = &self.device {
            settings.audio.output_device = Some(device.clone());
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    if let Some(path) = args.log_file.clone().or_else(Settings::default_log_path) {
        init_logging(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
    }
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Speedy");

    let mut settings = match &args.config {
        // --write-config may create the file
        Some(path) if args.write_config && !path.exists() => Settings::default(),
        Some(path) => Settings::load_from_file(path)?,
        None => Settings::load()?,
    };
    args.apply(&mut settings);
    settings.validate().context("invalid command-line value")?;

    if args.write_config {
        let path = match &args.config {
            Some(path) => {
                settings.save_to_file(path)?;
                path.clone()
            }
            None => settings.save()?,
        };
        println!("Settings written to {}", path.display());
        return Ok(());
    }

    let url = args.url.context("no URL given")?;
    for action in settings.keybindings.unbound() {
        warn!(action = action.display_name(), "Action has no key binding");
    }

    println!("Please wait...");
    let graph = load_track(&url, &settings).context("failed to load track")?;
    let output = AudioOutput::open(
        settings.audio.output_device.as_deref(),
        RenderSource::new(graph.clone()),
    )?;

    let mut session = Session::new(
        graph,
        settings.keybindings.clone(),
        ControlSteps::from_settings(&settings.playback),
    );
    let (events_tx, mut events_rx) = control_channel();

    {
        let _terminal = TerminalGuard::enter()?;
        spawn_input_poller(events_tx.clone())?;
        spawn_ticker(events_tx, TICK_INTERVAL)?;

        let mut view = TerminalView::new(std::io::stdout(), &settings.keybindings);
        session.run(&mut events_rx, &mut view)?;
    }

    drop(output);
    info!("Speedy exiting");
    Ok(())
}

/// Send tracing output to `path`; the terminal belongs to the status view
fn init_logging(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}
