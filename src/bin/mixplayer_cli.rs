use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mixplayer::engine::{AudioBackend, CpalBackend, StubBackend, StubConfig};
use mixplayer::error::PlayerErrorCodes;
use mixplayer::{
    AppConfig, MixPlayer, MixerDeviceList, MixerSettings, PlayerEvent, PlayerOptions, PlayerState,
    RecorderState,
};

#[derive(Parser, Debug)]
#[command(name = "mixplayer_cli", about = "Multi-track mixing engine harness")]
struct Cli {
    /// Engine configuration JSON (defaults to assets/mixplayer_config.json)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Settings JSON applied before anything else
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Use the virtual device backend instead of the system audio host
    #[arg(long)]
    stub: bool,
    /// Virtual device clock multiple (with --stub)
    #[arg(long, default_value_t = 1.0)]
    stub_speed: f64,
    /// Log level: error, warn, info, debug, trace
    #[arg(long, default_value = "warn")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the device list as JSON
    Devices,
    /// Play a session, printing events as JSON lines until it completes
    Play {
        #[arg(long)]
        session: PathBuf,
    },
    /// Render a session offline to a WAV file
    Render {
        #[arg(long)]
        session: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Record the selected input to a WAV file
    Record {
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = 5.0)]
        seconds: f64,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let level = cli
        .log
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();

    let config = cli
        .config
        .as_ref()
        .map(AppConfig::load_from_file)
        .unwrap_or_else(AppConfig::load);
    let settings = match &cli.settings {
        Some(path) => MixerSettings::from_json(&read(path)?)?,
        None => MixerSettings::default(),
    };
    let backend: Arc<dyn AudioBackend> = if cli.stub {
        Arc::new(StubBackend::new(StubConfig {
            speed: cli.stub_speed,
            ..StubConfig::default()
        }))
    } else {
        Arc::new(CpalBackend::new())
    };

    let base = |record: bool, play: bool| {
        PlayerOptions::new(record, play)
            .with_config(config.clone())
            .with_settings(settings.clone())
            .with_backend(Arc::clone(&backend))
    };

    match cli.command {
        Commands::Devices => run_devices(backend.as_ref()),
        Commands::Play { session } => run_play(base(false, true), &session),
        Commands::Render { session, output } => run_render(base(false, true), &session, &output),
        Commands::Record { output, seconds } => run_record(base(true, false), &output, seconds),
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

/// Start a player and route its events into a channel.
fn start(options: PlayerOptions) -> Result<(MixPlayer, mpsc::Receiver<PlayerEvent>)> {
    let player = MixPlayer::new(options)?;
    let (tx, rx) = mpsc::channel();
    player.add_listener(
        None,
        Arc::new(move |event: &PlayerEvent| {
            let _ = tx.send(event.clone());
        }),
    );
    Ok((player, rx))
}

fn wait_for<F>(
    rx: &mpsc::Receiver<PlayerEvent>,
    timeout: Duration,
    mut done: F,
) -> Result<PlayerEvent>
where
    F: FnMut(&PlayerEvent) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = rx
            .recv_timeout(remaining)
            .context("timed out waiting for the engine")?;
        if let PlayerEvent::Error { code, message } = &event {
            eprintln!("engine error {}: {}", code, message);
        }
        if done(&event) {
            return Ok(event);
        }
    }
}

fn run_devices(backend: &dyn AudioBackend) -> Result<ExitCode> {
    let list = MixerDeviceList::new(backend.enumerate()?);
    println!("{}", serde_json::to_string_pretty(&list)?);
    Ok(ExitCode::from(0))
}

fn load_session(
    player: &MixPlayer,
    rx: &mpsc::Receiver<PlayerEvent>,
    session: &Path,
) -> Result<()> {
    player.set_session_json(&read(session)?)?;
    let ready = wait_for(rx, Duration::from_secs(60), |e| {
        matches!(e, PlayerEvent::State(_))
            || matches!(e, PlayerEvent::Error { code, .. } if *code == PlayerErrorCodes::SESSION_INVALID)
    })?;
    if ready != PlayerEvent::State(PlayerState::Ready) {
        bail!("session was rejected");
    }
    Ok(())
}

fn run_play(options: PlayerOptions, session: &Path) -> Result<ExitCode> {
    let (player, rx) = start(options)?;
    load_session(&player, &rx, session)?;
    println!("{{\"duration\":{}}}", player.duration());
    player.play()?;

    let timeout = Duration::from_secs_f64(player.duration() * 4.0 + 10.0);
    let last = wait_for(&rx, timeout, |event| {
        if !matches!(event, PlayerEvent::DeviceList(_)) {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{}", line);
            }
        }
        matches!(
            event,
            PlayerEvent::State(PlayerState::Completed) | PlayerEvent::State(PlayerState::Error)
        )
    })?;

    player.shutdown();
    Ok(match last {
        PlayerEvent::State(PlayerState::Completed) => ExitCode::from(0),
        _ => ExitCode::from(2),
    })
}

fn run_render(options: PlayerOptions, session: &Path, output: &Path) -> Result<ExitCode> {
    let (player, rx) = start(options)?;
    load_session(&player, &rx, session)?;
    player.export(Some(output))?;

    let result = wait_for(&rx, Duration::from_secs(600), |e| {
        matches!(e, PlayerEvent::Export { .. })
    })?;
    player.shutdown();

    match result {
        PlayerEvent::Export { error: None, path } => {
            println!("rendered {} ({:.3} s)", path, player.duration());
            Ok(ExitCode::from(0))
        }
        PlayerEvent::Export { error: Some(error), .. } => {
            eprintln!("render failed: {}", error);
            Ok(ExitCode::from(2))
        }
        _ => Ok(ExitCode::from(2)),
    }
}

fn run_record(options: PlayerOptions, output: &Path, seconds: f64) -> Result<ExitCode> {
    let (player, rx) = start(options)?;
    player.prepare_recorder(output)?;
    wait_for(&rx, Duration::from_secs(5), |e| {
        matches!(e, PlayerEvent::RecorderState(RecorderState::Ready))
    })?;
    player.start_recorder()?;
    wait_for(&rx, Duration::from_secs(5), |e| {
        matches!(
            e,
            PlayerEvent::RecorderState(RecorderState::Recording)
                | PlayerEvent::RecorderState(RecorderState::Error)
        )
    })?;
    if player.recorder_state() != RecorderState::Recording {
        bail!("recorder failed to start");
    }

    let until = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    while Instant::now() < until {
        std::thread::sleep(Duration::from_millis(50));
    }
    player.stop_recorder()?;
    wait_for(&rx, Duration::from_secs(5), |e| {
        matches!(e, PlayerEvent::RecorderState(_))
    })?;

    let elapsed = player.recorder_elapsed();
    player.shutdown();
    println!("recorded {:.3} s to {}", elapsed, output.display());
    Ok(ExitCode::from(0))
}
