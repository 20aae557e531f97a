mod device;

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sensory_sketchpad_core::{
    AppConfig, AudioHost, Clock, FileStorage, Notice, OfflineHost, Point, Session, SketchpadError,
    SystemClock, TextSurface,
};
use tracing_subscriber::EnvFilter;

use crate::device::DeviceHost;

const DEFAULT_STORAGE_DIR: &str = ".sketchpad";
const CANVAS_WIDTH: u32 = 800;
const CANVAS_HEIGHT: u32 = 600;
/// Silence queued ahead of the first block so rendering never trails the device.
const OUTPUT_LEAD: f64 = 0.1;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> sensory_sketchpad_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(cli.config.as_deref())?;
    let clock: Rc<dyn Clock> = Rc::new(SystemClock::start());

    // Only playback needs the output device.
    let device = match &cli.command {
        Commands::Play { silent: false, .. } => {
            Some(DeviceHost::new(config.audio.sample_rate, clock.clone()))
        }
        _ => None,
    };
    let offline = OfflineHost::new(config.audio.sample_rate, clock.clone());
    let host: &dyn AudioHost = match &device {
        Some(device) => device,
        None => &offline,
    };

    let mut session = open_session(config, clock, host);
    report(&mut session);

    let outcome = run(&mut session, device.as_ref(), cli.command);
    report(&mut session);
    session.shutdown();
    outcome
}

fn open_session(
    config: AppConfig,
    clock: Rc<dyn Clock>,
    host: &dyn AudioHost,
) -> Session<TextSurface> {
    let storage_dir = config
        .stack
        .storage_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
    tracing::debug!(?storage_dir, "opening stack storage");

    Session::new(
        config,
        clock,
        host,
        Box::new(FileStorage::new(storage_dir)),
        TextSurface::new(CANVAS_WIDTH, CANVAS_HEIGHT, 80, 24),
    )
}

fn run(
    session: &mut Session<TextSurface>,
    device: Option<&DeviceHost>,
    command: Commands,
) -> sensory_sketchpad_core::Result<()> {
    match command {
        Commands::List => {
            list(session);
            Ok(())
        }
        Commands::Instruments => {
            for info in session.instruments() {
                println!("{:<8} {:<8} {}", info.id, info.name, info.description);
            }
            Ok(())
        }
        Commands::Add { points, name } => add(session, &points, name.as_deref()),
        Commands::Remove { id } => check(session.remove_entry(&id), || {
            format!("no canvas with id {id}")
        }),
        Commands::Rename { id, name } => check(session.rename_entry(&id, &name), || {
            format!("could not rename {id}: names must be 1 to 50 characters")
        }),
        Commands::Move { id, index } => check(session.move_entry(&id, index), || {
            format!("could not move {id} to position {index}")
        }),
        Commands::Activate { id } => check(session.select_entry(&id), || {
            format!("no canvas with id {id}")
        }),
        Commands::Duration { id, seconds } => {
            check(session.set_entry_duration(&id, seconds), || {
                format!("could not set the duration of {id} to {seconds}")
            })
        }
        Commands::Clear => {
            session.clear_stack();
            tracing::info!("stack cleared");
            Ok(())
        }
        Commands::Play {
            speed, instrument, ..
        } => play(session, device, speed, instrument.as_deref()),
    }
}

fn check(ok: bool, message: impl FnOnce() -> String) -> sensory_sketchpad_core::Result<()> {
    if ok {
        Ok(())
    } else {
        Err(SketchpadError::msg(message()))
    }
}

fn list(session: &Session<TextSurface>) {
    for entry in session.store().ordered_sequence() {
        let marker = if entry.is_active { '*' } else { ' ' };
        println!(
            "{marker} {:>2}. {:<24} {:>5.1}s {:>5} points  {}",
            entry.stack_order,
            entry.name,
            entry.duration,
            entry.data.len(),
            entry.id
        );
    }
    let summary = session.stack_summary();
    println!(
        "{} canvas(es), {:.1}s total",
        summary.size, summary.total_duration
    );
}

fn add(
    session: &mut Session<TextSurface>,
    path: &Path,
    name: Option<&str>,
) -> sensory_sketchpad_core::Result<()> {
    let raw = std::fs::read_to_string(path)?;
    let points: Vec<Point> = serde_json::from_str(&raw)?;
    tracing::info!(?path, points = points.len(), "loading drawing");

    session.load_drawing(&points);
    if let Some(entry) = session.add_drawing_to_stack(name) {
        println!("{}", entry.id);
    }
    Ok(())
}

fn play(
    session: &mut Session<TextSurface>,
    device: Option<&DeviceHost>,
    speed: Option<f64>,
    instrument: Option<&str>,
) -> sensory_sketchpad_core::Result<()> {
    if let Some(speed) = speed {
        check(session.set_speed(speed), || format!("invalid speed {speed}"))?;
    }
    if let Some(id) = instrument {
        check(session.set_instrument(id), || format!("unknown instrument {id}"))?;
    }
    if !session.play_stack() {
        return Ok(());
    }

    let sample_rate = session.config().audio.sample_rate as f64;
    let interval = Duration::from_millis(session.config().playback.progress_interval_ms.max(1));
    let device = device.filter(|device| device.is_open());
    if let Some(device) = device {
        device.push(&vec![0.0; (OUTPUT_LEAD * sample_rate) as usize]);
    }

    let mut rendered = 0.0;
    let mut block = Vec::new();
    let mut peak = 0.0_f32;
    let mut shown = None;

    while session.scheduler().is_playing() {
        std::thread::sleep(interval);
        session.tick();

        let samples = ((session.now() - rendered) * sample_rate).max(0.0) as usize;
        block.resize(samples, 0.0);
        session.render_audio(&mut block);
        if let Some(device) = device {
            device.push(&block);
        }
        rendered += samples as f64 / sample_rate;
        peak = block.iter().fold(peak, |acc, s| acc.max(s.abs()));

        let state = session.playback_state();
        if state.is_playing && shown != state.current_canvas_id {
            shown = state.current_canvas_id.clone();
            tracing::info!(
                index = state.current_canvas_index,
                id = ?shown,
                progress = state.progress,
                "now playing"
            );
            println!("{}\n", session.surface().render_text());
        }
    }

    if let Some(device) = device {
        device.drain(DRAIN_TIMEOUT);
    }
    tracing::info!(peak, seconds = rendered, audible = device.is_some(), "playback finished");
    Ok(())
}

fn report(session: &mut Session<TextSurface>) {
    for Notice { level, message } in session.take_notices() {
        println!("[{level:?}] {message}");
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Draw with colors, hear the music", long_about = None)]
struct Cli {
    /// Optional JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the stack in playback order.
    List,
    /// Show the available instruments.
    Instruments,
    /// Add a drawing to the end of the stack.
    Add {
        /// JSON array of points.
        #[arg(short, long)]
        points: PathBuf,
        #[arg(short, long)]
        name: Option<String>,
    },
    Remove {
        id: String,
    },
    Rename {
        id: String,
        name: String,
    },
    /// Move a canvas to a new zero-based position.
    Move {
        id: String,
        index: usize,
    },
    /// Make a canvas the active one.
    Activate {
        id: String,
    },
    /// Set how many seconds a canvas plays for.
    Duration {
        id: String,
        seconds: f64,
    },
    /// Remove every canvas from the stack.
    Clear,
    /// Play the whole stack in order.
    Play {
        /// Multiplier applied to playback speed.
        #[arg(short, long)]
        speed: Option<f64>,
        #[arg(short, long)]
        instrument: Option<String>,
        /// Render without opening the audio device.
        #[arg(long)]
        silent: bool,
    },
}
