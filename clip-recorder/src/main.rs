mod commands;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use clap::{Args, Parser, Subcommand};
use clip_capture_core::storage::metadata::read_metadata;
use clip_capture_core::{
    inspect_avi, AudioSource, CaptureError, ChannelDelegate, ClipContainer, ClipRecorder, ClipSession,
    RecorderConfig, RecorderEvent, RecorderStatus,
};
use clip_capture_desktop::{list_input_devices, list_monitors, list_output_devices, CpalAudioSource, ScreenFrameSource};
use commands::{parse_command, Command, HELP};

/// clip-recorder: keep the last few seconds of your screen and save them on demand
#[derive(Parser)]
#[command(name = "clip-recorder")]
#[command(version, about = "Instant-replay screen recorder")]
#[command(args_conflicts_with_subcommands = true)]
#[command(after_help = "EXAMPLES:
    # Keep the last 30 seconds of the primary monitor with microphone audio
    clip-recorder --retention 30 --mic

    # Record the second monitor to MP4 (needs ffmpeg on PATH)
    clip-recorder run --monitor 1 --container mp4

    # Summarise an exported clip
    clip-recorder inspect recordings/clip_20240101_120000.avi

While running, type 'save' and press Enter to write a clip. Type 'help' for more.")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Start capturing and accept commands on stdin (the default)
    Run(RunArgs),

    /// Print a summary of an exported AVI clip and its metadata sidecar
    Inspect {
        /// Clip to inspect
        file: PathBuf,
    },

    /// List monitors and audio devices
    Devices,
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    /// JSON config file; flags below override its values
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Directory clips are written to
    #[arg(long, short = 'o')]
    output_dir: Option<PathBuf>,

    /// Capture rate in frames per second (1-60)
    #[arg(long, value_parser = parse_fps)]
    fps: Option<u32>,

    /// Stored resolution as WIDTHxHEIGHT (e.g. 1280x720)
    #[arg(long, short = 'r', value_parser = parse_resolution)]
    resolution: Option<(u32, u32)>,

    /// Seconds of history to keep (5-60)
    #[arg(long, short = 't')]
    retention: Option<u32>,

    /// Record the default microphone
    #[arg(long)]
    mic: bool,

    /// Record system audio (loopback of the default output device)
    #[arg(long)]
    system_audio: bool,

    /// Output container: avi or mp4
    #[arg(long, value_parser = parse_container)]
    container: Option<ClipContainer>,

    /// Monitor index from `clip-recorder devices` (default: primary)
    #[arg(long, short = 'm')]
    monitor: Option<usize>,
}

/// Parse and validate resolution (WIDTHxHEIGHT format)
fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let Some((w, h)) = s.split_once(['x', 'X']) else {
        return Err(format!("invalid resolution '{}', use WIDTHxHEIGHT (e.g. 1280x720)", s));
    };
    let width: u32 = w.parse().map_err(|_| format!("invalid width '{}' in resolution", w))?;
    let height: u32 = h.parse().map_err(|_| format!("invalid height '{}' in resolution", h))?;
    if width == 0 || height == 0 {
        return Err("resolution width and height must be greater than 0".into());
    }
    Ok((width, height))
}

fn parse_fps(s: &str) -> Result<u32, String> {
    let fps: u32 = s.parse().map_err(|_| format!("'{}' is not a valid frame rate", s))?;
    if !(1..=60).contains(&fps) {
        return Err(format!("frame rate must be between 1 and 60, got {}", fps));
    }
    Ok(fps)
}

fn parse_container(s: &str) -> Result<ClipContainer, String> {
    match s.to_ascii_lowercase().as_str() {
        "avi" => Ok(ClipContainer::Avi),
        "mp4" => Ok(ClipContainer::Mp4),
        other => Err(format!("unknown container '{}', expected avi or mp4", other)),
    }
}

/// Merge settings: CLI args > config file > built-in defaults.
fn build_config(args: &RunArgs) -> Result<RecorderConfig, CaptureError> {
    let mut config = match args.config {
        Some(ref path) => RecorderConfig::from_json_file(path)?,
        None => RecorderConfig::default(),
    };
    if let Some(ref dir) = args.output_dir {
        config.output_directory = dir.clone();
    }
    if let Some(fps) = args.fps {
        config.video.fps = fps;
    }
    if let Some((width, height)) = args.resolution {
        config.video.width = width;
        config.video.height = height;
    }
    if let Some(secs) = args.retention {
        config.retention_secs = secs;
    }
    if let Some(container) = args.container {
        config.container = container;
    }
    config.enable_microphone |= args.mic;
    config.enable_system_audio |= args.system_audio;
    config.validate().map_err(CaptureError::ConfigurationFailed)?;
    Ok(config)
}

/// Events the main loop waits on.
enum Input {
    Line(String),
    StdinClosed,
    Interrupted,
}

fn run(args: RunArgs) -> Result<(), CaptureError> {
    let config = build_config(&args)?;

    let screen = match args.monitor {
        Some(index) => ScreenFrameSource::monitor(index),
        None => ScreenFrameSource::primary(),
    };
    let microphone: Box<dyn AudioSource> = Box::new(CpalAudioSource::microphone());
    let system_audio: Box<dyn AudioSource> = Box::new(CpalAudioSource::system_loopback());

    log::info!(
        "Keeping the last {} s of {}x{} @ {} fps, saving {} clips to {}",
        config.retention_secs,
        config.video.width,
        config.video.height,
        config.video.fps,
        config.container.extension(),
        config.output_directory.display()
    );

    let mut session = ClipSession::new(config, Box::new(screen), Some(microphone), Some(system_audio))?;
    let (delegate, events) = ChannelDelegate::new();
    session.set_delegate(Arc::new(delegate));

    let printer = thread::Builder::new()
        .name("clip-events".into())
        .spawn(move || print_events(events))
        .map_err(|e| CaptureError::Unknown(format!("failed to spawn event thread: {}", e)))?;

    let (input_tx, input_rx) = mpsc::channel();
    spawn_stdin_reader(input_tx.clone())?;
    let interrupt_tx = input_tx;
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(Input::Interrupted);
    })
    .map_err(|e| CaptureError::Unknown(format!("failed to install Ctrl+C handler: {}", e)))?;

    let mut recorder = ClipRecorder::spawn(session)?;
    recorder.start()?;
    println!("Recording. Type 'save' to write a clip, 'help' for commands, Ctrl+C to quit.");

    command_loop(&recorder, &input_rx);

    println!("Shutting down...");
    recorder.shutdown();
    drop(recorder);
    if printer.join().is_err() {
        log::error!("event thread panicked");
    }
    Ok(())
}

fn spawn_stdin_reader(sender: Sender<Input>) -> Result<(), CaptureError> {
    thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if sender.send(Input::Line(line)).is_err() {
                    return;
                }
            }
            let _ = sender.send(Input::StdinClosed);
        })
        .map(|_| ())
        .map_err(|e| CaptureError::Unknown(format!("failed to spawn stdin thread: {}", e)))
}

fn command_loop(recorder: &ClipRecorder, input: &Receiver<Input>) {
    for event in input.iter() {
        let line = match event {
            Input::Line(line) => line,
            Input::StdinClosed => {
                log::info!("stdin closed; press Ctrl+C to stop recording");
                continue;
            }
            Input::Interrupted => {
                eprintln!("\nReceived Ctrl+C");
                return;
            }
        };

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{}", message);
                continue;
            }
        };

        let sent = match command {
            Command::Save => recorder.trigger_export(),
            Command::Start => recorder.start(),
            Command::Stop => recorder.stop(),
            Command::Retention(secs) => recorder.set_retention(secs),
            Command::Audio {
                microphone,
                system_audio,
            } => recorder.set_audio(microphone, system_audio),
            Command::Status => recorder.status().map(|status| print_status(&status)),
            Command::Help => {
                println!("{}", HELP);
                Ok(())
            }
            Command::Quit => return,
        };
        if let Err(e) = sent {
            eprintln!("error: {}", e);
            return;
        }
    }
}

fn print_events(events: Receiver<RecorderEvent>) {
    for event in events.iter() {
        match event {
            RecorderEvent::StateChanged(state) => println!("[{}]", state.label()),
            RecorderEvent::Error(e) => eprintln!("error: {}", e),
            RecorderEvent::ExportFinished(Ok(result)) => println!(
                "saved {} ({} frames, {:.1} s)",
                result.file_path.display(),
                result.frame_count,
                result.duration_secs
            ),
            RecorderEvent::ExportFinished(Err(e)) => eprintln!("save failed: {}", e),
        }
    }
}

fn print_status(status: &RecorderStatus) {
    let audio = match (status.microphone, status.system_audio) {
        (false, false) => "off",
        (true, false) => "mic",
        (false, true) => "system",
        (true, true) => "mic + system",
    };
    println!(
        "{} | {}/{} frames buffered ({} s window) | audio: {}",
        status.state.label(),
        status.buffered_frames,
        status.capacity,
        status.retention_secs,
        audio
    );
    if status.microphone || status.system_audio {
        println!("level: rms {:.3}, peak {:.3}", status.levels.rms, status.levels.peak);
    }
}

fn inspect(path: &Path) -> Result<(), String> {
    let info = inspect_avi(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    println!("{}", path.display());
    println!("  video:    {}x{} @ {:.2} fps", info.width, info.height, info.fps);
    println!("  frames:   {} ({:.2} s)", info.video_chunks, info.duration_secs());
    println!("  streams:  {}", info.streams);
    match (info.audio.as_ref(), info.audio_duration_secs()) {
        (Some(audio), Some(secs)) => println!(
            "  audio:    {} Hz, {} ch, {}-bit, {} bytes ({:.2} s)",
            audio.sample_rate, audio.channels, audio.bit_depth, info.audio_bytes, secs
        ),
        _ => println!("  audio:    none"),
    }
    println!("  index:    {}", if info.has_index { "yes" } else { "missing" });

    match read_metadata(path) {
        Ok(metadata) => {
            let json = serde_json::to_string_pretty(&metadata).map_err(|e| e.to_string())?;
            println!("metadata:\n{}", json);
        }
        Err(e) => log::debug!("no metadata sidecar: {}", e),
    }
    Ok(())
}

fn devices() {
    println!("Monitors:");
    match list_monitors() {
        Ok(monitors) => {
            for m in monitors {
                let primary = if m.is_primary { " (primary)" } else { "" };
                println!("  [{}] {} {}x{}{}", m.index, m.name, m.width, m.height, primary);
            }
        }
        Err(e) => eprintln!("  error: {}", e),
    }

    for (title, listing) in [
        ("Microphones:", list_input_devices()),
        ("Outputs (system audio):", list_output_devices()),
    ] {
        println!("{}", title);
        match listing {
            Ok(devices) => {
                for d in devices {
                    let default = if d.is_default { " (default)" } else { "" };
                    println!("  {}{}", d.name, default);
                }
            }
            Err(e) => eprintln!("  error: {}", e),
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        None => run(cli.run).map_err(|e| e.to_string()),
        Some(Commands::Run(args)) => run(args).map_err(|e| e.to_string()),
        Some(Commands::Inspect { file }) => inspect(&file),
        Some(Commands::Devices) => {
            devices();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}
