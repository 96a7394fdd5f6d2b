//! opencap recorder CLI
//!
//! Records the screen plus selected audio inputs through an external
//! encoder. While recording, stdin accepts `m <index>` to switch monitors
//! and `q` to stop; Ctrl+C stops and saves as well.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use opencap_recorder::capture::resolve_monitor;
use opencap_recorder::logging;
use opencap_recorder::{
    create_capture_backend, create_controller_channels, CaptureBackend, CaptureConfiguration,
    CaptureError, Config, Container, ControllerCommand, ControllerHandle, ControllerSettings,
    ControllerStatus, DeviceSelection, FrameRate, Region, RecordingController, VideoCodec,
};

#[derive(Parser)]
#[command(name = "opencap-recorder")]
#[command(about = "Screen and audio recorder driving an external encoder", version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record until `q` on stdin or Ctrl+C
    Record(RecordArgs),
    /// List audio input devices
    Devices {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List monitors
    Displays,
}

#[derive(Args)]
struct RecordArgs {
    /// Monitor index
    #[arg(short, long)]
    monitor: Option<usize>,

    /// Capture region in absolute pixels
    #[arg(short, long, value_name = "X1,Y1,X2,Y2")]
    region: Option<Region>,

    /// Frame rate (30 or 60)
    #[arg(long, value_parser = parse_frame_rate)]
    fps: Option<FrameRate>,

    /// Video bitrate, e.g. 2500k
    #[arg(short, long)]
    bitrate: Option<String>,

    /// Video codec (libx264, libx265 or any encoder name)
    #[arg(long)]
    codec: Option<String>,

    /// Output container (mkv or mp4)
    #[arg(long)]
    container: Option<Container>,

    /// Audio input, repeatable; volume 0-100 defaults to 100
    #[arg(short, long = "device", value_name = "ID[:VOLUME]")]
    devices: Vec<DeviceSelection>,

    /// Open the output directory after saving
    #[arg(long)]
    open: bool,
}

fn parse_frame_rate(value: &str) -> Result<FrameRate, String> {
    let fps: u32 = value
        .parse()
        .map_err(|_| format!("invalid frame rate '{}'", value))?;
    FrameRate::try_from(fps)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = logging::init_logging()?;
    info!("opencap recorder starting...");

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Ok(path) = config.config_path() {
        info!("Configuration loaded from {:?}", path);
    }

    match cli.command {
        Commands::Record(args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(record(config, args))
        }
        Commands::Devices { json } => list_devices(&config, json),
        Commands::Displays => list_displays(&config),
    }
}

fn list_devices(config: &Config, json: bool) -> Result<()> {
    let backend = create_capture_backend(config);
    let devices = backend.list_devices();

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("No audio input devices found. Check that the audio server is running.");
        return Ok(());
    }
    for device in &devices {
        let kind = if device.is_loopback { "loopback" } else { "input" };
        println!("{:<8} {}", kind, device.display_name);
        println!("         id: {}", device.id);
    }
    Ok(())
}

fn list_displays(config: &Config) -> Result<()> {
    let backend = create_capture_backend(config);
    let monitors = backend.list_monitors();
    if monitors.is_empty() {
        println!("No monitors found. Add [[displays]] entries to the config file.");
    }
    for (index, m) in monitors.iter().enumerate() {
        println!("{}: {}x{} at ({}, {})", index, m.width, m.height, m.x, m.y);
    }
    Ok(())
}

/// Check the encoder runs before attempting a recording
async fn probe_encoder(binary: &Path) -> Result<(), CaptureError> {
    let status = tokio::process::Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| CaptureError::ProcessSpawn {
            binary: binary.to_path_buf(),
            reason: e.to_string(),
        })?;
    if !status.success() {
        warn!("{:?} -version exited with {}", binary, status);
    }
    Ok(())
}

fn capture_config(
    config: &Config,
    args: &RecordArgs,
    monitor_index: usize,
    backend: &dyn CaptureBackend,
) -> Result<CaptureConfiguration> {
    let monitor = resolve_monitor(&backend.list_monitors(), monitor_index)?;
    let devices = if args.devices.is_empty() {
        config.recording.audio_devices.clone()
    } else {
        args.devices.clone()
    };

    Ok(CaptureConfiguration::builder(monitor_index, monitor)
        .region(args.region)
        .frame_rate(args.fps.unwrap_or(config.recording.frame_rate))
        .bitrate(
            args.bitrate
                .clone()
                .unwrap_or_else(|| config.recording.bitrate.clone()),
        )
        .codec(
            args.codec
                .clone()
                .map(VideoCodec::from)
                .unwrap_or_else(|| config.recording.codec.clone()),
        )
        .container(args.container.unwrap_or(config.recording.container))
        .audio_devices(devices)
        .build())
}

/// Line commands accepted on stdin while recording
enum StdinCommand {
    Stop,
    SwitchMonitor(usize),
    Unknown(String),
}

fn parse_stdin_command(line: &str) -> Option<StdinCommand> {
    let mut words = line.split_whitespace();
    let command = match words.next()? {
        "q" | "stop" | "quit" => StdinCommand::Stop,
        "m" | "monitor" => match words.next().and_then(|n| n.parse().ok()) {
            Some(index) => StdinCommand::SwitchMonitor(index),
            None => StdinCommand::Unknown(line.trim().to_string()),
        },
        _ => StdinCommand::Unknown(line.trim().to_string()),
    };
    Some(command)
}

/// Forward stdin lines from a dedicated thread
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn report_status(mut status_rx: broadcast::Receiver<ControllerStatus>) {
    loop {
        match status_rx.recv().await {
            Ok(ControllerStatus::Recording { segment, output }) => {
                println!("Recording segment {} -> {}", segment, output.display());
            }
            Ok(ControllerStatus::Saving) => println!("Saving..."),
            Ok(ControllerStatus::Saved { path }) => println!("Saved {}", path.display()),
            Ok(ControllerStatus::Error(e)) => eprintln!("Error: {}", e),
            Ok(ControllerStatus::SegmentsKept { segments }) => {
                eprintln!("Segments were kept:");
                for path in segments {
                    eprintln!("  {}", path.display());
                }
            }
            Ok(ControllerStatus::DevicesDisconnected { devices }) => {
                eprintln!("Disconnected: {}", devices.join(", "));
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Missed {} status update(s)", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn record(config: Config, args: RecordArgs) -> Result<()> {
    let backend: Arc<dyn CaptureBackend> = Arc::from(create_capture_backend(&config));
    probe_encoder(&backend.resolve_encoder_path()).await?;

    let monitor_index = args.monitor.unwrap_or(config.recording.monitor);
    let capture = capture_config(&config, &args, monitor_index, backend.as_ref())?;
    let settings = ControllerSettings::from_config(&config);
    let output_dir = settings.output_dir.clone();

    let (cmd_tx, cmd_rx, status_tx, status_rx) = create_controller_channels();
    let mut controller = RecordingController::new(backend.clone(), settings, cmd_rx, status_tx);
    controller.set_selection(capture.audio_devices().to_vec());

    let mut controller_task = tokio::spawn(async move {
        if let Err(e) = controller.run().await {
            error!("Recording controller error: {}", e);
        }
    });
    let status_task = tokio::spawn(report_status(status_rx));

    // Ctrl+C stops and saves through the normal shutdown path
    let ctrl_c_tx = cmd_tx.clone();
    let runtime = tokio::runtime::Handle::current();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        let tx = ctrl_c_tx.clone();
        runtime.spawn(async move {
            let _ = tx.send(ControllerCommand::Shutdown).await;
        });
    })
    .context("Failed to install Ctrl+C handler")?;

    let handle = ControllerHandle::new(cmd_tx);
    if let Err(e) = handle.start(capture.clone()).await? {
        handle.shutdown().await?;
        let _ = controller_task.await;
        let _ = status_task.await;
        return Err(e.into());
    }
    println!("Type 'm <index>' to switch monitor, 'q' to stop (or press Ctrl+C)");

    let mut stdin_rx = spawn_stdin_reader();
    let mut stdin_open = true;
    let mut current = capture;

    loop {
        tokio::select! {
            _ = &mut controller_task => break,

            line = stdin_rx.recv(), if stdin_open => {
                let Some(line) = line else {
                    stdin_open = false;
                    continue;
                };
                match parse_stdin_command(&line) {
                    Some(StdinCommand::Stop) => {
                        match handle.stop().await? {
                            Ok(Some(_)) if args.open => {
                                if let Err(e) = backend.open_output_location(&output_dir) {
                                    warn!("{:#}", e);
                                }
                            }
                            Ok(Some(_)) => {}
                            Ok(None) => println!("Nothing was recorded"),
                            // Reported through the status stream
                            Err(_) => {}
                        }
                        handle.shutdown().await?;
                        let _ = (&mut controller_task).await;
                        break;
                    }
                    Some(StdinCommand::SwitchMonitor(index)) => {
                        match resolve_monitor(&backend.list_monitors(), index) {
                            Ok(monitor) => {
                                let next = current.with_monitor(index, monitor);
                                match handle.switch_monitor(next.clone()).await? {
                                    Ok(()) => current = next,
                                    Err(e) => eprintln!("Monitor switch failed: {}", e),
                                }
                            }
                            Err(e) => eprintln!("{}", e),
                        }
                    }
                    Some(StdinCommand::Unknown(text)) => {
                        eprintln!("Unknown command '{}'", text);
                    }
                    None => {}
                }
            }
        }
    }

    let _ = status_task.await;
    info!("Shutdown complete");
    Ok(())
}
