//! Recording controller
//!
//! Drives sessions through `Idle -> Recording -> Stopping -> Saving -> Idle`.
//! A session is one logical recording made of one or more encoder segments;
//! switching monitors restarts the encoder into a new segment without ending
//! the session. All transitions run on the controller's own task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{ControllerCommand, ControllerStatus, RecorderEvent, RecordingState};
use crate::capture::{CaptureBackend, CaptureConfiguration, Container, DeviceSelection};
use crate::config::Config;
use crate::devices::{AudioDevice, DeviceMonitor};
use crate::encoder::{EncoderProcess, ProcessSupervisor, StopTimeouts};
use crate::error::CaptureError;
use crate::segments::SegmentManager;

/// Runtime knobs for the controller
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub output_dir: PathBuf,
    pub stop_timeouts: StopTimeouts,
    pub output_batch_lines: usize,
    pub device_poll_interval: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_dir: config.output_directory(),
            stop_timeouts: config.stop_timeouts(),
            output_batch_lines: config.encoder.output_batch_lines,
            device_poll_interval: config.device_poll_interval(),
        }
    }
}

/// The encoder currently writing a segment
#[derive(Debug)]
struct ActiveSegment {
    index: u32,
    path: PathBuf,
    process: EncoderProcess,
}

/// One logical recording
#[derive(Debug)]
struct RecordingSession {
    id: Uuid,
    state: RecordingState,
    /// Survives segment restarts
    started_at: DateTime<Local>,
    config: CaptureConfiguration,
    segments: SegmentManager,
    active: Option<ActiveSegment>,
    /// Most recent error-level encoder output for the active segment
    last_diagnostic: Option<String>,
}

/// Segments of a stopped session whose merge failed
#[derive(Debug)]
struct PendingMerge {
    segments: SegmentManager,
    container: Container,
}

/// Owns the recording session and everything that mutates it
pub struct RecordingController {
    backend: Arc<dyn CaptureBackend>,
    supervisor: ProcessSupervisor,
    monitor: DeviceMonitor,
    settings: ControllerSettings,

    /// Remembered device selection, pruned as devices disappear
    selection: Vec<DeviceSelection>,
    session: Option<RecordingSession>,
    /// Sessions whose merge failed, oldest first
    unmerged: Vec<PendingMerge>,

    event_tx: mpsc::UnboundedSender<RecorderEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<RecorderEvent>>,
    cmd_rx: Option<mpsc::Receiver<ControllerCommand>>,
    status_tx: broadcast::Sender<ControllerStatus>,
}

impl RecordingController {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        settings: ControllerSettings,
        cmd_rx: mpsc::Receiver<ControllerCommand>,
        status_tx: broadcast::Sender<ControllerStatus>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let supervisor = ProcessSupervisor::new(
            backend.resolve_encoder_path(),
            settings.stop_timeouts,
            settings.output_batch_lines,
            event_tx.clone(),
        );
        let monitor = DeviceMonitor::new(backend.clone(), settings.device_poll_interval);

        Self {
            backend,
            supervisor,
            monitor,
            settings,
            selection: Vec::new(),
            session: None,
            unmerged: Vec::new(),
            event_tx,
            event_rx: Some(event_rx),
            cmd_rx: Some(cmd_rx),
            status_tx,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.session
            .as_ref()
            .map_or(RecordingState::Idle, |s| s.state)
    }

    /// Time since the session started, across segment restarts
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.session
            .as_ref()
            .map(|s| Local::now().signed_duration_since(s.started_at))
    }

    pub fn current_segment(&self) -> Option<u32> {
        self.session
            .as_ref()
            .and_then(|s| s.active.as_ref())
            .map(|a| a.index)
    }

    pub fn selection(&self) -> &[DeviceSelection] {
        &self.selection
    }

    pub fn set_selection(&mut self, selection: Vec<DeviceSelection>) {
        self.selection = selection;
    }

    /// Segments kept on disk after failed merges, oldest session first
    pub fn pending_segments(&self) -> Vec<PathBuf> {
        self.unmerged
            .iter()
            .flat_map(|pending| pending.segments.segments().iter().cloned())
            .collect()
    }

    /// Run the controller main loop
    pub async fn run(&mut self) -> Result<()> {
        let mut cmd_rx = self.cmd_rx.take().context("Controller is already running")?;
        let mut event_rx = self
            .event_rx
            .take()
            .context("Controller is already running")?;

        info!("Recording controller starting");
        self.monitor.start(self.event_tx.clone()).await;
        let _ = self.status_tx.send(ControllerStatus::Idle);

        loop {
            tokio::select! {
                // Background events first so a pending disconnect is applied
                // before any queued restart
                biased;

                Some(event) = event_rx.recv() => {
                    self.handle_event(event).await;
                }

                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        info!("Command channel closed");
                        break;
                    };
                    match cmd {
                        ControllerCommand::Start { config, reply } => {
                            let result = self.start(config).await;
                            if let Err(e) = &result {
                                warn!("Failed to start recording: {}", e);
                            }
                            let _ = reply.send(result);
                        }
                        ControllerCommand::SwitchMonitor { config, reply } => {
                            let _ = reply.send(self.on_monitor_changed(config).await);
                        }
                        ControllerCommand::Stop { reply } => {
                            let _ = reply.send(self.stop().await);
                        }
                        ControllerCommand::Shutdown => {
                            info!("Shutdown command received");
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = self.stop().await {
            error!("Failed to save recording during shutdown: {}", e);
        }
        self.monitor.stop().await;
        self.event_rx = Some(event_rx);
        self.cmd_rx = Some(cmd_rx);

        info!("Recording controller stopped");
        Ok(())
    }

    /// Apply one background event
    pub async fn handle_event(&mut self, event: RecorderEvent) {
        match event {
            RecorderEvent::DevicesChanged(devices) => self.on_devices_changed(&devices),
            RecorderEvent::DeviceDisconnected(device) => self.on_device_disconnected(&device).await,
            RecorderEvent::EncoderDiagnostic {
                segment,
                level,
                message,
            } => {
                if self.current_segment() != Some(segment) {
                    debug!("Ignoring stale {:?} output from segment {}", level, segment);
                    return;
                }
                if let Some(session) = self.session.as_mut() {
                    session.last_diagnostic = Some(message);
                }
            }
            RecorderEvent::EncoderOutputClosed { segment } => {
                if self.current_segment() != Some(segment)
                    || self.state() != RecordingState::Recording
                {
                    debug!("Encoder output for segment {} closed", segment);
                    return;
                }

                let diagnostic = self
                    .session
                    .as_ref()
                    .and_then(|s| s.last_diagnostic.clone())
                    .unwrap_or_else(|| "encoder output closed while recording".to_string());
                error!("Encoder for segment {} exited unexpectedly: {}", segment, diagnostic);

                if let Err(e) = self.stop().await {
                    error!("Failed to save recording: {}", e);
                }
                let _ = self
                    .status_tx
                    .send(ControllerStatus::Error(CaptureError::EncoderExited { diagnostic }));
            }
        }
    }

    /// Start a new recording session
    ///
    /// Every precondition is checked before anything is spawned; on error
    /// the controller stays idle.
    pub async fn start(&mut self, config: CaptureConfiguration) -> Result<(), CaptureError> {
        if self.session.is_some() {
            warn!("Recording already in progress");
            return Ok(());
        }

        if config.audio_devices().is_empty() {
            return Err(CaptureError::NoDeviceSelected);
        }
        let devices = self.monitor.resolve_selection(config.audio_devices()).await?;
        let config = config.with_audio_devices(devices);
        config.capture_rect()?;

        tokio::fs::create_dir_all(&self.settings.output_dir).await?;
        let mut segments = SegmentManager::new(
            self.settings.output_dir.clone(),
            self.supervisor.binary().to_path_buf(),
            self.backend.capabilities().manifest_paths,
        );
        let segment = self.spawn_segment(&mut segments, &config)?;

        let session_id = Uuid::new_v4();
        info!(
            "Recording started: session={}, monitor={}, devices={}, output={:?}",
            session_id,
            config.monitor_index(),
            config.audio_devices().len(),
            segment.path
        );

        let status = ControllerStatus::Recording {
            segment: segment.index,
            output: segment.path.clone(),
        };
        self.selection = config.audio_devices().to_vec();
        self.session = Some(RecordingSession {
            id: session_id,
            state: RecordingState::Recording,
            started_at: Local::now(),
            config,
            segments,
            active: Some(segment),
            last_diagnostic: None,
        });
        let _ = self.status_tx.send(status);

        Ok(())
    }

    /// Restart capture into a new segment with a new configuration
    ///
    /// A no-op unless recording. If the new segment cannot start, the
    /// session is stopped and merged and the error is returned.
    pub async fn on_monitor_changed(
        &mut self,
        config: CaptureConfiguration,
    ) -> Result<(), CaptureError> {
        if self.state() != RecordingState::Recording {
            debug!("Monitor changed while not recording; nothing to restart");
            return Ok(());
        }
        info!("Switching capture to monitor {}", config.monitor_index());

        let restart = match self.monitor.resolve_selection(config.audio_devices()).await {
            Ok(devices) => {
                let config = config.with_audio_devices(devices);
                config.capture_rect().map(|_| config)
            }
            Err(e) => Err(e),
        };

        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if let Some(active) = session.active.take() {
            self.supervisor.stop(active.process).await;
            session.segments.record_segment(active.path);
        }
        session.last_diagnostic = None;

        let restarted = restart.and_then(|config| {
            let (index, path) = session.segments.allocate(Local::now());
            let args = self.backend.build_args(&config, &path)?;
            let process = self.supervisor.start(&args, index)?;
            Ok((
                config,
                ActiveSegment {
                    index,
                    path,
                    process,
                },
            ))
        });

        match restarted {
            Ok((config, segment)) => {
                info!(
                    "Session {} continued in segment {} ({:?})",
                    session.id, segment.index, segment.path
                );
                let _ = self.status_tx.send(ControllerStatus::Recording {
                    segment: segment.index,
                    output: segment.path.clone(),
                });
                session.config = config;
                session.active = Some(segment);
                Ok(())
            }
            Err(e) => {
                error!("Failed to restart capture: {}", e);
                if let Err(stop_err) = self.stop().await {
                    error!("Failed to save recording: {}", stop_err);
                }
                let _ = self.status_tx.send(ControllerStatus::Error(e.clone()));
                Err(e)
            }
        }
    }

    /// React to a device disappearing
    pub async fn on_device_disconnected(&mut self, device: &AudioDevice) {
        let in_use = self.session.as_ref().is_some_and(|s| {
            s.state == RecordingState::Recording && s.config.uses_device(&device.id)
        });

        if in_use {
            error!(
                "Audio device '{}' disconnected during recording; stopping",
                device.display_name
            );
            if let Err(e) = self.stop().await {
                error!("Failed to save recording: {}", e);
            }
            self.forget_device(&device.id);
            let _ = self
                .status_tx
                .send(ControllerStatus::Error(CaptureError::DeviceUnavailable {
                    devices: vec![device.display_name.clone()],
                }));
            return;
        }

        if self.forget_device(&device.id) && self.session.is_none() {
            warn!(
                "Selected audio device '{}' disconnected; removed from selection",
                device.display_name
            );
            let _ = self.status_tx.send(ControllerStatus::DevicesDisconnected {
                devices: vec![device.display_name.clone()],
            });
        }
    }

    /// Drop selected devices missing from a fresh device list
    pub fn on_devices_changed(&mut self, devices: &[AudioDevice]) {
        debug!("Device list changed: {} device(s)", devices.len());

        let missing: Vec<String> = self
            .selection
            .iter()
            .filter(|s| !devices.iter().any(|d| d.id == s.id))
            .map(|s| s.id.clone())
            .collect();
        if missing.is_empty() {
            return;
        }

        self.selection
            .retain(|s| devices.iter().any(|d| d.id == s.id));
        if self.session.is_none() {
            warn!("Selected audio device(s) unavailable: {}", missing.join(", "));
            let _ = self
                .status_tx
                .send(ControllerStatus::DevicesDisconnected { devices: missing });
        }
    }

    /// Stop the session and merge its segments
    ///
    /// Idempotent: returns `Ok(None)` when idle. The controller is idle
    /// afterwards even if the merge fails.
    pub async fn stop(&mut self) -> Result<Option<PathBuf>, CaptureError> {
        let Some(session) = self.session.as_mut() else {
            debug!("No recording in progress");
            return Ok(None);
        };

        info!("Stopping recording...");
        session.state = RecordingState::Stopping;
        let _ = self.status_tx.send(ControllerStatus::Stopping);

        if let Some(active) = session.active.take() {
            self.supervisor.stop(active.process).await;
            session.segments.record_segment(active.path);
        }

        session.state = RecordingState::Saving;
        let _ = self.status_tx.send(ControllerStatus::Saving);

        let output = session
            .segments
            .output_path(session.config.container(), Local::now());
        let result = session.segments.finalize(&output).await;
        let elapsed = Local::now().signed_duration_since(session.started_at);

        let Some(session) = self.session.take() else {
            return result;
        };
        match &result {
            Ok(Some(path)) => {
                info!(
                    "Session {} saved to {:?} ({}s)",
                    session.id,
                    path,
                    elapsed.num_seconds()
                );
                let _ = self
                    .status_tx
                    .send(ControllerStatus::Saved { path: path.clone() });
            }
            Ok(None) => info!("Session {} produced no segments", session.id),
            Err(e) => {
                let kept = session.segments.segments().to_vec();
                error!(
                    "Session {} could not be merged; {} segment(s) kept: {}",
                    session.id,
                    kept.len(),
                    e
                );
                self.unmerged.push(PendingMerge {
                    segments: session.segments,
                    container: session.config.container(),
                });
                let _ = self.status_tx.send(ControllerStatus::Error(e.clone()));
                let _ = self
                    .status_tx
                    .send(ControllerStatus::SegmentsKept { segments: kept });
            }
        }
        let _ = self.status_tx.send(ControllerStatus::Idle);

        result
    }

    /// Retry every merge kept from failed stops
    ///
    /// Returns the merged files. Sessions that fail again stay pending and
    /// the first failure is returned after all were attempted.
    pub async fn retry_finalize(&mut self) -> Result<Vec<PathBuf>, CaptureError> {
        let mut saved = Vec::new();
        let mut still_pending = Vec::new();
        let mut first_error = None;

        for mut pending in std::mem::take(&mut self.unmerged) {
            let output = pending
                .segments
                .output_path(pending.container, Local::now());
            match pending.segments.finalize(&output).await {
                Ok(Some(path)) => saved.push(path),
                Ok(None) => {}
                Err(e) => {
                    warn!("Merge retry failed: {}", e);
                    first_error.get_or_insert(e);
                    still_pending.push(pending);
                }
            }
        }
        self.unmerged = still_pending;

        match first_error {
            Some(e) => Err(e),
            None => Ok(saved),
        }
    }

    fn spawn_segment(
        &self,
        segments: &mut SegmentManager,
        config: &CaptureConfiguration,
    ) -> Result<ActiveSegment, CaptureError> {
        let (index, path) = segments.allocate(Local::now());
        let args = self.backend.build_args(config, &path)?;
        let process = self.supervisor.start(&args, index)?;
        Ok(ActiveSegment {
            index,
            path,
            process,
        })
    }

    /// Remove a device from the remembered selection
    fn forget_device(&mut self, id: &str) -> bool {
        let before = self.selection.len();
        self.selection.retain(|s| s.id != id);
        self.selection.len() != before
    }
}

/// Create command and status channels for the controller
pub fn create_controller_channels() -> (
    mpsc::Sender<ControllerCommand>,
    mpsc::Receiver<ControllerCommand>,
    broadcast::Sender<ControllerStatus>,
    broadcast::Receiver<ControllerStatus>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (status_tx, status_rx) = broadcast::channel(32);
    (cmd_tx, cmd_rx, status_tx, status_rx)
}
