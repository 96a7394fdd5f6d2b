//! Recording controller - owns the session state machine
//!
//! Background tasks (device monitor, encoder output readers) never touch
//! session state. They publish [`RecorderEvent`]s which the controller
//! applies on its own task, interleaved with user [`ControllerCommand`]s.

mod controller;

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};

pub use controller::{create_controller_channels, ControllerSettings, RecordingController};

use crate::capture::CaptureConfiguration;
use crate::devices::AudioDevice;
use crate::encoder::OutputLevel;
use crate::error::CaptureError;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Stopping,
    Saving,
}

/// Events published by background tasks
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// The device list differs from the previous poll
    DevicesChanged(Vec<AudioDevice>),
    /// A previously present device is gone
    DeviceDisconnected(AudioDevice),
    /// Error-level output from an encoder
    EncoderDiagnostic {
        segment: u32,
        level: OutputLevel,
        message: String,
    },
    /// An encoder's diagnostic stream reached end of file
    EncoderOutputClosed { segment: u32 },
}

pub type Reply<T> = oneshot::Sender<Result<T, CaptureError>>;

/// Commands that can be sent to the controller
#[derive(Debug)]
pub enum ControllerCommand {
    /// Start a new session
    Start {
        config: CaptureConfiguration,
        reply: Reply<()>,
    },
    /// Restart the current session's capture with a new configuration
    SwitchMonitor {
        config: CaptureConfiguration,
        reply: Reply<()>,
    },
    /// Stop and merge the current session
    Stop { reply: Reply<Option<PathBuf>> },
    /// Stop any session and exit the run loop
    Shutdown,
}

/// Status updates from the controller
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerStatus {
    Idle,
    Recording { segment: u32, output: PathBuf },
    Stopping,
    Saving,
    Saved { path: PathBuf },
    Error(CaptureError),
    /// Parts left on disk by a failed merge, in recording order
    SegmentsKept { segments: Vec<PathBuf> },
    /// Selected devices vanished while idle and were dropped from the selection
    DevicesDisconnected { devices: Vec<String> },
}

/// Cloneable request/response front end for a running controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    cmd_tx: mpsc::Sender<ControllerCommand>,
}

impl ControllerHandle {
    pub fn new(cmd_tx: mpsc::Sender<ControllerCommand>) -> Self {
        Self { cmd_tx }
    }

    pub async fn start(&self, config: CaptureConfiguration) -> Result<Result<(), CaptureError>> {
        self.request(|reply| ControllerCommand::Start { config, reply }).await
    }

    pub async fn switch_monitor(
        &self,
        config: CaptureConfiguration,
    ) -> Result<Result<(), CaptureError>> {
        self.request(|reply| ControllerCommand::SwitchMonitor { config, reply })
            .await
    }

    pub async fn stop(&self) -> Result<Result<Option<PathBuf>, CaptureError>> {
        self.request(|reply| ControllerCommand::Stop { reply }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.cmd_tx
            .send(ControllerCommand::Shutdown)
            .await
            .map_err(|_| anyhow!("Recording controller is not running"))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> ControllerCommand,
    ) -> Result<Result<T, CaptureError>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| anyhow!("Recording controller is not running"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("Recording controller dropped the request"))
    }
}
