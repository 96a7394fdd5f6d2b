//! Error taxonomy for the capture engine
//!
//! Precondition errors (`NoDeviceSelected`, `InvalidRegion`, `DeviceUnavailable`,
//! `MonitorNotFound`) and `ProcessSpawn` are raised before any state changes.
//! `Concatenation` is reported after the session has already returned to idle.

use std::path::PathBuf;
use std::time::Duration;

/// Errors surfaced by the recording engine
///
/// Payloads are rendered text so the error can be cloned onto the status
/// broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("No audio device selected; select at least one input device before recording")]
    NoDeviceSelected,

    #[error("Audio device(s) unavailable: {}", .devices.join(", "))]
    DeviceUnavailable { devices: Vec<String> },

    #[error("Invalid capture region {width}x{height}: width and height must be positive")]
    InvalidRegion { width: i64, height: i64 },

    #[error("Monitor {index} not found ({available} monitor(s) available)")]
    MonitorNotFound { index: usize, available: usize },

    #[error("Failed to start encoder {}: {reason}", .binary.display())]
    ProcessSpawn { binary: PathBuf, reason: String },

    /// Internal to the stop ladder; always resolved by escalating
    #[error("Encoder did not exit within {after:?}")]
    ProcessTimeout { after: Duration },

    #[error("Encoder exited unexpectedly: {diagnostic}")]
    EncoderExited { diagnostic: String },

    #[error("Failed to merge recorded segments: {diagnostic}")]
    Concatenation { diagnostic: String },

    /// Swallowed at the registry boundary; only the device monitor logs it
    #[error("Audio device enumeration failed: {0}")]
    Enumeration(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl CaptureError {
    /// Whether the error was raised before anything was spawned or mutated
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            CaptureError::NoDeviceSelected
                | CaptureError::DeviceUnavailable { .. }
                | CaptureError::InvalidRegion { .. }
                | CaptureError::MonitorNotFound { .. }
        )
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Io(err.to_string())
    }
}
