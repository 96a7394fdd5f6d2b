//! opencap recorder
//!
//! Screen + audio recording by supervising an external FFmpeg-compatible
//! encoder. Recordings are captured as numbered segments (a monitor switch
//! starts a new one) and stream-copied into a single file on stop.

pub mod capture;
pub mod config;
pub mod devices;
pub mod encoder;
pub mod error;
pub mod logging;
pub mod recorder;
pub mod segments;

#[cfg(test)]
mod testing;

pub use capture::{
    create_capture_backend, CaptureBackend, CaptureConfiguration, Container, DeviceSelection,
    FrameRate, Monitor, Region, VideoCodec,
};
pub use config::Config;
pub use devices::{AudioDevice, DeviceMonitor};
pub use encoder::{ProcessSupervisor, StopTimeouts};
pub use error::CaptureError;
pub use recorder::{
    create_controller_channels, ControllerCommand, ControllerHandle, ControllerSettings,
    ControllerStatus, RecorderEvent, RecordingController, RecordingState,
};
pub use segments::SegmentManager;
