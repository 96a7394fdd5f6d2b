//! Screen + audio capture through an external encoder
//!
//! The encoder is driven entirely by its command line. This module owns the
//! per-segment configuration, turns it into encoder arguments, and hides the
//! platform differences (grab API, audio API, device and monitor
//! enumeration) behind [`CaptureBackend`].

mod backend;
mod command;
mod displays;
mod linux;
mod recording;
mod windows;

pub use backend::{
    create_capture_backend, AudioCaptureApi, CaptureBackend, ManifestPaths, PlatformCapabilities,
    VideoCaptureApi,
};
pub use command::{build_capture_args, input_gain, mix_filter_graph};
pub use displays::{parse_screen_bounds, parse_xrandr_monitors, resolve_monitor};
pub use linux::LinuxBackend;
pub use recording::{
    CaptureConfiguration, CaptureConfigurationBuilder, CaptureRect, Container, DeviceSelection,
    FrameRate, Monitor, Region, VideoCodec,
};
pub use windows::WindowsBackend;
