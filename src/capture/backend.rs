//! Platform capture backend trait
//!
//! One implementation per platform. Everything platform-conditional lives
//! behind this seam: how video and audio inputs are spelled for the encoder,
//! how devices and monitors are enumerated, and where the encoder lives.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::command::build_capture_args;
use super::recording::{CaptureConfiguration, Monitor};
use crate::config::Config;
use crate::devices::AudioDevice;
use crate::error::CaptureError;

/// Screen grabbing input used by the encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoCaptureApi {
    /// X11 screen grab; `display` is the X display string (e.g. `:0.0`)
    X11Grab { display: String },
    /// GDI desktop grab (Windows)
    GdiGrab,
}

/// Audio input API used by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCaptureApi {
    Pulse,
    DirectShow,
}

/// How segment files are referenced from the concat manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestPaths {
    /// Bare file names, resolved against the manifest's directory
    FileName,
    /// Absolute paths
    Absolute,
}

/// Capability descriptor consumed by the command builder
#[derive(Debug, Clone)]
pub struct PlatformCapabilities {
    pub video: VideoCaptureApi,
    pub audio: AudioCaptureApi,
    pub encoder_path: PathBuf,
    /// Gain multiplier applied to loopback/system-audio inputs
    pub loopback_boost: f64,
    /// Display-name keywords marking a device as loopback during enumeration
    pub loopback_keywords: &'static [&'static str],
    pub manifest_paths: ManifestPaths,
}

/// Trait for platform capture backends
pub trait CaptureBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> &PlatformCapabilities;

    /// Enumerate audio inputs, propagating enumeration failures
    fn try_list_devices(&self) -> Result<Vec<AudioDevice>, CaptureError>;

    /// Enumerate audio inputs, failing open
    ///
    /// An enumeration error is logged and reported as "no devices"; callers
    /// must surface an empty list explicitly.
    fn list_devices(&self) -> Vec<AudioDevice> {
        match self.try_list_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("{} device enumeration failed: {}", self.name(), e);
                Vec::new()
            }
        }
    }

    /// Enumerate monitor geometry
    fn list_monitors(&self) -> Vec<Monitor>;

    /// Build encoder arguments for one capture segment
    fn build_args(
        &self,
        config: &CaptureConfiguration,
        output: &Path,
    ) -> Result<Vec<String>, CaptureError> {
        build_capture_args(config, self.capabilities(), output)
    }

    fn resolve_encoder_path(&self) -> PathBuf {
        self.capabilities().encoder_path.clone()
    }

    /// Open a directory in the desktop file manager
    fn open_output_location(&self, dir: &Path) -> anyhow::Result<()>;
}

/// Create the appropriate capture backend for the current platform
pub fn create_capture_backend(config: &Config) -> Box<dyn CaptureBackend> {
    #[cfg(target_os = "windows")]
    {
        let backend = super::windows::WindowsBackend::new(config);
        info!(
            "Using {} capture backend (encoder: {:?})",
            backend.name(),
            backend.resolve_encoder_path()
        );
        Box::new(backend)
    }

    #[cfg(not(target_os = "windows"))]
    {
        let backend = super::linux::LinuxBackend::new(config);
        info!(
            "Using {} capture backend (encoder: {:?})",
            backend.name(),
            backend.resolve_encoder_path()
        );
        Box::new(backend)
    }
}
