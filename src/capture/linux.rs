//! X11 + PulseAudio capture backend

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use tracing::debug;

use super::backend::{
    AudioCaptureApi, CaptureBackend, ManifestPaths, PlatformCapabilities, VideoCaptureApi,
};
use super::displays::{parse_xrandr_monitors, query};
use super::recording::Monitor;
use crate::config::Config;
use crate::devices::{parse_pactl_sources, run_enumeration, AudioDevice, LINUX_LOOPBACK_KEYWORDS};
use crate::error::CaptureError;

const DEFAULT_DISPLAY: &str = ":0.0";
const LOOPBACK_BOOST: f64 = 1.5;

pub struct LinuxBackend {
    caps: PlatformCapabilities,
    static_displays: Vec<Monitor>,
}

impl LinuxBackend {
    pub fn new(config: &Config) -> Self {
        let display = std::env::var("DISPLAY")
            .ok()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DEFAULT_DISPLAY.to_string());

        Self {
            caps: PlatformCapabilities {
                video: VideoCaptureApi::X11Grab { display },
                audio: AudioCaptureApi::Pulse,
                encoder_path: config
                    .encoder
                    .path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("ffmpeg")),
                loopback_boost: config.devices.loopback_boost.unwrap_or(LOOPBACK_BOOST),
                loopback_keywords: LINUX_LOOPBACK_KEYWORDS,
                manifest_paths: ManifestPaths::FileName,
            },
            static_displays: config.displays.clone(),
        }
    }
}

impl CaptureBackend for LinuxBackend {
    fn name(&self) -> &'static str {
        "x11grab/pulse"
    }

    fn capabilities(&self) -> &PlatformCapabilities {
        &self.caps
    }

    fn try_list_devices(&self) -> Result<Vec<AudioDevice>, CaptureError> {
        let mut command = Command::new("pactl");
        // Field labels are localized otherwise
        command.args(["list", "sources"]).env("LC_ALL", "C");
        let raw = run_enumeration(command, false)?;
        let devices = parse_pactl_sources(&raw, self.caps.loopback_keywords);
        debug!("pactl reported {} source(s)", devices.len());
        Ok(devices)
    }

    fn list_monitors(&self) -> Vec<Monitor> {
        if !self.static_displays.is_empty() {
            return self.static_displays.clone();
        }
        let mut command = Command::new("xrandr");
        command.arg("--listmonitors");
        query(command)
            .map(|out| parse_xrandr_monitors(&out))
            .unwrap_or_default()
    }

    fn open_output_location(&self, dir: &Path) -> anyhow::Result<()> {
        Command::new("xdg-open")
            .arg(dir)
            .spawn()
            .with_context(|| format!("Failed to open {:?} with xdg-open", dir))?;
        Ok(())
    }
}
